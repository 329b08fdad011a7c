pub mod audio;
pub mod config;
pub mod connector;
pub mod error;
pub mod event_bus;
pub mod event_log;
pub mod intent;
pub mod recognizer;
pub mod task;

pub use speech_session_types as types;

pub use config::{BotConnectorConfig, CommunicationType, ConfigError, SpeechConfig};
pub use connector::{BotConnectorSession, BotTransport, MemoryTransport, WebSocketTransport};
pub use error::SessionError;
pub use event_bus::{Event, EventBus, SubscriptionToken};
pub use event_log::EventLog;
pub use intent::{Intent, IntentBindingTable, IntentResolution, LanguageUnderstandingModel};
pub use recognizer::{
    EngineEvent, KeywordModel, ListenMode, RecognitionEngine, RecognitionSession, ScriptedEngine,
};
pub use task::{AsyncTaskHandle, TaskCompleter, TaskState};

#[cfg(feature = "utils")]
pub use speech_session_utils as utils;
