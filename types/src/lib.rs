pub mod activity;
pub mod audio;
pub mod events;
pub mod frames;
pub mod result;
pub mod session;

pub use activity::{Activity, ActivityDirection, ActivityError};
pub use audio::{AudioError, AudioFrame, AudioSource};
pub use events::{BotEvent, BotEventKind, RecognitionEvent, RecognitionEventKind};
pub use frames::{ClientFrame, ServerFrame};
pub use result::{
    CancellationDetails, CancellationReason, IntentResolution, RecognitionResult, ResultReason,
};
pub use session::{ConnectorState, RecognitionState, SessionInfo};
