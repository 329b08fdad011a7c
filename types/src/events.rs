use crate::activity::Activity;
use crate::result::{CancellationDetails, IntentResolution, RecognitionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionEventKind {
    SessionStarted,
    IntermediateResult,
    FinalResult,
    Canceled,
    SessionStopped,
}

/// Events published by a keyword-gated recognition session.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type")]
pub enum RecognitionEvent {
    #[serde(rename = "session.started")]
    SessionStarted {
        session_id: String,
        /// The keyword whose detection opened this utterance.
        keyword: String,
    },
    #[serde(rename = "result.intermediate")]
    IntermediateResult {
        session_id: String,
        result: RecognitionResult,
    },
    #[serde(rename = "result.final")]
    FinalResult {
        session_id: String,
        result: RecognitionResult,
        resolution: IntentResolution,
    },
    #[serde(rename = "canceled")]
    Canceled {
        session_id: String,
        result: RecognitionResult,
        details: CancellationDetails,
    },
    #[serde(rename = "session.stopped")]
    SessionStopped { session_id: String },
}

impl RecognitionEvent {
    pub fn kind(&self) -> RecognitionEventKind {
        match self {
            RecognitionEvent::SessionStarted { .. } => RecognitionEventKind::SessionStarted,
            RecognitionEvent::IntermediateResult { .. } => RecognitionEventKind::IntermediateResult,
            RecognitionEvent::FinalResult { .. } => RecognitionEventKind::FinalResult,
            RecognitionEvent::Canceled { .. } => RecognitionEventKind::Canceled,
            RecognitionEvent::SessionStopped { .. } => RecognitionEventKind::SessionStopped,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            RecognitionEvent::SessionStarted { session_id, .. }
            | RecognitionEvent::IntermediateResult { session_id, .. }
            | RecognitionEvent::FinalResult { session_id, .. }
            | RecognitionEvent::Canceled { session_id, .. }
            | RecognitionEvent::SessionStopped { session_id } => session_id,
        }
    }

    pub fn result(&self) -> Option<&RecognitionResult> {
        match self {
            RecognitionEvent::IntermediateResult { result, .. }
            | RecognitionEvent::FinalResult { result, .. }
            | RecognitionEvent::Canceled { result, .. } => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotEventKind {
    SessionStarted,
    SessionStopped,
    Recognized,
    ActivityReceived,
    Canceled,
}

/// Events published by a bot connector session.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type")]
pub enum BotEvent {
    /// A listen turn began.
    #[serde(rename = "session.started")]
    SessionStarted { session_id: String },
    /// A listen turn ended.
    #[serde(rename = "session.stopped")]
    SessionStopped { session_id: String },
    #[serde(rename = "recognized")]
    Recognized {
        session_id: String,
        result: RecognitionResult,
    },
    #[serde(rename = "activity.received")]
    ActivityReceived {
        session_id: String,
        activity: Activity,
        has_audio: bool,
    },
    #[serde(rename = "canceled")]
    Canceled {
        session_id: String,
        details: CancellationDetails,
    },
}

impl BotEvent {
    pub fn kind(&self) -> BotEventKind {
        match self {
            BotEvent::SessionStarted { .. } => BotEventKind::SessionStarted,
            BotEvent::SessionStopped { .. } => BotEventKind::SessionStopped,
            BotEvent::Recognized { .. } => BotEventKind::Recognized,
            BotEvent::ActivityReceived { .. } => BotEventKind::ActivityReceived,
            BotEvent::Canceled { .. } => BotEventKind::Canceled,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            BotEvent::SessionStarted { session_id }
            | BotEvent::SessionStopped { session_id }
            | BotEvent::Recognized { session_id, .. }
            | BotEvent::ActivityReceived { session_id, .. }
            | BotEvent::Canceled { session_id, .. } => session_id,
        }
    }
}
