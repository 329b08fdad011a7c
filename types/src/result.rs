#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    Recognized,
    NoMatch,
    Canceled,
}

/// One recognition hypothesis or final result.
///
/// Values are never mutated after they are delivered. Intermediate results
/// for the same utterance share an `utterance_id`; each one supersedes the
/// previous.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecognitionResult {
    utterance_id: u64,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    intent_id: Option<String>,
    reason: ResultReason,
    is_final: bool,
}

impl RecognitionResult {
    pub fn intermediate(utterance_id: u64, text: &str) -> Self {
        Self {
            utterance_id,
            text: text.to_string(),
            intent_id: None,
            reason: ResultReason::Recognized,
            is_final: false,
        }
    }

    pub fn recognized(utterance_id: u64, text: &str, intent_id: Option<&str>) -> Self {
        Self {
            utterance_id,
            text: text.to_string(),
            intent_id: intent_id.map(|id| id.to_string()),
            reason: ResultReason::Recognized,
            is_final: true,
        }
    }

    pub fn no_match(utterance_id: u64) -> Self {
        Self {
            utterance_id,
            text: String::new(),
            intent_id: None,
            reason: ResultReason::NoMatch,
            is_final: true,
        }
    }

    pub fn canceled(utterance_id: u64) -> Self {
        Self {
            utterance_id,
            text: String::new(),
            intent_id: None,
            reason: ResultReason::Canceled,
            is_final: true,
        }
    }

    pub fn utterance_id(&self) -> u64 {
        self.utterance_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn intent_id(&self) -> Option<&str> {
        self.intent_id.as_deref()
    }

    pub fn reason(&self) -> ResultReason {
        self.reason
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The engine, audio input or transport failed.
    Error,
    /// The audio source ran dry before the utterance resolved.
    EndOfStream,
    /// The caller stopped the session or disconnected.
    Stopped,
    /// The backend declined to finish the utterance.
    Backend,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CancellationDetails {
    reason: CancellationReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    message: String,
}

impl CancellationDetails {
    pub fn new(reason: CancellationReason, message: &str) -> Self {
        Self {
            reason,
            code: None,
            message: message.to_string(),
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn reason(&self) -> CancellationReason {
        self.reason
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of looking up an intent id in a binding table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentResolution {
    Label(String),
    Unknown,
}

impl IntentResolution {
    pub fn label(&self) -> Option<&str> {
        match self {
            IntentResolution::Label(label) => Some(label),
            IntentResolution::Unknown => None,
        }
    }
}
