#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityDirection {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("Malformed activity JSON: {0}")]
    Malformed(String),
    #[error("Activity payload must be a JSON object")]
    NotAnObject,
}

/// A structured message exchanged with a conversational backend.
///
/// The connector only transports activities; the payload is opaque to it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Activity {
    payload: serde_json::Value,
    #[serde(skip)]
    audio: Option<Vec<u8>>,
    direction: ActivityDirection,
}

impl Activity {
    /// An outgoing activity built from an already-parsed payload.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            audio: None,
            direction: ActivityDirection::Sent,
        }
    }

    /// Parses an outgoing activity from its serialized JSON form. The payload
    /// must be a JSON object.
    pub fn from_serialized(serialized: &str) -> Result<Self, ActivityError> {
        let payload = serde_json::from_str::<serde_json::Value>(serialized)
            .map_err(|e| ActivityError::Malformed(e.to_string()))?;
        if !payload.is_object() {
            return Err(ActivityError::NotAnObject);
        }
        Ok(Self::new(payload))
    }

    pub fn received(payload: serde_json::Value, audio: Option<Vec<u8>>) -> Self {
        Self {
            payload,
            audio,
            direction: ActivityDirection::Received,
        }
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// The `type` field of the payload, if present.
    pub fn activity_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(|v| v.as_str())
    }

    pub fn audio(&self) -> Option<&[u8]> {
        self.audio.as_deref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().map_or(false, |a| !a.is_empty())
    }

    pub fn direction(&self) -> ActivityDirection {
        self.direction
    }

    pub fn serialize(&self) -> String {
        self.payload.to_string()
    }
}
