use chrono::{DateTime, Utc};

/// Bookkeeping for one logical engagement (a keyword recognition run or a
/// connector connection).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    session_id: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionInfo {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn end(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Lifecycle of a keyword-gated recognition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionState {
    Idle,
    Starting,
    ListeningForKeyword,
    KeywordDetected,
    Recognizing,
    Stopping,
    /// Absorbing. The session must be discarded.
    Faulted,
}

impl Default for RecognitionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecognitionState {
    /// True while a keyword recognition run owns the session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecognitionState::Starting
                | RecognitionState::ListeningForKeyword
                | RecognitionState::KeywordDetected
                | RecognitionState::Recognizing
                | RecognitionState::Stopping
        )
    }
}

/// Lifecycle of a bot connector connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// The transport failed while connected. `disconnect` clears it.
    Faulted,
}

impl Default for ConnectorState {
    fn default() -> Self {
        Self::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_is_recorded_once() {
        let mut info = SessionInfo::new("abc");
        assert!(!info.is_ended());
        info.end();
        let first = info.ended_at();
        info.end();
        assert_eq!(info.ended_at(), first);
        assert!(info.started_at() <= first.unwrap());
    }

    #[test]
    fn active_states() {
        assert!(!RecognitionState::Idle.is_active());
        assert!(!RecognitionState::Faulted.is_active());
        assert!(RecognitionState::Recognizing.is_active());
        assert!(RecognitionState::Stopping.is_active());
    }
}
