//! JSON text frames exchanged with the conversational backend.

use crate::audio::Base64EncodedAudioBytes;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "activity.send")]
    ActivitySend { activity: serde_json::Value },
    #[serde(rename = "listen.start")]
    ListenStart { turn_id: String, language: String },
    #[serde(rename = "audio.append")]
    AudioAppend {
        turn_id: String,
        audio: Base64EncodedAudioBytes,
    },
    #[serde(rename = "audio.commit")]
    AudioCommit { turn_id: String },
    #[serde(rename = "listen.cancel")]
    ListenCancel { turn_id: String },
}

impl ClientFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::ActivitySend { .. } => "activity.send",
            ClientFrame::ListenStart { .. } => "listen.start",
            ClientFrame::AudioAppend { .. } => "audio.append",
            ClientFrame::AudioCommit { .. } => "audio.commit",
            ClientFrame::ListenCancel { .. } => "listen.cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "activity")]
    Activity {
        activity: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<Base64EncodedAudioBytes>,
    },
    #[serde(rename = "speech.hypothesis")]
    SpeechHypothesis { turn_id: String, text: String },
    #[serde(rename = "speech.recognized")]
    SpeechRecognized { turn_id: String, text: String },
    #[serde(rename = "speech.no_match")]
    SpeechNoMatch { turn_id: String },
    #[serde(rename = "speech.canceled")]
    SpeechCanceled {
        turn_id: String,
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
    #[serde(rename = "close")]
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ServerFrame {
    /// The listen turn this frame belongs to, if any.
    pub fn turn_id(&self) -> Option<&str> {
        match self {
            ServerFrame::SpeechHypothesis { turn_id, .. }
            | ServerFrame::SpeechRecognized { turn_id, .. }
            | ServerFrame::SpeechNoMatch { turn_id }
            | ServerFrame::SpeechCanceled { turn_id, .. } => Some(turn_id),
            _ => None,
        }
    }
}
