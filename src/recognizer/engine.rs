use speech_session_types::AudioFrame;

#[cfg(test)]
use mockall::automock;

use crate::config::SpeechConfig;
use crate::error::SessionError;
use crate::intent::IntentBindingTable;
use crate::recognizer::keyword::KeywordModel;

/// What the engine should listen for on the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    /// Only keyword spotting; everything else is discarded.
    Keyword,
    /// Full recognition of the utterance following a keyword.
    Utterance,
}

/// Raw output of a recognition engine for one audio frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    KeywordSpotted {
        keyword: String,
    },
    Hypothesis {
        text: String,
    },
    Recognized {
        text: String,
        intent_id: Option<String>,
    },
    NoMatch,
    /// The engine gave up on the current utterance. Not fatal.
    Canceled {
        code: Option<String>,
        message: String,
    },
}

/// The speech-to-text and language-understanding boundary.
///
/// The session drives the engine from its audio-processing task: `prepare`
/// once per run, `process` per frame, `reset` when the run ends. Returning
/// an error from `process` is treated as unrecoverable and faults the
/// session.
#[cfg_attr(test, automock)]
pub trait RecognitionEngine: Send {
    /// Loads the keyword model and configures intent recognition. A model
    /// the engine cannot use should be reported as `SessionError::ModelLoad`.
    fn prepare(
        &mut self,
        config: &SpeechConfig,
        keyword: &KeywordModel,
        intents: &IntentBindingTable,
    ) -> Result<(), SessionError>;

    fn process(
        &mut self,
        frame: &AudioFrame,
        mode: ListenMode,
    ) -> Result<Vec<EngineEvent>, SessionError>;

    fn reset(&mut self);
}

/// Replays a fixed script, one entry per processed frame. Once the script
/// runs out every further frame yields nothing.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: std::collections::VecDeque<Result<Vec<EngineEvent>, SessionError>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the output for the next frame.
    pub fn then(mut self, events: Vec<EngineEvent>) -> Self {
        self.script.push_back(Ok(events));
        self
    }

    /// Appends `count` frames that produce nothing.
    pub fn then_silence(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.script.push_back(Ok(Vec::new()));
        }
        self
    }

    pub fn then_fail(mut self, err: SessionError) -> Self {
        self.script.push_back(Err(err));
        self
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn prepare(
        &mut self,
        _config: &SpeechConfig,
        _keyword: &KeywordModel,
        _intents: &IntentBindingTable,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    fn process(
        &mut self,
        _frame: &AudioFrame,
        _mode: ListenMode,
    ) -> Result<Vec<EngineEvent>, SessionError> {
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn reset(&mut self) {}
}
