//! Keyword-gated continuous recognition.
//!
//! A [`RecognitionSession`] owns a [`RecognitionEngine`] and an
//! [`AudioSource`]. Starting it moves both onto a background task that pumps
//! audio through the engine until the session is stopped, the audio runs
//! out, or something fails.

pub mod engine;
pub mod keyword;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use speech_session_types::{
    AudioSource, CancellationDetails, CancellationReason, IntentResolution, RecognitionEvent,
    RecognitionResult, RecognitionState, SessionInfo,
};
use tokio::runtime::Handle;
use tokio::sync::Notify;

pub use engine::{EngineEvent, ListenMode, RecognitionEngine, ScriptedEngine};
pub use keyword::KeywordModel;

use crate::config::SpeechConfig;
use crate::error::SessionError;
use crate::event_bus::EventBus;
use crate::intent::{IntentBindingTable, LanguageUnderstandingModel};
use crate::task::{self, AsyncTaskHandle, TaskCompleter};

struct Inner {
    state: RecognitionState,
    session: Option<SessionInfo>,
    intents: Arc<IntentBindingTable>,
    // Both are parked here while idle and handed to the run task on start.
    engine: Option<Box<dyn RecognitionEngine>>,
    audio: Option<Box<dyn AudioSource>>,
    stop: Option<Arc<Notify>>,
    stop_waiters: Vec<TaskCompleter<()>>,
}

struct Shared {
    config: SpeechConfig,
    inner: Mutex<Inner>,
    events: EventBus<RecognitionEvent>,
    next_utterance: AtomicU64,
}

impl Shared {
    /// Moves a running session forward unless a stop already claimed it.
    fn advance(&self, to: RecognitionState) {
        let mut inner = self.inner.lock();
        match inner.state {
            RecognitionState::Stopping | RecognitionState::Faulted | RecognitionState::Idle => {}
            _ => inner.state = to,
        }
    }

    fn next_utterance(&self) -> u64 {
        self.next_utterance.fetch_add(1, Ordering::Relaxed)
    }
}

pub struct RecognitionSessionBuilder {
    config: SpeechConfig,
    engine: Option<Box<dyn RecognitionEngine>>,
    audio: Option<Box<dyn AudioSource>>,
    intents: IntentBindingTable,
    runtime: Option<Handle>,
}

impl RecognitionSessionBuilder {
    pub fn engine<E: RecognitionEngine + 'static>(mut self, engine: E) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    pub fn audio<A: AudioSource + 'static>(mut self, audio: A) -> Self {
        self.audio = Some(Box::new(audio));
        self
    }

    pub fn intents(mut self, intents: IntentBindingTable) -> Self {
        self.intents = intents;
        self
    }

    /// Runtime for the background task. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<RecognitionSession, SessionError> {
        let engine = self
            .engine
            .ok_or_else(|| SessionError::Config("no recognition engine set".to_string()))?;
        let audio = self
            .audio
            .ok_or_else(|| SessionError::Config("no audio source set".to_string()))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| SessionError::Config(e.to_string()))?,
        };
        Ok(RecognitionSession {
            shared: Arc::new(Shared {
                config: self.config,
                inner: Mutex::new(Inner {
                    state: RecognitionState::Idle,
                    session: None,
                    intents: Arc::new(self.intents),
                    engine: Some(engine),
                    audio: Some(audio),
                    stop: None,
                    stop_waiters: Vec::new(),
                }),
                events: EventBus::new(),
                next_utterance: AtomicU64::new(1),
            }),
            runtime,
        })
    }
}

/// A continuous recognizer that only listens for utterances after a
/// keyword has been spotted.
pub struct RecognitionSession {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl RecognitionSession {
    pub fn builder(config: SpeechConfig) -> RecognitionSessionBuilder {
        RecognitionSessionBuilder {
            config,
            engine: None,
            audio: None,
            intents: IntentBindingTable::new(),
            runtime: None,
        }
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &EventBus<RecognitionEvent> {
        &self.shared.events
    }

    pub fn state(&self) -> RecognitionState {
        self.shared.inner.lock().state
    }

    /// Id of the current engagement, or of the last one once it ended.
    pub fn session_id(&self) -> Option<String> {
        self.shared
            .inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.session_id().to_string())
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.inner.lock().session.clone()
    }

    /// Binds an intent id. Only allowed while idle; a running engagement
    /// keeps the table it started with.
    pub fn add_intent(
        &self,
        id: &str,
        model: LanguageUnderstandingModel,
        label: &str,
    ) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != RecognitionState::Idle {
            return Err(SessionError::invalid_state("add_intent", inner.state));
        }
        Arc::make_mut(&mut inner.intents).add_intent(id, model, label)
    }

    pub fn resolve_intent(&self, id: &str) -> IntentResolution {
        let intents = self.shared.inner.lock().intents.clone();
        intents.resolve(id)
    }

    pub fn intents(&self) -> Arc<IntentBindingTable> {
        self.shared.inner.lock().intents.clone()
    }

    /// Swaps the audio source, e.g. after a file source ran dry.
    pub fn replace_audio<A: AudioSource + 'static>(&self, audio: A) -> Result<(), SessionError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != RecognitionState::Idle {
            return Err(SessionError::invalid_state("replace_audio", inner.state));
        }
        inner.audio = Some(Box::new(audio));
        Ok(())
    }

    pub fn start_keyword_recognition(&self, model: KeywordModel) -> AsyncTaskHandle<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != RecognitionState::Idle {
            return AsyncTaskHandle::failed(SessionError::invalid_state(
                "start_keyword_recognition",
                inner.state,
            ));
        }
        let (engine, audio) = match (inner.engine.take(), inner.audio.take()) {
            (Some(engine), Some(audio)) => (engine, audio),
            (engine, audio) => {
                inner.engine = engine;
                inner.audio = audio;
                return AsyncTaskHandle::failed(SessionError::Faulted(
                    "engine or audio source unavailable".to_string(),
                ));
            }
        };

        let session = SessionInfo::new(&uuid::Uuid::new_v4().to_string());
        let session_id = session.session_id().to_string();
        let stop = Arc::new(Notify::new());
        inner.state = RecognitionState::Starting;
        inner.session = Some(session);
        inner.stop = Some(stop.clone());
        let intents = inner.intents.clone();
        drop(inner);

        tracing::info!(
            "starting keyword recognition for '{}' (session {})",
            model.keyword(),
            session_id
        );
        let (handle, started) = task::pair();
        let run = Run {
            shared: self.shared.clone(),
            session_id,
            model,
            intents,
            engine,
            audio,
            stop,
            utterance: None,
        };
        self.runtime.spawn(run.execute(started));
        handle
    }

    /// Stops the engagement. Safe to call in any state; on an idle or
    /// faulted session it completes immediately without publishing.
    pub fn stop_keyword_recognition(&self) -> AsyncTaskHandle<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            RecognitionState::Idle | RecognitionState::Faulted => AsyncTaskHandle::completed(()),
            state => {
                let (handle, completer) = task::pair();
                inner.stop_waiters.push(completer);
                if state != RecognitionState::Stopping {
                    tracing::debug!("stopping keyword recognition from {:?}", state);
                    inner.state = RecognitionState::Stopping;
                    if let Some(stop) = &inner.stop {
                        stop.notify_one();
                    }
                }
                handle
            }
        }
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        if let Some(stop) = &self.shared.inner.lock().stop {
            stop.notify_one();
        }
    }
}

enum Exit {
    Stopped,
    EndOfStream,
    Failed(SessionError),
}

/// One engagement, from start to stop. Owns the engine and the audio
/// source for its lifetime and is the only publisher while it runs.
struct Run {
    shared: Arc<Shared>,
    session_id: String,
    model: KeywordModel,
    intents: Arc<IntentBindingTable>,
    engine: Box<dyn RecognitionEngine>,
    audio: Box<dyn AudioSource>,
    stop: Arc<Notify>,
    utterance: Option<u64>,
}

impl Run {
    async fn execute(mut self, started: TaskCompleter<()>) {
        if started.is_cancel_requested() {
            self.abandon();
            let _ = started.cancel();
            return;
        }
        if let Err(err) = self
            .engine
            .prepare(&self.shared.config, &self.model, &self.intents)
        {
            tracing::warn!("failed to prepare recognition engine: {}", err);
            self.abandon();
            let _ = started.fail(err);
            return;
        }
        if started.is_cancel_requested() {
            self.engine.reset();
            self.abandon();
            let _ = started.cancel();
            return;
        }

        self.shared.advance(RecognitionState::ListeningForKeyword);
        let _ = started.complete(());

        let exit = self.pump().await;
        self.finish(exit);
    }

    async fn pump(&mut self) -> Exit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.stop.notified() => None,
                frame = self.audio.next_frame() => Some(frame),
            };
            let frame = match next {
                None => return Exit::Stopped,
                Some(Ok(Some(frame))) => frame,
                Some(Ok(None)) => return Exit::EndOfStream,
                Some(Err(err)) => return Exit::Failed(err.into()),
            };

            let mode = match self.utterance {
                Some(_) => ListenMode::Utterance,
                None => ListenMode::Keyword,
            };
            match self.engine.process(&frame, mode) {
                Ok(events) => {
                    for event in events {
                        self.dispatch(event);
                    }
                }
                Err(err) => return Exit::Failed(err),
            }
        }
    }

    fn dispatch(&mut self, event: EngineEvent) {
        let Some(utterance) = self.utterance else {
            match event {
                EngineEvent::KeywordSpotted { keyword } => self.open_utterance(keyword),
                other => tracing::trace!("discarding {:?} while listening for keyword", other),
            }
            return;
        };

        match event {
            EngineEvent::KeywordSpotted { .. } => {
                tracing::trace!("keyword spotted again inside utterance {}", utterance);
            }
            EngineEvent::Hypothesis { text } => {
                self.publish(RecognitionEvent::IntermediateResult {
                    session_id: self.session_id.clone(),
                    result: RecognitionResult::intermediate(utterance, &text),
                });
            }
            EngineEvent::Recognized { text, intent_id } => {
                let resolution = match intent_id.as_deref() {
                    Some(id) => self.intents.resolve(id),
                    None => IntentResolution::Unknown,
                };
                tracing::debug!("utterance {} recognized as {:?}", utterance, resolution);
                self.publish(RecognitionEvent::FinalResult {
                    session_id: self.session_id.clone(),
                    result: RecognitionResult::recognized(utterance, &text, intent_id.as_deref()),
                    resolution,
                });
                self.close_utterance();
            }
            EngineEvent::NoMatch => {
                self.publish(RecognitionEvent::FinalResult {
                    session_id: self.session_id.clone(),
                    result: RecognitionResult::no_match(utterance),
                    resolution: IntentResolution::Unknown,
                });
                self.close_utterance();
            }
            EngineEvent::Canceled { code, message } => {
                let mut details = CancellationDetails::new(CancellationReason::Backend, &message);
                if let Some(code) = code.as_deref() {
                    details = details.with_code(code);
                }
                self.publish(RecognitionEvent::Canceled {
                    session_id: self.session_id.clone(),
                    result: RecognitionResult::canceled(utterance),
                    details,
                });
                self.close_utterance();
            }
        }
    }

    fn open_utterance(&mut self, keyword: String) {
        let keyword = if keyword.is_empty() {
            self.model.keyword().to_string()
        } else {
            keyword
        };
        self.shared.advance(RecognitionState::KeywordDetected);
        let utterance = self.shared.next_utterance();
        self.utterance = Some(utterance);
        tracing::info!("keyword '{}' detected, utterance {}", keyword, utterance);
        self.publish(RecognitionEvent::SessionStarted {
            session_id: self.session_id.clone(),
            keyword,
        });
        self.shared.advance(RecognitionState::Recognizing);
    }

    fn close_utterance(&mut self) {
        self.utterance = None;
        self.shared.advance(RecognitionState::ListeningForKeyword);
    }

    fn publish(&self, event: RecognitionEvent) {
        self.shared.events.publish(event);
    }

    fn finish(mut self, exit: Exit) {
        let reason = match exit {
            Exit::Failed(err) => return self.fault(err),
            Exit::Stopped => CancellationReason::Stopped,
            Exit::EndOfStream => CancellationReason::EndOfStream,
        };
        if let Some(utterance) = self.utterance.take() {
            self.publish(RecognitionEvent::Canceled {
                session_id: self.session_id.clone(),
                result: RecognitionResult::canceled(utterance),
                details: CancellationDetails::new(reason, "utterance interrupted"),
            });
        }
        self.shared.inner.lock().state = RecognitionState::Stopping;
        self.engine.reset();
        self.publish(RecognitionEvent::SessionStopped {
            session_id: self.session_id.clone(),
        });
        tracing::info!("keyword recognition stopped ({:?})", reason);
        self.abandon();
    }

    fn fault(mut self, err: SessionError) {
        tracing::error!("keyword recognition faulted: {}", err);
        let utterance = self
            .utterance
            .take()
            .unwrap_or_else(|| self.shared.next_utterance());
        self.publish(RecognitionEvent::Canceled {
            session_id: self.session_id.clone(),
            result: RecognitionResult::canceled(utterance),
            details: CancellationDetails::new(CancellationReason::Error, &err.to_string()),
        });

        let waiters = {
            let mut inner = self.shared.inner.lock();
            inner.state = RecognitionState::Faulted;
            if let Some(session) = inner.session.as_mut() {
                session.end();
            }
            inner.stop = None;
            std::mem::take(&mut inner.stop_waiters)
        };
        for waiter in waiters {
            let _ = waiter.complete(());
        }
    }

    /// Hands the engine and audio back and returns the session to idle.
    fn abandon(self) {
        let waiters = {
            let mut inner = self.shared.inner.lock();
            inner.state = RecognitionState::Idle;
            if let Some(session) = inner.session.as_mut() {
                session.end();
            }
            inner.engine = Some(self.engine);
            inner.audio = Some(self.audio);
            inner.stop = None;
            std::mem::take(&mut inner.stop_waiters)
        };
        for waiter in waiters {
            let _ = waiter.complete(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::engine::MockRecognitionEngine;
    use super::*;
    use crate::audio::{BufferedAudioSource, ChannelAudioSource};
    use speech_session_types::{AudioFrame, RecognitionEventKind, ResultReason};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn model() -> KeywordModel {
        KeywordModel::from_bytes("Computer", vec![0x4b, 0x57, 0x53]).unwrap()
    }

    fn frame() -> AudioFrame {
        AudioFrame::new(vec![0; 320], 16000)
    }

    fn keyword() -> EngineEvent {
        EngineEvent::KeywordSpotted {
            keyword: "Computer".to_string(),
        }
    }

    async fn next(rx: &mut UnboundedReceiver<RecognitionEvent>) -> RecognitionEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("bus closed")
    }

    #[tokio::test]
    async fn keyword_gates_intent_recognition() {
        let engine = ScriptedEngine::new().then(vec![keyword()]).then(vec![
            EngineEvent::Hypothesis {
                text: "play".to_string(),
            },
            EngineEvent::Recognized {
                text: "play music".to_string(),
                intent_id: Some("1".to_string()),
            },
        ]);
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(engine)
            .audio(BufferedAudioSource::silence(2, 20))
            .build()
            .unwrap();
        session
            .add_intent("1", LanguageUnderstandingModel::from_app_id("app"), "play music")
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        session.start_keyword_recognition(model()).await.unwrap();

        match next(&mut rx).await {
            RecognitionEvent::SessionStarted { keyword, .. } => assert_eq!(keyword, "Computer"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(next(&mut rx).await.kind(), RecognitionEventKind::IntermediateResult);
        match next(&mut rx).await {
            RecognitionEvent::FinalResult {
                result, resolution, ..
            } => {
                assert_eq!(result.text(), "play music");
                assert_eq!(result.intent_id(), Some("1"));
                assert_eq!(resolution, IntentResolution::Label("play music".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(next(&mut rx).await.kind(), RecognitionEventKind::SessionStopped);
        assert_eq!(session.resolve_intent("1").label(), Some("play music"));
    }

    #[tokio::test]
    async fn output_before_keyword_is_discarded() {
        let engine = ScriptedEngine::new()
            .then(vec![EngineEvent::Recognized {
                text: "ignored".to_string(),
                intent_id: None,
            }])
            .then(vec![keyword()])
            .then(vec![EngineEvent::NoMatch]);
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(engine)
            .audio(BufferedAudioSource::silence(3, 20))
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        session.start_keyword_recognition(model()).await.unwrap();

        assert_eq!(next(&mut rx).await.kind(), RecognitionEventKind::SessionStarted);
        let event = next(&mut rx).await;
        assert_eq!(event.result().map(|r| r.reason()), Some(ResultReason::NoMatch));
        assert_eq!(next(&mut rx).await.kind(), RecognitionEventKind::SessionStopped);
    }

    #[tokio::test]
    async fn stop_on_idle_is_silent() {
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(ScriptedEngine::new())
            .audio(BufferedAudioSource::new(Vec::new()))
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        session.stop_keyword_recognition().await.unwrap();
        session.stop_keyword_recognition().await.unwrap();

        assert_eq!(session.state(), RecognitionState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn restart_while_active_is_rejected() {
        let (_tx, audio) = ChannelAudioSource::new(4);
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(ScriptedEngine::new())
            .audio(audio)
            .build()
            .unwrap();

        session.start_keyword_recognition(model()).await.unwrap();
        assert_eq!(session.state(), RecognitionState::ListeningForKeyword);

        let err = session.start_keyword_recognition(model()).outcome();
        assert!(matches!(err, Some(Err(SessionError::InvalidState { .. }))));
        let err = session.add_intent("2", LanguageUnderstandingModel::from_app_id("app"), "x");
        assert!(matches!(err, Err(SessionError::InvalidState { .. })));

        session.stop_keyword_recognition().await.unwrap();
        assert_eq!(session.state(), RecognitionState::Idle);
    }

    #[tokio::test]
    async fn stop_cancels_pending_utterance() {
        let (tx, audio) = ChannelAudioSource::new(4);
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(ScriptedEngine::new().then(vec![keyword()]))
            .audio(audio)
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        session.start_keyword_recognition(model()).await.unwrap();
        tx.send(frame()).await.unwrap();
        assert_eq!(next(&mut rx).await.kind(), RecognitionEventKind::SessionStarted);

        let first = session.stop_keyword_recognition();
        let second = session.stop_keyword_recognition();
        first.await.unwrap();
        second.await.unwrap();

        match next(&mut rx).await {
            RecognitionEvent::Canceled { details, .. } => {
                assert_eq!(details.reason(), CancellationReason::Stopped)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(next(&mut rx).await.kind(), RecognitionEventKind::SessionStopped);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.state(), RecognitionState::Idle);
        assert!(session.session_info().unwrap().is_ended());
    }

    #[tokio::test]
    async fn model_load_failure_returns_to_idle() {
        let mut engine = MockRecognitionEngine::new();
        engine
            .expect_prepare()
            .times(1)
            .returning(|_, _, _| Err(SessionError::ModelLoad("corrupt table".to_string())));
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(engine)
            .audio(BufferedAudioSource::silence(1, 20))
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        let err = session.start_keyword_recognition(model()).await.unwrap_err();
        assert!(matches!(err, SessionError::ModelLoad(_)));
        assert_eq!(session.state(), RecognitionState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn engine_error_faults_the_session() {
        let mut engine = MockRecognitionEngine::new();
        engine.expect_prepare().returning(|_, _, _| Ok(()));
        engine
            .expect_process()
            .returning(|_, _| Err(SessionError::Faulted("decoder crashed".to_string())));
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(engine)
            .audio(BufferedAudioSource::silence(4, 20))
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        session.start_keyword_recognition(model()).await.unwrap();
        match next(&mut rx).await {
            RecognitionEvent::Canceled { details, .. } => {
                assert_eq!(details.reason(), CancellationReason::Error);
                assert!(details.message().contains("decoder crashed"));
            }
            other => panic!("unexpected {:?}", other),
        }

        session.stop_keyword_recognition().await.unwrap();
        assert_eq!(session.state(), RecognitionState::Faulted);
        assert!(rx.try_recv().is_err());
        let restart = session.start_keyword_recognition(model()).outcome();
        assert!(matches!(restart, Some(Err(SessionError::InvalidState { .. }))));
    }

    #[tokio::test]
    async fn canceled_start_returns_to_idle() {
        let mut engine = MockRecognitionEngine::new();
        engine.expect_prepare().times(0);
        let session = RecognitionSession::builder(SpeechConfig::new())
            .engine(engine)
            .audio(BufferedAudioSource::silence(1, 20))
            .build()
            .unwrap();

        let start = session.start_keyword_recognition(model());
        assert!(start.cancel());
        assert_eq!(start.wait().await, Err(SessionError::Canceled));
        assert_eq!(session.state(), RecognitionState::Idle);
    }

    #[test]
    fn build_requires_engine_and_audio() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let result = RecognitionSession::builder(SpeechConfig::new())
            .audio(BufferedAudioSource::new(Vec::new()))
            .runtime(runtime.handle().clone())
            .build();
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
