//! Connection to a conversational bot backend.
//!
//! A connected [`BotConnectorSession`] runs two tasks, split the same way
//! for every transport: a writer draining the outgoing queue into the
//! transport sink in FIFO order, and a reader dispatching server frames to
//! the event bus. Listen turns add a third, short-lived task that streams
//! audio for the turn.

pub mod memory;
pub mod transport;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::prelude::*;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use speech_session_types::{
    Activity, AudioSource, BotEvent, CancellationDetails, CancellationReason, ClientFrame,
    ConnectorState, RecognitionResult, ServerFrame, SessionInfo,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use transport::{BotChannel, BotTransport, FrameSink, FrameStream};
pub use websocket::WebSocketTransport;

use crate::config::BotConnectorConfig;
use crate::error::SessionError;
use crate::event_bus::EventBus;
use crate::task::{self, AsyncTaskHandle, TaskCompleter};

type SharedAudio = Arc<tokio::sync::Mutex<Box<dyn AudioSource>>>;

struct Outgoing {
    frame: ClientFrame,
    ack: Option<TaskCompleter<()>>,
}

impl Outgoing {
    fn frame(frame: ClientFrame) -> Self {
        Self { frame, ack: None }
    }
}

struct Link {
    outgoing: mpsc::Sender<Outgoing>,
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
}

struct Listen {
    turn_id: String,
    utterance: u64,
    completer: TaskCompleter<RecognitionResult>,
    pump: JoinHandle<()>,
}

struct Inner {
    state: ConnectorState,
    session: Option<SessionInfo>,
    link: Option<Link>,
    listen: Option<Listen>,
    disconnect_waiters: Vec<TaskCompleter<()>>,
}

struct Shared {
    config: BotConnectorConfig,
    inner: Mutex<Inner>,
    events: EventBus<BotEvent>,
    next_utterance: AtomicU64,
}

impl Shared {
    fn session_id(&self) -> String {
        self.inner
            .lock()
            .session
            .as_ref()
            .map(|s| s.session_id().to_string())
            .unwrap_or_default()
    }

    /// Takes the in-flight listen if it still belongs to `turn_id`.
    fn take_listen(&self, turn_id: &str) -> Option<Listen> {
        let mut inner = self.inner.lock();
        let current = inner
            .listen
            .as_ref()
            .is_some_and(|listen| listen.turn_id == turn_id);
        if current {
            inner.listen.take()
        } else {
            None
        }
    }
}

pub struct BotConnectorSessionBuilder {
    config: BotConnectorConfig,
    audio: Option<Box<dyn AudioSource>>,
    transport: Option<Arc<dyn BotTransport>>,
    runtime: Option<Handle>,
}

impl BotConnectorSessionBuilder {
    /// Audio for `listen_once`. Without one, listening fails.
    pub fn audio<A: AudioSource + 'static>(mut self, audio: A) -> Self {
        self.audio = Some(Box::new(audio));
        self
    }

    /// Defaults to [`WebSocketTransport`].
    pub fn transport<T: BotTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<BotConnectorSession, SessionError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| SessionError::Config(e.to_string()))?,
        };
        Ok(BotConnectorSession {
            shared: Arc::new(Shared {
                config: self.config,
                inner: Mutex::new(Inner {
                    state: ConnectorState::Disconnected,
                    session: None,
                    link: None,
                    listen: None,
                    disconnect_waiters: Vec::new(),
                }),
                events: EventBus::new(),
                next_utterance: AtomicU64::new(1),
            }),
            audio: self.audio.map(|audio| Arc::new(tokio::sync::Mutex::new(audio))),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(WebSocketTransport::new())),
            runtime,
        })
    }
}

pub struct BotConnectorSession {
    shared: Arc<Shared>,
    audio: Option<SharedAudio>,
    transport: Arc<dyn BotTransport>,
    runtime: Handle,
}

impl BotConnectorSession {
    pub fn builder(config: BotConnectorConfig) -> BotConnectorSessionBuilder {
        BotConnectorSessionBuilder {
            config,
            audio: None,
            transport: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> &BotConnectorConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &EventBus<BotEvent> {
        &self.shared.events
    }

    pub fn state(&self) -> ConnectorState {
        self.shared.inner.lock().state
    }

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

    pub fn connect(&self) -> AsyncTaskHandle<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != ConnectorState::Disconnected {
            return AsyncTaskHandle::failed(SessionError::AlreadyConnected);
        }
        let session = SessionInfo::new(&uuid::Uuid::new_v4().to_string());
        let session_id = session.session_id().to_string();
        inner.state = ConnectorState::Connecting;
        inner.session = Some(session);
        drop(inner);

        tracing::info!("connecting bot session {}", session_id);
        let (handle, started) = task::pair();
        self.runtime.spawn(establish(
            self.shared.clone(),
            self.transport.clone(),
            self.runtime.clone(),
            session_id,
            started,
        ));
        handle
    }

    /// Closes the connection. Always succeeds, whatever the current state.
    pub fn disconnect(&self) -> AsyncTaskHandle<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            ConnectorState::Disconnected => AsyncTaskHandle::completed(()),
            ConnectorState::Connecting | ConnectorState::Disconnecting => {
                let (handle, completer) = task::pair();
                inner.disconnect_waiters.push(completer);
                handle
            }
            ConnectorState::Connected | ConnectorState::Faulted => {
                tracing::info!("disconnecting from {:?}", inner.state);
                let (handle, completer) = task::pair();
                inner.disconnect_waiters.push(completer);
                inner.state = ConnectorState::Disconnecting;
                self.runtime.spawn(teardown(self.shared.clone()));
                handle
            }
        }
    }

    /// Queues an activity. The handle resolves once the transport accepted
    /// the frame; sends are delivered in call order.
    pub fn send_activity(&self, activity: Activity) -> AsyncTaskHandle<()> {
        if !activity.payload().is_object() {
            return AsyncTaskHandle::failed(SessionError::InvalidActivity(
                "activity payload must be a JSON object".to_string(),
            ));
        }
        let inner = self.shared.inner.lock();
        let link = match (&inner.state, &inner.link) {
            (ConnectorState::Connected, Some(link)) => link,
            _ => return AsyncTaskHandle::failed(SessionError::NotConnected),
        };

        let (handle, ack) = task::pair();
        let outgoing = Outgoing {
            frame: ClientFrame::ActivitySend {
                activity: activity.payload().clone(),
            },
            ack: Some(ack),
        };
        if let Err(err) = link.outgoing.try_send(outgoing) {
            let reason = match &err {
                mpsc::error::TrySendError::Full(_) => "outgoing queue is full",
                mpsc::error::TrySendError::Closed(_) => "connection writer has stopped",
            };
            if let Some(ack) = err.into_inner().ack {
                let _ = ack.fail(SessionError::transport(reason));
            }
        }
        handle
    }

    /// Captures a single utterance and resolves with the backend's result.
    pub fn listen_once(&self) -> AsyncTaskHandle<RecognitionResult> {
        let mut inner = self.shared.inner.lock();
        let outgoing = match (&inner.state, &inner.link) {
            (ConnectorState::Connected, Some(link)) => link.outgoing.clone(),
            _ => return AsyncTaskHandle::failed(SessionError::NotConnected),
        };
        if inner.listen.is_some() {
            return AsyncTaskHandle::failed(SessionError::invalid_state(
                "listen_once",
                "ListenInFlight",
            ));
        }
        let Some(audio) = self.audio.clone() else {
            return AsyncTaskHandle::failed(SessionError::Config(
                "no audio source configured".to_string(),
            ));
        };
        let session_id = inner
            .session
            .as_ref()
            .map(|s| s.session_id().to_string())
            .unwrap_or_default();

        let turn_id = uuid::Uuid::new_v4().to_string();
        let utterance = self.shared.next_utterance.fetch_add(1, Ordering::Relaxed);
        let (handle, completer) = task::pair();
        let pump = self.runtime.spawn(stream_turn(
            self.shared.clone(),
            audio,
            outgoing,
            session_id,
            turn_id.clone(),
            handle.clone(),
        ));
        inner.listen = Some(Listen {
            turn_id,
            utterance,
            completer,
            pump,
        });
        handle
    }
}

impl Drop for BotConnectorSession {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock();
        if let Some(listen) = inner.listen.take() {
            listen.pump.abort();
        }
        if let Some(link) = inner.link.take() {
            // The writer flushes and closes the sink once the queue is gone.
            if let Some(reader) = link.reader {
                reader.abort();
            }
        }
    }
}

async fn establish(
    shared: Arc<Shared>,
    transport: Arc<dyn BotTransport>,
    runtime: Handle,
    session_id: String,
    started: TaskCompleter<()>,
) {
    let connected = tokio::select! {
        _ = started.cancelled() => None,
        result = transport.connect(&shared.config, &session_id) => Some(result),
    };

    let channel = match connected {
        None => {
            tracing::debug!("connect canceled");
            settle_disconnected(&shared);
            let _ = started.cancel();
            return;
        }
        Some(Err(err)) => {
            let err = match err {
                SessionError::Transport(_) => err,
                other => SessionError::Transport(other.to_string()),
            };
            tracing::warn!("failed to connect: {}", err);
            shared.events.publish(BotEvent::Canceled {
                session_id,
                details: CancellationDetails::new(CancellationReason::Error, &err.to_string()),
            });
            settle_disconnected(&shared);
            let _ = started.fail(err);
            return;
        }
        Some(Ok(channel)) => channel,
    };

    let (tx, rx) = mpsc::channel(shared.config.capacity());
    let writer = runtime.spawn(write_frames(
        shared.clone(),
        channel.sink,
        rx,
        session_id.clone(),
    ));
    let superseded = {
        let mut inner = shared.inner.lock();
        inner.link = Some(Link {
            outgoing: tx,
            writer,
            reader: None,
        });
        if inner.disconnect_waiters.is_empty() {
            inner.state = ConnectorState::Connected;
            false
        } else {
            inner.state = ConnectorState::Disconnecting;
            true
        }
    };

    let reader = runtime.spawn(read_frames(shared.clone(), channel.stream, session_id));
    {
        let mut inner = shared.inner.lock();
        match inner.link.as_mut() {
            Some(link) => link.reader = Some(reader),
            None => reader.abort(),
        }
    }

    tracing::info!("connected");
    let _ = started.complete(());
    if superseded {
        teardown(shared).await;
    }
}

fn settle_disconnected(shared: &Shared) {
    let waiters = {
        let mut inner = shared.inner.lock();
        inner.state = ConnectorState::Disconnected;
        if let Some(session) = inner.session.as_mut() {
            session.end();
        }
        std::mem::take(&mut inner.disconnect_waiters)
    };
    for waiter in waiters {
        let _ = waiter.complete(());
    }
}

async fn teardown(shared: Arc<Shared>) {
    let (link, listen) = {
        let mut inner = shared.inner.lock();
        (inner.link.take(), inner.listen.take())
    };

    if let Some(listen) = listen {
        listen.pump.abort();
        let _ = listen.pump.await;
        if let Some(link) = &link {
            let _ = link.outgoing.try_send(Outgoing::frame(ClientFrame::ListenCancel {
                turn_id: listen.turn_id.clone(),
            }));
        }
        shared.events.publish(BotEvent::SessionStopped {
            session_id: shared.session_id(),
        });
        let _ = listen.completer.cancel();
    }

    if let Some(Link {
        outgoing,
        writer,
        reader,
    }) = link
    {
        drop(outgoing);
        if let Err(e) = writer.await {
            tracing::debug!("writer ended abnormally: {}", e);
        }
        if let Some(reader) = reader {
            reader.abort();
            let _ = reader.await;
        }
    }

    tracing::info!("disconnected");
    settle_disconnected(&shared);
}

/// Drains the outgoing queue into the sink. The first send error faults the
/// connection; nothing is written after it and every queued ack fails.
async fn write_frames(
    shared: Arc<Shared>,
    mut sink: FrameSink,
    mut rx: mpsc::Receiver<Outgoing>,
    session_id: String,
) {
    while let Some(Outgoing { frame, ack }) = rx.recv().await {
        let frame_type = frame.frame_type();
        let err = match sink.send(frame).await {
            Ok(()) => {
                tracing::debug!("sent frame: {}", frame_type);
                if let Some(ack) = ack {
                    let _ = ack.complete(());
                }
                continue;
            }
            Err(SessionError::Transport(message)) => SessionError::Transport(message),
            Err(other) => SessionError::Transport(other.to_string()),
        };

        tracing::error!("failed to send {}: {}", frame_type, err);
        fault(&shared, &session_id, err.clone());
        if let Some(ack) = ack {
            let _ = ack.fail(err.clone());
        }
        rx.close();
        while let Some(Outgoing { ack, .. }) = rx.recv().await {
            if let Some(ack) = ack {
                let _ = ack.fail(err.clone());
            }
        }
        return;
    }
    if let Err(e) = sink.close().await {
        tracing::debug!("failed to close sink: {}", e);
    }
}

async fn read_frames(shared: Arc<Shared>, mut stream: FrameStream, session_id: String) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return fault(&shared, &session_id, e),
        };
        match frame {
            ServerFrame::Activity { activity, audio } => {
                let audio = audio.and_then(|audio| match BASE64_STANDARD.decode(audio) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!("dropping undecodable activity audio: {}", e);
                        None
                    }
                });
                let activity = Activity::received(activity, audio);
                tracing::debug!(
                    "received activity: {}",
                    activity.activity_type().unwrap_or("unknown")
                );
                shared.events.publish(BotEvent::ActivityReceived {
                    session_id: session_id.clone(),
                    has_audio: activity.has_audio(),
                    activity,
                });
            }
            ServerFrame::SpeechHypothesis { turn_id, text } => {
                tracing::debug!("hypothesis for turn {}: {}", turn_id, text);
            }
            ServerFrame::SpeechRecognized { turn_id, text } => {
                resolve_turn(&shared, &session_id, &turn_id, |utterance| {
                    RecognitionResult::recognized(utterance, &text, None)
                });
            }
            ServerFrame::SpeechNoMatch { turn_id } => {
                resolve_turn(&shared, &session_id, &turn_id, RecognitionResult::no_match);
            }
            ServerFrame::SpeechCanceled {
                turn_id,
                code,
                message,
            } => {
                let Some(listen) = shared.take_listen(&turn_id) else {
                    tracing::warn!("cancellation for unknown turn {}", turn_id);
                    continue;
                };
                listen.pump.abort();
                let mut details = CancellationDetails::new(CancellationReason::Backend, &message);
                if let Some(code) = code.as_deref() {
                    details = details.with_code(code);
                }
                shared.events.publish(BotEvent::Canceled {
                    session_id: session_id.clone(),
                    details,
                });
                shared.events.publish(BotEvent::SessionStopped {
                    session_id: session_id.clone(),
                });
                let _ = listen
                    .completer
                    .complete(RecognitionResult::canceled(listen.utterance));
            }
            ServerFrame::Error { code, message } => {
                let message = match code {
                    Some(code) => format!("{} ({})", message, code),
                    None => message,
                };
                return fault(&shared, &session_id, SessionError::Transport(message));
            }
            ServerFrame::Close { reason } => {
                let reason = reason.unwrap_or_else(|| "connection closed".to_string());
                return fault(&shared, &session_id, SessionError::Transport(reason));
            }
        }
    }
    fault(
        &shared,
        &session_id,
        SessionError::transport("connection ended unexpectedly"),
    );
}

fn resolve_turn<F>(shared: &Shared, session_id: &str, turn_id: &str, result: F)
where
    F: FnOnce(u64) -> RecognitionResult,
{
    let Some(listen) = shared.take_listen(turn_id) else {
        tracing::warn!("result for unknown turn {}", turn_id);
        return;
    };
    listen.pump.abort();
    let result = result(listen.utterance);
    shared.events.publish(BotEvent::Recognized {
        session_id: session_id.to_string(),
        result: result.clone(),
    });
    shared.events.publish(BotEvent::SessionStopped {
        session_id: session_id.to_string(),
    });
    let _ = listen.completer.complete(result);
}

/// A broken connection while connected. Ignored once a disconnect owns the
/// link.
fn fault(shared: &Shared, session_id: &str, err: SessionError) {
    let listen = {
        let mut inner = shared.inner.lock();
        if inner.state != ConnectorState::Connected {
            tracing::debug!("ignoring transport end in state {:?}: {}", inner.state, err);
            return;
        }
        inner.listen.take()
    };

    tracing::error!("bot connection faulted: {}", err);
    shared.events.publish(BotEvent::Canceled {
        session_id: session_id.to_string(),
        details: CancellationDetails::new(CancellationReason::Error, &err.to_string()),
    });
    if let Some(listen) = listen {
        listen.pump.abort();
        shared.events.publish(BotEvent::SessionStopped {
            session_id: session_id.to_string(),
        });
        let _ = listen.completer.fail(err);
    }

    let mut inner = shared.inner.lock();
    if inner.state == ConnectorState::Connected {
        inner.state = ConnectorState::Faulted;
    }
}

/// Streams one listen turn: start, audio, commit. Then waits for the
/// caller to give up, since the reader resolves the turn otherwise.
async fn stream_turn(
    shared: Arc<Shared>,
    audio: SharedAudio,
    outgoing: mpsc::Sender<Outgoing>,
    session_id: String,
    turn_id: String,
    watch: AsyncTaskHandle<RecognitionResult>,
) {
    shared.events.publish(BotEvent::SessionStarted {
        session_id: session_id.clone(),
    });

    let streamed = tokio::select! {
        _ = watch.cancel_requested() => Err(SessionError::Canceled),
        result = stream_audio(&audio, &outgoing, &shared.config, &turn_id) => result,
    };
    let err = match streamed {
        Ok(()) => {
            watch.cancel_requested().await;
            SessionError::Canceled
        }
        Err(err) => err,
    };

    let Some(listen) = shared.take_listen(&turn_id) else {
        return;
    };
    let _ = outgoing.try_send(Outgoing::frame(ClientFrame::ListenCancel {
        turn_id: turn_id.clone(),
    }));
    if err != SessionError::Canceled {
        tracing::warn!("listen turn {} failed: {}", turn_id, err);
        shared.events.publish(BotEvent::Canceled {
            session_id: session_id.clone(),
            details: CancellationDetails::new(CancellationReason::Error, &err.to_string()),
        });
    }
    shared.events.publish(BotEvent::SessionStopped { session_id });
    let _ = match err {
        SessionError::Canceled => listen.completer.cancel(),
        err => listen.completer.fail(err),
    };
}

async fn stream_audio(
    audio: &SharedAudio,
    outgoing: &mpsc::Sender<Outgoing>,
    config: &BotConnectorConfig,
    turn_id: &str,
) -> Result<(), SessionError> {
    let gone = |_| SessionError::NotConnected;
    outgoing
        .send(Outgoing::frame(ClientFrame::ListenStart {
            turn_id: turn_id.to_string(),
            language: config.language().to_string(),
        }))
        .await
        .map_err(gone)?;

    let mut audio = audio.lock().await;
    let mut frames = 0usize;
    while let Some(frame) = audio.next_frame().await? {
        frames += 1;
        outgoing
            .send(Outgoing::frame(ClientFrame::AudioAppend {
                turn_id: turn_id.to_string(),
                audio: BASE64_STANDARD.encode(frame.to_le_bytes()),
            }))
            .await
            .map_err(gone)?;
    }
    tracing::debug!("committing {} audio frame(s) for turn {}", frames, turn_id);
    outgoing
        .send(Outgoing::frame(ClientFrame::AudioCommit {
            turn_id: turn_id.to_string(),
        }))
        .await
        .map_err(gone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferedAudioSource;
    use speech_session_types::{BotEventKind, ResultReason};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn config() -> BotConnectorConfig {
        BotConnectorConfig::from_secret_key("secret", "key", "westus")
    }

    async fn next<T>(fut: impl std::future::Future<Output = Option<T>>) -> T {
        tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    async fn connected(
        audio_frames: usize,
    ) -> (BotConnectorSession, MemoryPeer, UnboundedReceiver<BotEvent>) {
        let (transport, mut server) = MemoryTransport::new();
        let session = BotConnectorSession::builder(config())
            .audio(BufferedAudioSource::silence(audio_frames, 20))
            .transport(transport)
            .build()
            .unwrap();
        let (_token, rx) = session.events().channel(&[]);
        session.connect().await.unwrap();
        let peer = next(server.accept()).await;
        (session, peer, rx)
    }

    #[tokio::test]
    async fn sends_are_flushed_before_disconnect() {
        let (session, mut peer, _rx) = connected(0).await;
        assert_eq!(session.state(), ConnectorState::Connected);
        assert_eq!(Some(peer.connection_id().to_string()), session.session_id());

        let first = session.send_activity(Activity::new(serde_json::json!({"type": "message", "text": "a"})));
        let second = session.send_activity(Activity::new(serde_json::json!({"type": "message", "text": "b"})));
        session.disconnect().await.unwrap();
        first.await.unwrap();
        second.await.unwrap();

        for text in ["a", "b"] {
            match next(peer.recv()).await {
                ClientFrame::ActivitySend { activity } => assert_eq!(activity["text"], text),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(peer.recv().await.is_none());
        assert_eq!(session.state(), ConnectorState::Disconnected);

        let late = session.send_activity(Activity::new(serde_json::json!({"type": "message"})));
        assert_eq!(late.outcome(), Some(Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn preconditions_fail_fast() {
        let (transport, _server) = MemoryTransport::new();
        let session = BotConnectorSession::builder(config())
            .transport(transport)
            .build()
            .unwrap();

        let send = session.send_activity(Activity::new(serde_json::json!({"type": "message"})));
        assert_eq!(send.outcome(), Some(Err(SessionError::NotConnected)));
        let bad = session.send_activity(Activity::new(serde_json::json!("text")));
        assert!(matches!(bad.outcome(), Some(Err(SessionError::InvalidActivity(_)))));
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let (session, _peer, _rx) = connected(0).await;
        let again = session.connect();
        assert_eq!(again.outcome(), Some(Err(SessionError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn connect_failure_is_retryable() {
        let (transport, mut server) = MemoryTransport::new();
        transport.refuse_next(SessionError::transport("refused"));
        let session = BotConnectorSession::builder(config())
            .transport(transport)
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);

        let err = session.connect().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(next(rx.recv()).await.kind(), BotEventKind::Canceled);
        assert_eq!(session.state(), ConnectorState::Disconnected);

        session.connect().await.unwrap();
        next(server.accept()).await;
        assert_eq!(session.state(), ConnectorState::Connected);
    }

    #[tokio::test]
    async fn listen_once_resolves_with_backend_result() {
        let (session, mut peer, mut rx) = connected(2).await;

        let listen = session.listen_once();
        let second = session.listen_once();
        assert!(matches!(second.outcome(), Some(Err(SessionError::InvalidState { .. }))));

        let turn_id = match next(peer.recv()).await {
            ClientFrame::ListenStart { turn_id, language } => {
                assert_eq!(language, "en-US");
                turn_id
            }
            other => panic!("unexpected {:?}", other),
        };
        for _ in 0..2 {
            assert!(matches!(next(peer.recv()).await, ClientFrame::AudioAppend { .. }));
        }
        assert!(matches!(next(peer.recv()).await, ClientFrame::AudioCommit { .. }));
        peer.send(ServerFrame::SpeechRecognized {
            turn_id,
            text: "what's the weather".to_string(),
        })
        .unwrap();

        let result = listen.await.unwrap();
        assert_eq!(result.text(), "what's the weather");
        assert_eq!(result.reason(), ResultReason::Recognized);

        let kinds: Vec<_> = [
            next(rx.recv()).await,
            next(rx.recv()).await,
            next(rx.recv()).await,
        ]
        .iter()
        .map(BotEvent::kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                BotEventKind::SessionStarted,
                BotEventKind::Recognized,
                BotEventKind::SessionStopped
            ]
        );
    }

    #[tokio::test]
    async fn activities_carry_decoded_audio() {
        let (_session, peer, mut rx) = connected(0).await;
        peer.send(ServerFrame::Activity {
            activity: serde_json::json!({"type": "message", "speak": "hi"}),
            audio: Some(BASE64_STANDARD.encode([1u8, 2, 3, 4])),
        })
        .unwrap();

        match next(rx.recv()).await {
            BotEvent::ActivityReceived {
                activity,
                has_audio,
                ..
            } => {
                assert!(has_audio);
                assert_eq!(activity.audio(), Some(&[1u8, 2, 3, 4][..]));
                assert_eq!(activity.activity_type(), Some("message"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn hang_up_faults_until_disconnect() {
        let (session, mut peer, mut rx) = connected(0).await;
        peer.hang_up();

        match next(rx.recv()).await {
            BotEvent::Canceled { details, .. } => {
                assert_eq!(details.reason(), CancellationReason::Error)
            }
            other => panic!("unexpected {:?}", other),
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while session.state() != ConnectorState::Faulted {
            assert!(tokio::time::Instant::now() < deadline, "never faulted");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let send = session.send_activity(Activity::new(serde_json::json!({"type": "message"})));
        assert_eq!(send.outcome(), Some(Err(SessionError::NotConnected)));
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), ConnectorState::Disconnected);
    }

    async fn rejecting(
        accepted: usize,
    ) -> (BotConnectorSession, MemoryPeer, UnboundedReceiver<BotEvent>) {
        let (transport, mut server) = MemoryTransport::new();
        transport.reject_sends_after(accepted, SessionError::transport("socket reset"));
        let session = BotConnectorSession::builder(config())
            .audio(BufferedAudioSource::silence(2, 20))
            .transport(transport)
            .build()
            .unwrap();
        let (_token, rx) = session.events().channel(&[]);
        session.connect().await.unwrap();
        let peer = next(server.accept()).await;
        (session, peer, rx)
    }

    #[tokio::test]
    async fn send_failure_faults_the_connection() {
        let (session, mut peer, mut rx) = rejecting(0).await;

        let sent = session
            .send_activity(Activity::new(serde_json::json!({"type": "message"})))
            .wait()
            .await;
        assert_eq!(sent, Err(SessionError::transport("socket reset")));
        assert_eq!(session.state(), ConnectorState::Faulted);
        match next(rx.recv()).await {
            BotEvent::Canceled { details, .. } => {
                assert_eq!(details.reason(), CancellationReason::Error);
                assert_eq!(details.message(), "Transport error: socket reset");
            }
            other => panic!("unexpected {:?}", other),
        }

        let again = session.send_activity(Activity::new(serde_json::json!({"type": "message"})));
        assert_eq!(again.outcome(), Some(Err(SessionError::NotConnected)));
        assert!(peer.recv().await.is_none());

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), ConnectorState::Disconnected);
    }

    #[tokio::test]
    async fn send_failure_fails_the_listen_in_flight() {
        let (session, mut peer, mut rx) = rejecting(1).await;

        let listen = session.listen_once();
        assert!(matches!(next(peer.recv()).await, ClientFrame::ListenStart { .. }));
        assert_eq!(
            listen.wait().await,
            Err(SessionError::transport("socket reset"))
        );

        let kinds: Vec<_> = [
            next(rx.recv()).await,
            next(rx.recv()).await,
            next(rx.recv()).await,
        ]
        .iter()
        .map(BotEvent::kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                BotEventKind::SessionStarted,
                BotEventKind::Canceled,
                BotEventKind::SessionStopped
            ]
        );
        assert_eq!(session.state(), ConnectorState::Faulted);
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn listen_without_connection_reports_not_connected() {
        let (transport, _server) = MemoryTransport::new();
        let session = BotConnectorSession::builder(config())
            .transport(transport)
            .build()
            .unwrap();
        assert_eq!(
            session.listen_once().outcome(),
            Some(Err(SessionError::NotConnected))
        );

        session.connect().await.unwrap();
        assert!(matches!(
            session.listen_once().outcome(),
            Some(Err(SessionError::Config(_)))
        ));
    }

    #[tokio::test]
    async fn disconnect_cancels_listen() {
        let (transport, mut server) = MemoryTransport::new();
        let (_frames, audio) = crate::audio::ChannelAudioSource::new(1);
        let session = BotConnectorSession::builder(config())
            .audio(audio)
            .transport(transport)
            .build()
            .unwrap();
        let (_token, mut rx) = session.events().channel(&[]);
        session.connect().await.unwrap();
        let mut peer = next(server.accept()).await;

        let listen = session.listen_once();
        assert!(matches!(next(peer.recv()).await, ClientFrame::ListenStart { .. }));
        session.disconnect().await.unwrap();

        assert_eq!(listen.wait().await, Err(SessionError::Canceled));
        assert_eq!(next(rx.recv()).await.kind(), BotEventKind::SessionStarted);
        assert_eq!(next(rx.recv()).await.kind(), BotEventKind::SessionStopped);
        assert!(matches!(next(peer.recv()).await, ClientFrame::ListenCancel { .. }));
    }
}
