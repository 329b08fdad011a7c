//! An in-process backend for driving a connector without a network.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use speech_session_types::{ClientFrame, ServerFrame};

use crate::config::BotConnectorConfig;
use crate::connector::transport::{BotChannel, BotTransport, FrameSink};
use crate::error::SessionError;

type Replies = mpsc::UnboundedSender<Result<ServerFrame, SessionError>>;

pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refusal: Mutex<Option<SessionError>>,
    rejection: Mutex<Option<(usize, SessionError)>>,
}

/// Backend side: hands out one [`MemoryPeer`] per connection.
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Backend end of a single connection.
pub struct MemoryPeer {
    connection_id: String,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    replies: Option<Replies>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded();
        (
            Self {
                accepted: tx,
                refusal: Mutex::new(None),
                rejection: Mutex::new(None),
            },
            MemoryServer { accepted: rx },
        )
    }

    /// Makes the next connection attempt fail with `err`.
    pub fn refuse_next(&self, err: SessionError) {
        *self.refusal.lock() = Some(err);
    }

    /// Makes the next connection's sink accept `accepted` frames, then fail
    /// every send with `err`.
    pub fn reject_sends_after(&self, accepted: usize, err: SessionError) {
        *self.rejection.lock() = Some((accepted, err));
    }
}

#[async_trait]
impl BotTransport for MemoryTransport {
    async fn connect(
        &self,
        _config: &BotConnectorConfig,
        connection_id: &str,
    ) -> Result<BotChannel, SessionError> {
        if let Some(err) = self.refusal.lock().take() {
            return Err(err);
        }
        let (client_tx, client_rx) = mpsc::unbounded();
        let (server_tx, server_rx) = mpsc::unbounded();
        self.accepted
            .unbounded_send(MemoryPeer {
                connection_id: connection_id.to_string(),
                frames: client_rx,
                replies: Some(server_tx),
            })
            .map_err(|_| SessionError::transport("memory backend is gone"))?;

        let sink: FrameSink = match self.rejection.lock().take() {
            None => Box::pin(client_tx.sink_map_err(SessionError::transport)),
            Some((accepted, err)) => Box::pin(sink::unfold(
                (client_tx, accepted),
                move |(tx, left), frame: ClientFrame| {
                    let err = err.clone();
                    async move {
                        if left == 0 {
                            return Err(err);
                        }
                        tx.unbounded_send(frame).map_err(SessionError::transport)?;
                        Ok((tx, left - 1))
                    }
                },
            )),
        };
        Ok(BotChannel {
            sink,
            stream: Box::pin(server_rx),
        })
    }
}

impl MemoryServer {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.next().await
    }
}

impl MemoryPeer {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The next frame from the client, or `None` once it closed its sink.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.frames.next().await
    }

    pub fn send(&self, frame: ServerFrame) -> Result<(), SessionError> {
        self.push(Ok(frame))
    }

    /// Delivers a stream error to the client.
    pub fn fail(&self, err: SessionError) -> Result<(), SessionError> {
        self.push(Err(err))
    }

    /// Ends the client's stream without a close frame.
    pub fn hang_up(&mut self) {
        self.replies.take();
    }

    fn push(&self, item: Result<ServerFrame, SessionError>) -> Result<(), SessionError> {
        match &self.replies {
            Some(replies) => replies
                .unbounded_send(item)
                .map_err(|_| SessionError::transport("client went away")),
            None => Err(SessionError::transport("peer already hung up")),
        }
    }
}
