use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use speech_session_types::{ClientFrame, ServerFrame};

use crate::config::BotConnectorConfig;
use crate::error::SessionError;

pub type FrameSink = Pin<Box<dyn Sink<ClientFrame, Error = SessionError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<ServerFrame, SessionError>> + Send>>;

/// Both directions of an established backend connection.
pub struct BotChannel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to the conversational backend.
///
/// The stream ending, yielding an error or delivering a `close` frame while
/// the session is connected is treated as a transport failure.
#[async_trait]
pub trait BotTransport: Send + Sync {
    async fn connect(
        &self,
        config: &BotConnectorConfig,
        connection_id: &str,
    ) -> Result<BotChannel, SessionError>;
}
