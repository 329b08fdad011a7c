use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use speech_session_types::{ClientFrame, ServerFrame};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;

use crate::config::consts::{
    AUTHORIZATION_HEADER, CONNECTION_ID_HEADER, CONNECTION_PROPERTIES_HEADER,
    SUBSCRIPTION_KEY_HEADER,
};
use crate::config::BotConnectorConfig;
use crate::connector::transport::{BotChannel, BotTransport};
use crate::error::SessionError;

/// JSON text frames over a websocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

pub fn build_request(
    config: &BotConnectorConfig,
    connection_id: &str,
) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = format!("{}?language={}", config.endpoint(), config.language())
        .into_client_request()?;
    let headers = request.headers_mut();

    let secret = config.channel_secret().expose_secret();
    if !secret.is_empty() {
        headers.insert(AUTHORIZATION_HEADER, format!("Bearer {}", secret).as_str().parse()?);
    }
    headers.insert(
        SUBSCRIPTION_KEY_HEADER,
        config.speech().subscription_key().expose_secret().parse()?,
    );
    headers.insert(CONNECTION_ID_HEADER, connection_id.parse()?);

    let properties: serde_json::Map<String, serde_json::Value> = config
        .connection_properties()
        .into_iter()
        .map(|(name, value)| (name, serde_json::Value::String(value)))
        .collect();
    let properties = serde_json::Value::Object(properties).to_string();
    headers.insert(CONNECTION_PROPERTIES_HEADER, properties.as_str().parse()?);
    Ok(request)
}

#[async_trait]
impl BotTransport for WebSocketTransport {
    async fn connect(
        &self,
        config: &BotConnectorConfig,
        connection_id: &str,
    ) -> Result<BotChannel, SessionError> {
        let request = build_request(config, connection_id)?;
        tracing::debug!("connecting to {}", request.uri());
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = ws_stream.split();

        let sink = write.with(|frame: ClientFrame| async move {
            tracing::debug!("sending frame: {}", frame.frame_type());
            let text = serde_json::to_string(&frame).map_err(SessionError::transport)?;
            Ok::<_, SessionError>(Message::Text(text))
        });

        let stream = read.filter_map(|message| async move {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    return Some(Err(SessionError::from(e)));
                }
            };
            match message {
                Message::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => Some(Ok(frame)),
                    Err(e) => {
                        tracing::warn!("failed to deserialize frame: {}, text=> {:?}", e, text);
                        None
                    }
                },
                Message::Binary(bin) => {
                    tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    None
                }
                Message::Close(reason) => {
                    tracing::info!("connection closed: {:?}", reason);
                    Some(Ok(ServerFrame::Close {
                        reason: reason.map(|frame| frame.reason.to_string()),
                    }))
                }
                _ => None,
            }
        });

        Ok(BotChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
