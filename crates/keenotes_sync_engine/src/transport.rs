//! Transport layer abstraction for the sync channel.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// One open, message-oriented connection to the server.
///
/// Only text frames carry protocol messages. Transport-level control frames
/// are handled inside the implementation.
#[async_trait]
pub trait FrameSocket: Send {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> SyncResult<()>;

    /// Receives the next text frame, or `None` once the peer has closed.
    ///
    /// Must be cancel-safe: dropping the future loses no frame.
    async fn recv_text(&mut self) -> SyncResult<Option<String>>;

    /// Closes the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Opens sockets to the sync server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dials the server.
    async fn connect(&self) -> SyncResult<Box<dyn FrameSocket>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector over `tokio-tungstenite`, sending the bearer token on upgrade.
#[derive(Clone)]
pub struct WebSocketConnector {
    url: String,
    token: String,
}

impl WebSocketConnector {
    /// Creates a connector from a validated configuration.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            url: config.ws_url.clone(),
            token: config.require_token()?.to_string(),
        })
    }

    /// Returns the URL dialed.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> SyncResult<Box<dyn FrameSocket>> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| SyncError::Configuration("token is not a valid header value".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = connect_async(request).await?;
        debug!(url = %self.url, status = %response.status(), "websocket connected");
        Ok(Box::new(WebSocketSocket { stream }))
    }
}

struct WebSocketSocket {
    stream: WsStream,
}

#[async_trait]
impl FrameSocket for WebSocketSocket {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> SyncResult<Option<String>> {
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => debug!("ignoring non-UTF-8 binary frame"),
                },
                // tungstenite queues the pong reply itself.
                Message::Ping(_) | Message::Pong(_) => trace!("transport heartbeat"),
                Message::Close(frame) => {
                    debug!(?frame, "server closed websocket");
                    return Ok(None);
                }
                Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "error while closing websocket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_requires_valid_config() {
        assert!(matches!(
            WebSocketConnector::new(&SyncConfig::new("https://h")),
            Err(SyncError::Configuration(_))
        ));

        let connector =
            WebSocketConnector::new(&SyncConfig::new("https://h").with_token("t")).unwrap();
        assert_eq!(connector.url(), "wss://h/ws");
        assert!(!format!("{connector:?}").contains("\"t\""));
    }

    #[tokio::test]
    async fn dialing_closed_port_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = SyncConfig::new(format!("http://127.0.0.1:{port}")).with_token("t");
        let err = WebSocketConnector::new(&config)
            .unwrap()
            .connect()
            .await
            .err()
            .unwrap();
        assert!(err.is_retryable(), "{err}");
    }
}
