//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Default delay before the single reconnect attempt after a failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for the sync session and the posting path.
#[derive(Clone)]
pub struct SyncConfig {
    /// WebSocket URL of the sync channel.
    pub ws_url: String,
    /// HTTP URL notes are posted to.
    pub post_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Channel label attached to posted notes.
    pub channel: String,
    /// Delay before reconnecting after a dropped connection.
    pub reconnect_delay: Duration,
    /// Upper bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Upper bound on a posting request.
    pub request_timeout: Duration,
    /// Capacity of the ordered queue between receive loop and reconciler.
    pub inbound_queue_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration from the server's base URL.
    ///
    /// `https://host` yields `wss://host/ws` for sync and
    /// `https://host/api/notes` for posting; `http` maps to `ws`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let base = endpoint.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };

        Self {
            ws_url: if base.is_empty() {
                String::new()
            } else {
                format!("{ws_base}/ws")
            },
            post_url: if base.is_empty() {
                String::new()
            } else {
                format!("{base}/api/notes")
            },
            token: None,
            channel: "default".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            inbound_queue_capacity: 64,
        }
    }

    /// Overrides the WebSocket URL.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Overrides the posting URL.
    pub fn with_post_url(mut self, url: impl Into<String>) -> Self {
        self.post_url = url.into();
        self
    }

    /// Sets the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the channel label for posted notes.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Sets the reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the inbound queue capacity.
    pub fn with_inbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound_queue_capacity = capacity;
        self
    }

    /// Returns the token, or a configuration error if none is set.
    pub fn require_token(&self) -> SyncResult<&str> {
        match self.token.as_deref() {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(SyncError::Configuration("missing API token".into())),
        }
    }

    /// Checks that the sync channel can be opened.
    pub fn validate(&self) -> SyncResult<()> {
        if self.ws_url.is_empty() {
            return Err(SyncError::Configuration("missing server endpoint".into()));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(SyncError::Configuration(format!(
                "sync URL must use ws:// or wss://, got {}",
                self.ws_url
            )));
        }
        self.require_token()?;
        if self.inbound_queue_capacity == 0 {
            return Err(SyncError::Configuration(
                "inbound queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Checks that notes can be posted.
    pub fn validate_posting(&self) -> SyncResult<()> {
        if !(self.post_url.starts_with("http://") || self.post_url.starts_with("https://")) {
            return Err(SyncError::Configuration(format!(
                "post URL must use http:// or https://, got {:?}",
                self.post_url
            )));
        }
        self.require_token().map(|_| ())
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("ws_url", &self.ws_url)
            .field("post_url", &self.post_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("channel", &self.channel)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("inbound_queue_capacity", &self.inbound_queue_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_derived_from_endpoint() {
        let config = SyncConfig::new("https://notes.example.com/");
        assert_eq!(config.ws_url, "wss://notes.example.com/ws");
        assert_eq!(config.post_url, "https://notes.example.com/api/notes");

        let config = SyncConfig::new("http://localhost:8080");
        assert_eq!(config.ws_url, "ws://localhost:8080/ws");
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::new("https://h");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.inbound_queue_capacity, 64);
        assert_eq!(config.channel, "default");
    }

    #[test]
    fn missing_token_or_endpoint_refused() {
        let err = SyncConfig::new("https://h").validate().unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(!err.is_retryable());

        let err = SyncConfig::new("").with_token("t").validate().unwrap_err();
        assert!(err.to_string().contains("endpoint"));

        assert!(SyncConfig::new("https://h").with_token("t").validate().is_ok());
        assert!(SyncConfig::new("https://h")
            .with_token("t")
            .validate_posting()
            .is_ok());
    }

    #[test]
    fn debug_redacts_token() {
        let config = SyncConfig::new("https://h").with_token("secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }
}
