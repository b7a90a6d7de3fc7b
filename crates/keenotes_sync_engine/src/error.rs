//! Error types for the sync engine.

use keenotes_crypto::CryptoError;
use keenotes_storage::StorageError;
use keenotes_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync and posting.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid endpoint, token or password. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed envelope or input: wrong length, bad base64, unsupported
    /// version.
    #[error("format error: {0}")]
    Format(String),

    /// Envelope failed authentication or key derivation.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server reported a failure.
    #[error("server error: {0}")]
    ServerError(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The client was shut down.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        if err.is_format_error() {
            SyncError::Format(err.to_string())
        } else {
            SyncError::Crypto(err)
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Url(e) => SyncError::Configuration(format!("invalid sync URL: {e}")),
            WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
                SyncError::AuthenticationFailed(format!("handshake rejected: {}", response.status()))
            }
            other => SyncError::transport_retryable(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_builder() {
            SyncError::Configuration(err.to_string())
        } else {
            SyncError::transport_retryable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Configuration("no token".into()).is_retryable());
    }

    #[test]
    fn crypto_errors_split_into_format_and_integrity() {
        let err: SyncError = CryptoError::UnsupportedVersion { found: 1 }.into();
        assert!(matches!(err, SyncError::Format(_)));
        assert!(err.to_string().contains("re-encrypt required"));

        let err: SyncError = CryptoError::Integrity.into();
        assert!(matches!(err, SyncError::Crypto(CryptoError::Integrity)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
    }
}
