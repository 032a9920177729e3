//! Error handling for the bridge
//!
//! A single consolidated error type covers both transport sides and the
//! record codec. Scan-level failures (`MalformedBuffer`) abort the current
//! poll cycle; per-point failures (`EncodeDecode`, `UnknownType`) are
//! localized to one datapoint and never abort a scan.

use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection establishment errors on either transport
    #[error("Connection error: {0}")]
    Connection(String),

    /// Controller or bus read/write failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Record type code absent from the type registry
    #[error("Unknown record type {0}")]
    UnknownType(i16),

    /// Buffer scan failures: unregistered type tag or truncated record
    #[error("Malformed buffer: {0}")]
    MalformedBuffer(String),

    /// Value outside the expected shape for its type tag
    #[error("Encode/decode error: {0}")]
    EncodeDecode(String),

    /// Outbound queue rejected an item (capacity reached, `Reject` policy)
    #[error("Queue full: {0}")]
    QueueFull(String),
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        BridgeError::Transport(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        BridgeError::MalformedBuffer(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        BridgeError::EncodeDecode(msg.into())
    }

    pub fn not_connected() -> Self {
        BridgeError::Connection("Not connected".to_string())
    }

    /// True for errors the poll scheduler recovers from by retrying the
    /// next cycle; a non-retryable error stops the poll loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection(_) | BridgeError::Transport(_) | BridgeError::MalformedBuffer(_)
        )
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::UnknownType(42);
        assert_eq!(err.to_string(), "Unknown record type 42");

        let err = BridgeError::malformed("record at offset 16 exceeds buffer");
        assert!(err.to_string().contains("Malformed buffer"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BridgeError::transport("read failed").is_retryable());
        assert!(BridgeError::not_connected().is_retryable());
        assert!(!BridgeError::UnknownType(13).is_retryable());
        assert!(!BridgeError::decode("bad payload").is_retryable());
    }
}
