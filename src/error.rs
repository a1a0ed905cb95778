//! Error types for the chatring server

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors produced by the server components
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Client violated the handshake protocol
    #[error("handshake error: {0}")]
    Handshake(String),

    /// A line exceeded the codec's length cap
    #[error("line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    /// TLS setup failure (certificate loading, acceptor construction)
    #[error("tls error: {0}")]
    Tls(String),

    /// Broker connectivity or publish/subscribe failure
    #[error("broker error: {0}")]
    Broker(String),

    /// Underlying socket or file I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure on the wire or the blacklist file
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ChatError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create a TLS error
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a broker error
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::config("bad ring size");
        assert_eq!(err.to_string(), "configuration error: bad ring size");

        let err = ChatError::LineTooLong(1024);
        assert_eq!(err.to_string(), "line exceeds maximum length of 1024 bytes");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: ChatError = io.into();
        assert!(matches!(err, ChatError::Io(_)));
    }
}
