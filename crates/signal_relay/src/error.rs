//! Relay error types.

use thiserror::Error;

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream (NATS) error.
    #[error("Upstream error: {0}")]
    Upstream(#[from] anyhow::Error),

    /// Binary payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] common::DecodeError),

    /// Price has no JSON number form (NaN or infinite).
    #[error("Price {0} cannot be rendered as JSON")]
    NonFinitePrice(f64),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket / listener error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The connection's outbound queue is closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
