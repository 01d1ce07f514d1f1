//! Messaging error types.

use thiserror::Error;

/// Errors raised by the messaging fabric.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker connection has been closed.
    #[error("broker is closed")]
    Closed,

    /// Publishing failed after exhausting the retry budget.
    #[error("publish failed after {attempts} attempts: {reason}")]
    Publish { attempts: u32, reason: String },

    /// Queue subscription could not be established.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Envelope could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
