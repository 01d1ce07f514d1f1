//! Notification service error types.

use thiserror::Error;

/// Errors raised while handling notification commands.
#[derive(Debug, Error)]
pub enum NotificationServiceError {
    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a notification.
    #[error("corrupt notification row: {0}")]
    CorruptRow(String),

    /// Payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker failure while emitting a reply.
    #[error("messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),
}

/// Result type for notification service operations.
pub type Result<T> = std::result::Result<T, NotificationServiceError>;
