//! Notification participant: sends customer notifications.
//!
//! Consumes `notification.send`. Notifications are fire-and-log: a failure is
//! reported but never compensated, and the saga completes regardless.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::NotificationServiceError;
pub use memory::InMemoryNotificationStore;
pub use postgres::PostgresNotificationStore;
pub use service::NotificationService;
pub use store::NotificationStore;
