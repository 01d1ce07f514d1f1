//! Notification persistence contract.

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Notification;

use crate::error::Result;

/// Storage for notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts a new notification.
    async fn insert(&self, notification: &Notification) -> Result<()>;

    /// Persists a mutated notification.
    async fn update(&self, notification: &Notification) -> Result<()>;

    /// Loads every notification created for an order.
    async fn get_by_order(&self, order_id: OrderId) -> Result<Vec<Notification>>;

    /// Loads the notification created by a saga, if any.
    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Notification>>;
}
