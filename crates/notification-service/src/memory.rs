//! In-memory notification store for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Notification;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::store::NotificationStore;

/// In-memory notification store.
#[derive(Clone, Default)]
pub struct InMemoryNotificationStore {
    state: Arc<RwLock<HashMap<Uuid, Notification>>>,
}

impl InMemoryNotificationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of notification rows.
    pub async fn notification_count(&self) -> usize {
        self.state.read().await.len()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.state
            .write()
            .await
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn update(&self, notification: &Notification) -> Result<()> {
        self.state
            .write()
            .await
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut notifications: Vec<Notification> = state
            .values()
            .filter(|n| n.order_id == order_id)
            .cloned()
            .collect();
        notifications.sort_by_key(|n| n.created_at);
        Ok(notifications)
    }

    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Notification>> {
        let state = self.state.read().await;
        Ok(state.values().find(|n| n.saga_id == saga_id).cloned())
    }
}
