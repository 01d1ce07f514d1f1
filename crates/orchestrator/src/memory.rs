//! In-memory saga store for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::instance::{SagaInstance, SagaStatus};
use crate::store::{SagaEventLogEntry, SagaStore};

#[derive(Default)]
struct StoreState {
    sagas: HashMap<SagaId, SagaInstance>,
    by_order: HashMap<OrderId, SagaId>,
    event_log: Vec<SagaEventLogEntry>,
}

/// In-memory saga store with the same concurrency semantics as the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sagas.
    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }

    /// Returns the number of audit log entries.
    pub async fn event_log_count(&self) -> usize {
        self.state.read().await.event_log.len()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, saga: &SagaInstance) -> Result<()> {
        let mut state = self.state.write().await;
        if state.by_order.contains_key(&saga.order_id) {
            return Err(SagaError::DuplicateSaga(saga.order_id));
        }
        state.by_order.insert(saga.order_id, saga.id);
        state.sagas.insert(saga.id, saga.clone());
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        Ok(self.state.read().await.sagas.get(&saga_id).cloned())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<SagaInstance>> {
        let state = self.state.read().await;
        Ok(state
            .by_order
            .get(&order_id)
            .and_then(|id| state.sagas.get(id))
            .cloned())
    }

    async fn update(&self, saga: &mut SagaInstance) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .sagas
            .get_mut(&saga.id)
            .ok_or(SagaError::SagaNotFound(saga.id))?;

        if stored.version != saga.version {
            return Err(SagaError::ConcurrencyConflict {
                saga_id: saga.id,
                expected: saga.version,
            });
        }

        saga.version += 1;
        *stored = saga.clone();
        Ok(())
    }

    async fn find_incomplete(&self) -> Result<Vec<SagaInstance>> {
        let state = self.state.read().await;
        let mut incomplete: Vec<SagaInstance> = state
            .sagas
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SagaStatus::Started | SagaStatus::InProgress | SagaStatus::Compensating
                )
            })
            .cloned()
            .collect();
        incomplete.sort_by_key(|s| s.created_at);
        Ok(incomplete)
    }

    async fn append_event_log(&self, entry: &SagaEventLogEntry) -> Result<()> {
        self.state.write().await.event_log.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CustomerId, Money, ProductId};
    use domain::{Order, OrderItem, ShippingAddress};

    fn saga() -> SagaInstance {
        let order = Order::new(
            CustomerId::new(),
            vec![OrderItem::new(ProductId::new(), 1, Money::from_cents(100))],
            ShippingAddress {
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                zip_code: "62701".to_string(),
                country: "US".to_string(),
            },
        )
        .unwrap();
        SagaInstance::start(SagaId::new(), &order)
    }

    #[tokio::test]
    async fn create_and_load_by_id_and_order() {
        let store = InMemorySagaStore::new();
        let saga = saga();
        store.create(&saga).await.unwrap();

        let by_id = store.get(saga.id).await.unwrap().unwrap();
        assert_eq!(by_id.order_id, saga.order_id);

        let by_order = store.get_by_order(saga.order_id).await.unwrap().unwrap();
        assert_eq!(by_order.id, saga.id);
    }

    #[tokio::test]
    async fn second_saga_for_same_order_is_rejected() {
        let store = InMemorySagaStore::new();
        let saga = saga();
        store.create(&saga).await.unwrap();

        let mut dup = saga.clone();
        dup.id = SagaId::new();
        let result = store.create(&dup).await;
        assert!(matches!(result, Err(SagaError::DuplicateSaga(_))));
        assert_eq!(store.saga_count().await, 1);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let store = InMemorySagaStore::new();
        let mut saga = saga();
        store.create(&saga).await.unwrap();

        saga.begin_compensation("boom");
        store.update(&mut saga).await.unwrap();
        assert_eq!(saga.version, 1);

        let stored = store.get(saga.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SagaStatus::Compensating);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = InMemorySagaStore::new();
        let mut saga = saga();
        store.create(&saga).await.unwrap();

        let mut stale = saga.clone();
        store.update(&mut saga).await.unwrap();

        stale.begin_compensation("late");
        let result = store.update(&mut stale).await;
        assert!(matches!(result, Err(SagaError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn find_incomplete_skips_terminal_sagas() {
        let store = InMemorySagaStore::new();

        let mut open = saga();
        store.create(&open).await.unwrap();

        let mut done = saga();
        store.create(&done).await.unwrap();
        done.complete();
        store.update(&mut done).await.unwrap();

        open.begin_compensation("failed");
        store.update(&mut open).await.unwrap();

        let incomplete = store.find_incomplete().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, open.id);
    }

    #[tokio::test]
    async fn event_log_appends() {
        let store = InMemorySagaStore::new();
        let entry = SagaEventLogEntry {
            id: uuid::Uuid::new_v4(),
            saga_id: SagaId::new(),
            event_type: "payment.processed".to_string(),
            event_data: serde_json::json!({}),
            service_name: "payment-service".to_string(),
            timestamp: chrono::Utc::now(),
            correlation_id: uuid::Uuid::new_v4(),
        };
        store.append_event_log(&entry).await.unwrap();
        store.append_event_log(&entry).await.unwrap();
        assert_eq!(store.event_log_count().await, 2);
    }
}
