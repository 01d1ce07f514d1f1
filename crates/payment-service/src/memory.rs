//! In-memory payment store for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Payment;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PaymentServiceError, Result};
use crate::store::PaymentStore;

#[derive(Default)]
struct StoreState {
    payments: HashMap<Uuid, Payment>,
    by_order: HashMap<OrderId, Uuid>,
}

/// In-memory payment store enforcing the per-order uniqueness constraint.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of payment rows.
    pub async fn payment_count(&self) -> usize {
        self.state.read().await.payments.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        if state.by_order.contains_key(&payment.order_id) {
            return Err(PaymentServiceError::DuplicateOrder(payment.order_id));
        }
        state.by_order.insert(payment.order_id, payment.id);
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.write().await;
        state.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .by_order
            .get(&order_id)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .find(|p| p.saga_id == saga_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CustomerId, Money};

    fn payment() -> Payment {
        Payment::new(
            OrderId::new(),
            CustomerId::new(),
            SagaId::new(),
            Money::from_cents(1000),
            "credit_card",
        )
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let store = InMemoryPaymentStore::new();
        let payment = payment();
        store.insert(&payment).await.unwrap();

        assert!(store.get(payment.id).await.unwrap().is_some());
        assert!(store.get_by_order(payment.order_id).await.unwrap().is_some());
        assert!(store.get_by_saga(payment.saga_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_payment_for_order_collides() {
        let store = InMemoryPaymentStore::new();
        let payment = payment();
        store.insert(&payment).await.unwrap();

        let mut dup = payment.clone();
        dup.id = Uuid::new_v4();
        let result = store.insert(&dup).await;
        assert!(matches!(
            result,
            Err(PaymentServiceError::DuplicateOrder(_))
        ));
        assert_eq!(store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn update_replaces_row() {
        let store = InMemoryPaymentStore::new();
        let mut payment = payment();
        store.insert(&payment).await.unwrap();

        payment.mark_completed("TXN_1", "REF_1");
        store.update(&payment).await.unwrap();

        let stored = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, domain::PaymentStatus::Completed);
    }
}
