//! In-memory shipment store for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Shipment;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, ShippingServiceError};
use crate::store::ShipmentStore;

#[derive(Default)]
struct StoreState {
    shipments: HashMap<Uuid, Shipment>,
    by_order: HashMap<OrderId, Uuid>,
}

/// In-memory shipment store enforcing the per-order uniqueness constraint.
#[derive(Clone, Default)]
pub struct InMemoryShipmentStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryShipmentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of shipment rows.
    pub async fn shipment_count(&self) -> usize {
        self.state.read().await.shipments.len()
    }
}

#[async_trait]
impl ShipmentStore for InMemoryShipmentStore {
    async fn insert(&self, shipment: &Shipment) -> Result<()> {
        let mut state = self.state.write().await;
        if state.by_order.contains_key(&shipment.order_id) {
            return Err(ShippingServiceError::DuplicateOrder(shipment.order_id));
        }
        state.by_order.insert(shipment.order_id, shipment.id);
        state.shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }

    async fn update(&self, shipment: &Shipment) -> Result<()> {
        let mut state = self.state.write().await;
        state.shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Shipment>> {
        Ok(self.state.read().await.shipments.get(&id).cloned())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Shipment>> {
        let state = self.state.read().await;
        Ok(state
            .by_order
            .get(&order_id)
            .and_then(|id| state.shipments.get(id))
            .cloned())
    }

    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Shipment>> {
        let state = self.state.read().await;
        Ok(state
            .shipments
            .values()
            .find(|s| s.saga_id == saga_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CustomerId;
    use domain::ShippingAddress;

    fn shipment() -> Shipment {
        Shipment::new(
            OrderId::new(),
            CustomerId::new(),
            SagaId::new(),
            ShippingAddress {
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                zip_code: "62701".to_string(),
                country: "US".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let store = InMemoryShipmentStore::new();
        let shipment = shipment();
        store.insert(&shipment).await.unwrap();

        assert!(store.get(shipment.id).await.unwrap().is_some());
        assert!(store.get_by_order(shipment.order_id).await.unwrap().is_some());
        assert!(store.get_by_saga(shipment.saga_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_shipment_for_order_collides() {
        let store = InMemoryShipmentStore::new();
        let shipment = shipment();
        store.insert(&shipment).await.unwrap();

        let mut dup = shipment.clone();
        dup.id = Uuid::new_v4();
        assert!(matches!(
            store.insert(&dup).await,
            Err(ShippingServiceError::DuplicateOrder(_))
        ));
        assert_eq!(store.shipment_count().await, 1);
    }
}
