//! In-memory inventory store for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId, SagaId};
use domain::{InventoryReservation, Product};
use messaging::payloads::ReserveItem;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{InventoryServiceError, Result};
use crate::store::InventoryStore;

#[derive(Default)]
struct StoreState {
    products: HashMap<ProductId, Product>,
    reservations: HashMap<Uuid, InventoryReservation>,
}

/// In-memory inventory store. One write lock serializes all stock mutations,
/// mirroring the row-lock discipline of the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of reservation rows.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn reserve_items(
        &self,
        order_id: OrderId,
        saga_id: SagaId,
        items: &[ReserveItem],
    ) -> Result<Vec<InventoryReservation>> {
        let mut state = self.state.write().await;

        // Stage every mutation on copies; commit only if the whole order fits.
        let mut staged: HashMap<ProductId, Product> = HashMap::new();
        for item in items {
            if item.quantity == 0 {
                return Err(InventoryServiceError::ZeroQuantity(item.product_id));
            }
            let product = match staged.get(&item.product_id) {
                Some(p) => p.clone(),
                None => state
                    .products
                    .get(&item.product_id)
                    .cloned()
                    .ok_or(InventoryServiceError::ProductNotFound(item.product_id))?,
            };
            let mut product = product;
            let available = product.available();
            product.reserve(item.quantity).map_err(|_| {
                InventoryServiceError::InsufficientStock {
                    product_id: item.product_id,
                    available,
                    requested: item.quantity,
                }
            })?;
            staged.insert(item.product_id, product);
        }

        for (id, product) in staged {
            state.products.insert(id, product);
        }

        let reservations: Vec<InventoryReservation> = items
            .iter()
            .map(|item| {
                InventoryReservation::new(order_id, item.product_id, saga_id, item.quantity)
            })
            .collect();
        for reservation in &reservations {
            state.reservations.insert(reservation.id, reservation.clone());
        }
        Ok(reservations)
    }

    async fn reservations_by_saga(&self, saga_id: SagaId) -> Result<Vec<InventoryReservation>> {
        let state = self.state.read().await;
        let mut reservations: Vec<InventoryReservation> = state
            .reservations
            .values()
            .filter(|r| r.saga_id == saga_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.reserved_at);
        Ok(reservations)
    }

    async fn release_by_saga(&self, saga_id: SagaId) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let ids: Vec<Uuid> = state
            .reservations
            .values()
            .filter(|r| r.saga_id == saga_id && r.is_active())
            .map(|r| r.id)
            .collect();

        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            let (product_id, quantity) = match state.reservations.get_mut(&id) {
                Some(reservation) => {
                    reservation.release();
                    (reservation.product_id, reservation.quantity)
                }
                None => continue,
            };
            if let Some(product) = state.products.get_mut(&product_id) {
                product.release(quantity);
            }
            released.push(id);
        }
        Ok(released)
    }

    async fn mark_sold_by_saga(&self, saga_id: SagaId) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let ids: Vec<Uuid> = state
            .reservations
            .values()
            .filter(|r| r.saga_id == saga_id && r.is_active())
            .map(|r| r.id)
            .collect();

        let mut sold = Vec::with_capacity(ids.len());
        for id in ids {
            let (product_id, quantity) = match state.reservations.get_mut(&id) {
                Some(reservation) => {
                    reservation.mark_sold();
                    (reservation.product_id, reservation.quantity)
                }
                None => continue,
            };
            if let Some(product) = state.products.get_mut(&product_id) {
                product.commit_sale(quantity);
            }
            sold.push(id);
        }
        Ok(sold)
    }
}
