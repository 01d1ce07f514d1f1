//! Inventory persistence contract.

use async_trait::async_trait;
use common::{OrderId, ProductId, SagaId};
use domain::{InventoryReservation, Product};
use messaging::payloads::ReserveItem;
use uuid::Uuid;

use crate::error::Result;

/// Storage for products and reservations.
///
/// `reserve_items` is the invariant-bearing operation: either every item of
/// the order is reserved, or none is. Implementations serialize concurrent
/// stock mutations (a transaction with row locks in PostgreSQL, a single
/// write lock in memory) so `stock - reserved_stock` can never go negative.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Inserts a product.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    /// Loads a product by ID.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Atomically reserves every item, incrementing each product's
    /// `reserved_stock` and inserting a reservation row per item. Fails
    /// without any effect when any single item cannot be reserved.
    async fn reserve_items(
        &self,
        order_id: OrderId,
        saga_id: SagaId,
        items: &[ReserveItem],
    ) -> Result<Vec<InventoryReservation>>;

    /// Loads the reservations created by a saga.
    async fn reservations_by_saga(&self, saga_id: SagaId) -> Result<Vec<InventoryReservation>>;

    /// Releases every reservation of the saga that is still `reserved`,
    /// returning the stock to each product. Returns the affected reservation
    /// IDs; already-released reservations are skipped, making the operation
    /// idempotent.
    async fn release_by_saga(&self, saga_id: SagaId) -> Result<Vec<Uuid>>;

    /// Marks every still-`reserved` reservation of the saga as `sold`,
    /// consuming the physical stock. Returns the affected reservation IDs.
    async fn mark_sold_by_saga(&self, saga_id: SagaId) -> Result<Vec<Uuid>>;
}
