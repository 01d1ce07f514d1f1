//! Shipment persistence contract.

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Shipment;
use uuid::Uuid;

use crate::error::Result;

/// Storage for shipments.
///
/// `insert` enforces at-most-one shipment per order; duplicate
/// `shipping.create` commands collide there and replay the persisted state.
#[async_trait]
pub trait ShipmentStore: Send + Sync {
    /// Inserts a new shipment. Fails with `DuplicateOrder` on an existing
    /// `order_id`.
    async fn insert(&self, shipment: &Shipment) -> Result<()>;

    /// Persists a mutated shipment.
    async fn update(&self, shipment: &Shipment) -> Result<()>;

    /// Loads a shipment by its ID.
    async fn get(&self, id: Uuid) -> Result<Option<Shipment>>;

    /// Loads the shipment for an order.
    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Shipment>>;

    /// Loads the shipment created by a saga.
    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Shipment>>;
}
