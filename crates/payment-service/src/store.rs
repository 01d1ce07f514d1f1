//! Payment persistence contract.

use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::Payment;
use uuid::Uuid;

use crate::error::Result;

/// Storage for payment records.
///
/// `insert` enforces at-most-one payment per order: a second insert for the
/// same `order_id` fails with `DuplicateOrder`, which is how duplicate
/// `payment.process` commands are detected.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new payment. Fails with `DuplicateOrder` on an existing
    /// `order_id`.
    async fn insert(&self, payment: &Payment) -> Result<()>;

    /// Persists a mutated payment.
    async fn update(&self, payment: &Payment) -> Result<()>;

    /// Loads a payment by its ID.
    async fn get(&self, id: Uuid) -> Result<Option<Payment>>;

    /// Loads the payment for an order.
    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Loads the payment created by a saga.
    async fn get_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>>;
}
