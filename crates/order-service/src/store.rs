//! Order persistence contract.

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use domain::Order;

use crate::error::Result;

/// Storage for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Persists a mutated order.
    async fn update(&self, order: &Order) -> Result<()>;

    /// Loads an order by ID.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads every order placed by a customer, newest first.
    async fn get_by_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;
}
