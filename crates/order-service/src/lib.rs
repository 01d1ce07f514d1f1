//! Order participant: creates the order record, starts the saga by emitting
//! `order.created`, and finalizes the order on the terminal
//! `order.completed` / `order.cancelled` events.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::OrderServiceError;
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use service::{CreateOrderRequest, OrderService};
pub use store::OrderStore;
