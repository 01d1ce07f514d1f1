//! Shared primitives used by every service crate: typed identifiers,
//! fixed-scale money, and database configuration.

pub mod config;
pub mod ids;
pub mod money;

pub use config::DatabaseConfig;
pub use ids::{CustomerId, OrderId, ProductId, SagaId};
pub use money::Money;
