//! Payment participant: charges and refunds against an external gateway.
//!
//! Consumes `payment.process` and `payment.refund` commands. Owns exactly one
//! payment record per order; duplicate commands collide on that uniqueness
//! and re-emit the terminal event matching the persisted status.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::PaymentServiceError;
pub use gateway::{
    ChargeRequest, ChargeResponse, GatewayError, PaymentGateway, PaymentStatusResponse,
    RefundRequest, RefundResponse, SimulatedGateway,
};
pub use memory::InMemoryPaymentStore;
pub use postgres::PostgresPaymentStore;
pub use service::PaymentService;
pub use store::PaymentStore;
