//! Entity model shared across the saga participants.
//!
//! Each participant exclusively owns its table(s); the structs here are the
//! rows those tables hold plus the state transitions each participant is
//! allowed to make. There are no cross-service foreign keys — the only
//! channel of cross-service state change is the event bus.

pub mod error;
pub mod inventory;
pub mod notification;
pub mod order;
pub mod payment;
pub mod shipping;

pub use error::{InventoryError, OrderError, PaymentError, ShippingError, StatusParseError};
pub use inventory::{InventoryReservation, Product, ReservationStatus};
pub use notification::{Notification, NotificationStatus, NotificationType};
pub use order::{Order, OrderItem, OrderStatus, ShippingAddress};
pub use payment::{Payment, PaymentStatus};
pub use shipping::{Shipment, ShipmentStatus};
