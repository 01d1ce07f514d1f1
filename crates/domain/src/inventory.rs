//! Products and stock reservations.

use chrono::{DateTime, Duration, Utc};
use common::{Money, OrderId, ProductId, SagaId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InventoryError, StatusParseError};

/// How long a reservation holds stock before it may be expired.
const RESERVATION_TTL_HOURS: i64 = 24;

/// A product with its physical and reserved stock counts.
///
/// Invariant: `reserved_stock <= stock` at all times; the difference is the
/// quantity available to new reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
    pub reserved_stock: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product with the given initial stock and nothing reserved.
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        let now = Utc::now();
        Self {
            id: ProductId::new(),
            name: name.into(),
            price,
            stock,
            reserved_stock: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the quantity available to new reservations.
    pub fn available(&self) -> u32 {
        self.stock - self.reserved_stock
    }

    /// Returns true when `quantity` units can be reserved.
    pub fn can_reserve(&self, quantity: u32) -> bool {
        self.available() >= quantity
    }

    /// Moves `quantity` units from available to reserved.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::ZeroQuantity);
        }
        if !self.can_reserve(quantity) {
            return Err(InventoryError::InsufficientStock {
                available: self.available(),
                requested: quantity,
            });
        }
        self.reserved_stock += quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns `quantity` reserved units to the available pool.
    ///
    /// Never drives `reserved_stock` below zero.
    pub fn release(&mut self, quantity: u32) {
        self.reserved_stock = self.reserved_stock.saturating_sub(quantity);
        self.updated_at = Utc::now();
    }

    /// Removes `quantity` units from both stock and the reservation count,
    /// consuming a reservation that was sold.
    pub fn commit_sale(&mut self, quantity: u32) {
        self.stock = self.stock.saturating_sub(quantity);
        self.reserved_stock = self.reserved_stock.saturating_sub(quantity);
        self.updated_at = Utc::now();
    }
}

/// Lifecycle of a stock reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Available,
    Reserved,
    Released,
    Sold,
}

impl ReservationStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Available => "available",
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Released => "released",
            ReservationStatus::Sold => "sold",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ReservationStatus::Available),
            "reserved" => Ok(ReservationStatus::Reserved),
            "released" => Ok(ReservationStatus::Released),
            "sold" => Ok(ReservationStatus::Sold),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A soft hold on stock for a specific order.
///
/// Created as `reserved`, a reservation ends up `released` (compensation or
/// expiry) or `sold` (order completion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservation {
    pub id: Uuid,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub saga_id: SagaId,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryReservation {
    /// Creates an active reservation expiring after the standard TTL.
    pub fn new(order_id: OrderId, product_id: ProductId, saga_id: SagaId, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id,
            saga_id,
            quantity,
            status: ReservationStatus::Reserved,
            reserved_at: now,
            expires_at: now + Duration::hours(RESERVATION_TTL_HOURS),
            updated_at: now,
        }
    }

    /// Marks the reservation as released back to stock.
    pub fn release(&mut self) {
        self.status = ReservationStatus::Released;
        self.updated_at = Utc::now();
    }

    /// Marks the reservation as consumed by a completed order.
    pub fn mark_sold(&mut self) {
        self.status = ReservationStatus::Sold;
        self.updated_at = Utc::now();
    }

    /// Returns true while the reservation is holding stock.
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }
}
