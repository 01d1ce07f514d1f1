//! Shipments with tracking identifiers.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, SagaId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ShippingError, StatusParseError};
use crate::order::ShippingAddress;

/// Lifecycle of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::Preparing => "preparing",
            ShipmentStatus::Shipped => "shipped",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShipmentStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShipmentStatus::Pending),
            "preparing" => Ok(ShipmentStatus::Preparing),
            "shipped" => Ok(ShipmentStatus::Shipped),
            "delivered" => Ok(ShipmentStatus::Delivered),
            "cancelled" => Ok(ShipmentStatus::Cancelled),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A shipment owned by the shipping service. One per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub saga_id: SagaId,
    pub status: ShipmentStatus,
    pub tracking_id: String,
    pub address: ShippingAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Creates a shipment in `preparing` with a fresh tracking identifier.
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        saga_id: SagaId,
        address: ShippingAddress,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            customer_id,
            saga_id,
            status: ShipmentStatus::Preparing,
            tracking_id: generate_tracking_id(),
            address,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true while the shipment has not left the warehouse.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            ShipmentStatus::Pending | ShipmentStatus::Preparing
        )
    }

    /// Cancels the shipment, recording the reason.
    ///
    /// Only allowed from `pending` or `preparing`.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), ShippingError> {
        if !self.can_cancel() {
            return Err(ShippingError::CancelNotAllowed(self.status.to_string()));
        }
        self.status = ShipmentStatus::Cancelled;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }
}

fn generate_tracking_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("TRK_{}", &suffix[..12].to_uppercase())
}
