//! Forward and compensation steps of the order saga.

use serde::{Deserialize, Serialize};

use domain::StatusParseError;

/// A forward step of the saga, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardStep {
    OrderCreated,
    PaymentProcessed,
    InventoryReserved,
    ShippingCreated,
    NotificationSent,
}

impl ForwardStep {
    /// The full forward chain in execution order.
    pub const CHAIN: [ForwardStep; 5] = [
        ForwardStep::OrderCreated,
        ForwardStep::PaymentProcessed,
        ForwardStep::InventoryReserved,
        ForwardStep::ShippingCreated,
        ForwardStep::NotificationSent,
    ];

    /// Returns the step name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardStep::OrderCreated => "order_created",
            ForwardStep::PaymentProcessed => "payment_processed",
            ForwardStep::InventoryReserved => "inventory_reserved",
            ForwardStep::ShippingCreated => "shipping_created",
            ForwardStep::NotificationSent => "notification_sent",
        }
    }

    /// Returns the step that follows this one in the forward chain.
    pub fn next(&self) -> Option<ForwardStep> {
        match self {
            ForwardStep::OrderCreated => Some(ForwardStep::PaymentProcessed),
            ForwardStep::PaymentProcessed => Some(ForwardStep::InventoryReserved),
            ForwardStep::InventoryReserved => Some(ForwardStep::ShippingCreated),
            ForwardStep::ShippingCreated => Some(ForwardStep::NotificationSent),
            ForwardStep::NotificationSent => None,
        }
    }

    /// Returns the compensation that reverses this step.
    ///
    /// `notification_sent` has no compensation: notifications are
    /// non-transactional side effects.
    pub fn compensation(&self) -> Option<CompensationStep> {
        match self {
            ForwardStep::OrderCreated => Some(CompensationStep::OrderCancelled),
            ForwardStep::PaymentProcessed => Some(CompensationStep::PaymentRefunded),
            ForwardStep::InventoryReserved => Some(CompensationStep::InventoryReleased),
            ForwardStep::ShippingCreated => Some(CompensationStep::ShippingCancelled),
            ForwardStep::NotificationSent => None,
        }
    }
}

impl std::fmt::Display for ForwardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ForwardStep {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_created" => Ok(ForwardStep::OrderCreated),
            "payment_processed" => Ok(ForwardStep::PaymentProcessed),
            "inventory_reserved" => Ok(ForwardStep::InventoryReserved),
            "shipping_created" => Ok(ForwardStep::ShippingCreated),
            "notification_sent" => Ok(ForwardStep::NotificationSent),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A compensation step, named after the state it leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStep {
    ShippingCancelled,
    InventoryReleased,
    PaymentRefunded,
    OrderCancelled,
}

impl CompensationStep {
    /// Returns the step name as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationStep::ShippingCancelled => "shipping_cancelled",
            CompensationStep::InventoryReleased => "inventory_released",
            CompensationStep::PaymentRefunded => "payment_refunded",
            CompensationStep::OrderCancelled => "order_cancelled",
        }
    }
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CompensationStep {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shipping_cancelled" => Ok(CompensationStep::ShippingCancelled),
            "inventory_released" => Ok(CompensationStep::InventoryReleased),
            "payment_refunded" => Ok(CompensationStep::PaymentRefunded),
            "order_cancelled" => Ok(CompensationStep::OrderCancelled),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_chain_is_linked() {
        let mut step = ForwardStep::OrderCreated;
        let mut seen = vec![step];
        while let Some(next) = step.next() {
            seen.push(next);
            step = next;
        }
        assert_eq!(seen, ForwardStep::CHAIN);
    }

    #[test]
    fn every_step_but_notification_has_a_compensation() {
        assert_eq!(
            ForwardStep::OrderCreated.compensation(),
            Some(CompensationStep::OrderCancelled)
        );
        assert_eq!(
            ForwardStep::PaymentProcessed.compensation(),
            Some(CompensationStep::PaymentRefunded)
        );
        assert_eq!(
            ForwardStep::InventoryReserved.compensation(),
            Some(CompensationStep::InventoryReleased)
        );
        assert_eq!(
            ForwardStep::ShippingCreated.compensation(),
            Some(CompensationStep::ShippingCancelled)
        );
        assert_eq!(ForwardStep::NotificationSent.compensation(), None);
    }

    #[test]
    fn step_names_round_trip() {
        for step in ForwardStep::CHAIN {
            assert_eq!(step.as_str().parse::<ForwardStep>().unwrap(), step);
        }
        for comp in [
            CompensationStep::ShippingCancelled,
            CompensationStep::InventoryReleased,
            CompensationStep::PaymentRefunded,
            CompensationStep::OrderCancelled,
        ] {
            assert_eq!(comp.as_str().parse::<CompensationStep>().unwrap(), comp);
        }
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ForwardStep::PaymentProcessed).unwrap();
        assert_eq!(json, "\"payment_processed\"");
        let json = serde_json::to_string(&CompensationStep::InventoryReleased).unwrap();
        assert_eq!(json, "\"inventory_released\"");
    }
}
