//! Saga status.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of a saga instance.
///
/// State transitions:
/// ```text
/// STARTED ──► ORDER_PENDING ──► ORDER_CREATED ──► PAYMENT_PENDING ──► PAYMENT_COMPLETED
///                  │                                   │                     │
///                  ▼                                   │                     ▼
///               FAILED                                 │             INVENTORY_PENDING ──► COMPLETED
///                                                      ▼                     │
///                                                COMPENSATING ◄──────────────┘
///                                                      │
///                                                      ▼
///                                                 COMPENSATED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Implicit state before the saga row exists.
    #[default]
    Started,

    /// CreateOrder has been enqueued.
    OrderPending,

    /// The order participant reported the order as created.
    OrderCreated,

    /// ProcessPayment has been enqueued.
    PaymentPending,

    /// The payment participant reported a successful charge.
    PaymentCompleted,

    /// ReserveInventory has been enqueued.
    InventoryPending,

    /// Every forward step succeeded (terminal state).
    Completed,

    /// A step failed and compensating commands are in flight.
    Compensating,

    /// Compensation finished (terminal state).
    Compensated,

    /// The saga failed with nothing to compensate (terminal state).
    Failed,
}

impl SagaStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [SagaStatus; 10] = [
        SagaStatus::Started,
        SagaStatus::OrderPending,
        SagaStatus::OrderCreated,
        SagaStatus::PaymentPending,
        SagaStatus::PaymentCompleted,
        SagaStatus::InventoryPending,
        SagaStatus::Completed,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
        SagaStatus::Failed,
    ];

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// Returns true if a failure reported in this status starts compensation.
    pub fn can_compensate(&self) -> bool {
        !self.is_terminal() && *self != SagaStatus::Compensating
    }

    /// Returns the status name as stored and transmitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::OrderPending => "ORDER_PENDING",
            SagaStatus::OrderCreated => "ORDER_CREATED",
            SagaStatus::PaymentPending => "PAYMENT_PENDING",
            SagaStatus::PaymentCompleted => "PAYMENT_COMPLETED",
            SagaStatus::InventoryPending => "INVENTORY_PENDING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "saga status",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(!SagaStatus::PaymentPending.is_terminal());
    }

    #[test]
    fn test_can_compensate() {
        assert!(SagaStatus::OrderPending.can_compensate());
        assert!(SagaStatus::PaymentPending.can_compensate());
        assert!(SagaStatus::InventoryPending.can_compensate());
        assert!(!SagaStatus::Compensating.can_compensate());
        assert!(!SagaStatus::Completed.can_compensate());
    }

    #[test]
    fn test_parse_round_trips_every_status() {
        for status in SagaStatus::ALL {
            assert_eq!(status.as_str().parse::<SagaStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<SagaStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_screaming_snake_case() {
        let json = serde_json::to_string(&SagaStatus::InventoryPending).unwrap();
        assert_eq!(json, "\"INVENTORY_PENDING\"");
    }
}
