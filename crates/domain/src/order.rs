//! Order entity owned by the order participant.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::command::CreateOrder;
use crate::error::DomainError;

/// Local lifecycle of an order.
///
/// ```text
/// PENDING ──┬──► CONFIRMED ──► CANCELLED
///           ├──► CANCELLED
///           └──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    pub saga_id: SagaId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order from the CreateOrder command.
    pub fn create(command: &CreateOrder) -> Self {
        let now = Utc::now();
        Self {
            order_id: command.order_id,
            saga_id: command.saga_id,
            customer_id: command.customer_id.clone(),
            product_id: command.product_id.clone(),
            quantity: command.quantity,
            total_amount: command.total_amount,
            status: OrderStatus::Pending,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn confirm(&mut self) -> Result<(), DomainError> {
        if !self.status.can_confirm() {
            return Err(self.invalid("confirm"));
        }
        self.status = OrderStatus::Confirmed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if !self.status.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(self.invalid("mark failed"));
        }
        self.status = OrderStatus::Failed;
        self.cancellation_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            entity: "order",
            from: self.status.to_string(),
            action,
        }
    }
}
