//! Message type tags carried in the envelope `eventType` field and the outbox.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Tag identifying the schema of a command or event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Commands
    CreateOrder,
    CancelOrder,
    ProcessPayment,
    CancelPayment,
    ReserveInventory,
    ReleaseInventory,

    // Events
    OrderCreated,
    OrderCancelled,
    PaymentCompleted,
    PaymentFailed,
    PaymentCancelled,
    InventoryReserved,
    InventoryFailed,
    InventoryReleased,

    // Domain topics
    ProductRegistered,
}

impl MessageType {
    pub const ALL: [MessageType; 15] = [
        MessageType::CreateOrder,
        MessageType::CancelOrder,
        MessageType::ProcessPayment,
        MessageType::CancelPayment,
        MessageType::ReserveInventory,
        MessageType::ReleaseInventory,
        MessageType::OrderCreated,
        MessageType::OrderCancelled,
        MessageType::PaymentCompleted,
        MessageType::PaymentFailed,
        MessageType::PaymentCancelled,
        MessageType::InventoryReserved,
        MessageType::InventoryFailed,
        MessageType::InventoryReleased,
        MessageType::ProductRegistered,
    ];

    /// Returns true for tags published on the saga command topic.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            MessageType::CreateOrder
                | MessageType::CancelOrder
                | MessageType::ProcessPayment
                | MessageType::CancelPayment
                | MessageType::ReserveInventory
                | MessageType::ReleaseInventory
        )
    }

    /// Returns true for tags published on the saga event topic.
    pub fn is_saga_event(&self) -> bool {
        !self.is_command() && *self != MessageType::ProductRegistered
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::CreateOrder => "CREATE_ORDER",
            MessageType::CancelOrder => "CANCEL_ORDER",
            MessageType::ProcessPayment => "PROCESS_PAYMENT",
            MessageType::CancelPayment => "CANCEL_PAYMENT",
            MessageType::ReserveInventory => "RESERVE_INVENTORY",
            MessageType::ReleaseInventory => "RELEASE_INVENTORY",
            MessageType::OrderCreated => "ORDER_CREATED",
            MessageType::OrderCancelled => "ORDER_CANCELLED",
            MessageType::PaymentCompleted => "PAYMENT_COMPLETED",
            MessageType::PaymentFailed => "PAYMENT_FAILED",
            MessageType::PaymentCancelled => "PAYMENT_CANCELLED",
            MessageType::InventoryReserved => "INVENTORY_RESERVED",
            MessageType::InventoryFailed => "INVENTORY_FAILED",
            MessageType::InventoryReleased => "INVENTORY_RELEASED",
            MessageType::ProductRegistered => "PRODUCT_REGISTERED",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "message type",
                value: s.to_string(),
            })
    }
}
