//! Events reported by the participants back to the orchestrator.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, PaymentId, ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::message::MessageType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: Money,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCancelled {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserved {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Reservation was refused. `available_quantity` is what the participant saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryFailed {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub requested_quantity: u32,
    pub available_quantity: u32,
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReleased {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Every event published on the saga event topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaEvent {
    OrderCreated(OrderCreated),
    OrderCancelled(OrderCancelled),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
    PaymentCancelled(PaymentCancelled),
    InventoryReserved(InventoryReserved),
    InventoryFailed(InventoryFailed),
    InventoryReleased(InventoryReleased),
}

impl SagaEvent {
    pub fn message_type(&self) -> MessageType {
        match self {
            SagaEvent::OrderCreated(_) => MessageType::OrderCreated,
            SagaEvent::OrderCancelled(_) => MessageType::OrderCancelled,
            SagaEvent::PaymentCompleted(_) => MessageType::PaymentCompleted,
            SagaEvent::PaymentFailed(_) => MessageType::PaymentFailed,
            SagaEvent::PaymentCancelled(_) => MessageType::PaymentCancelled,
            SagaEvent::InventoryReserved(_) => MessageType::InventoryReserved,
            SagaEvent::InventoryFailed(_) => MessageType::InventoryFailed,
            SagaEvent::InventoryReleased(_) => MessageType::InventoryReleased,
        }
    }

    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaEvent::OrderCreated(e) => e.saga_id,
            SagaEvent::OrderCancelled(e) => e.saga_id,
            SagaEvent::PaymentCompleted(e) => e.saga_id,
            SagaEvent::PaymentFailed(e) => e.saga_id,
            SagaEvent::PaymentCancelled(e) => e.saga_id,
            SagaEvent::InventoryReserved(e) => e.saga_id,
            SagaEvent::InventoryFailed(e) => e.saga_id,
            SagaEvent::InventoryReleased(e) => e.saga_id,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            SagaEvent::OrderCreated(e) => e.order_id,
            SagaEvent::OrderCancelled(e) => e.order_id,
            SagaEvent::PaymentCompleted(e) => e.order_id,
            SagaEvent::PaymentFailed(e) => e.order_id,
            SagaEvent::PaymentCancelled(e) => e.order_id,
            SagaEvent::InventoryReserved(e) => e.order_id,
            SagaEvent::InventoryFailed(e) => e.order_id,
            SagaEvent::InventoryReleased(e) => e.order_id,
        }
    }

    /// Returns the failure reason for PaymentFailed and InventoryFailed.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            SagaEvent::PaymentFailed(e) => Some(&e.reason),
            SagaEvent::InventoryFailed(e) => Some(&e.reason),
            _ => None,
        }
    }

    /// Serializes the event body without its tag.
    pub fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        let value = match self {
            SagaEvent::OrderCreated(e) => serde_json::to_value(e)?,
            SagaEvent::OrderCancelled(e) => serde_json::to_value(e)?,
            SagaEvent::PaymentCompleted(e) => serde_json::to_value(e)?,
            SagaEvent::PaymentFailed(e) => serde_json::to_value(e)?,
            SagaEvent::PaymentCancelled(e) => serde_json::to_value(e)?,
            SagaEvent::InventoryReserved(e) => serde_json::to_value(e)?,
            SagaEvent::InventoryFailed(e) => serde_json::to_value(e)?,
            SagaEvent::InventoryReleased(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }

    /// Decodes an event body for the given tag.
    pub fn from_payload(
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        let event = match message_type {
            MessageType::OrderCreated => SagaEvent::OrderCreated(serde_json::from_value(payload)?),
            MessageType::OrderCancelled => {
                SagaEvent::OrderCancelled(serde_json::from_value(payload)?)
            }
            MessageType::PaymentCompleted => {
                SagaEvent::PaymentCompleted(serde_json::from_value(payload)?)
            }
            MessageType::PaymentFailed => SagaEvent::PaymentFailed(serde_json::from_value(payload)?),
            MessageType::PaymentCancelled => {
                SagaEvent::PaymentCancelled(serde_json::from_value(payload)?)
            }
            MessageType::InventoryReserved => {
                SagaEvent::InventoryReserved(serde_json::from_value(payload)?)
            }
            MessageType::InventoryFailed => {
                SagaEvent::InventoryFailed(serde_json::from_value(payload)?)
            }
            MessageType::InventoryReleased => {
                SagaEvent::InventoryReleased(serde_json::from_value(payload)?)
            }
            other => {
                return Err(DomainError::UnexpectedMessageType {
                    expected: "saga event",
                    actual: other,
                });
            }
        };
        Ok(event)
    }
}
