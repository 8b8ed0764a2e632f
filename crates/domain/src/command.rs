//! Commands sent by the orchestrator to the participants.

use common::{CustomerId, Money, OrderId, PaymentId, ProductId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::message::MessageType;

/// Ask the order participant to create the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
}

/// Ask the order participant to cancel the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrder {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub reason: String,
}

/// Ask the payment participant to charge the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayment {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
}

/// Ask the payment participant to refund and cancel a completed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayment {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub reason: String,
}

/// Ask the inventory participant to reserve stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveInventory {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Ask the inventory participant to give reserved stock back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInventory {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub reason: String,
}

/// Every command published on the saga command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaCommand {
    CreateOrder(CreateOrder),
    CancelOrder(CancelOrder),
    ProcessPayment(ProcessPayment),
    CancelPayment(CancelPayment),
    ReserveInventory(ReserveInventory),
    ReleaseInventory(ReleaseInventory),
}

impl SagaCommand {
    /// Tag written to the outbox row and the envelope.
    pub fn message_type(&self) -> MessageType {
        match self {
            SagaCommand::CreateOrder(_) => MessageType::CreateOrder,
            SagaCommand::CancelOrder(_) => MessageType::CancelOrder,
            SagaCommand::ProcessPayment(_) => MessageType::ProcessPayment,
            SagaCommand::CancelPayment(_) => MessageType::CancelPayment,
            SagaCommand::ReserveInventory(_) => MessageType::ReserveInventory,
            SagaCommand::ReleaseInventory(_) => MessageType::ReleaseInventory,
        }
    }

    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaCommand::CreateOrder(c) => c.saga_id,
            SagaCommand::CancelOrder(c) => c.saga_id,
            SagaCommand::ProcessPayment(c) => c.saga_id,
            SagaCommand::CancelPayment(c) => c.saga_id,
            SagaCommand::ReserveInventory(c) => c.saga_id,
            SagaCommand::ReleaseInventory(c) => c.saga_id,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            SagaCommand::CreateOrder(c) => c.order_id,
            SagaCommand::CancelOrder(c) => c.order_id,
            SagaCommand::ProcessPayment(c) => c.order_id,
            SagaCommand::CancelPayment(c) => c.order_id,
            SagaCommand::ReserveInventory(c) => c.order_id,
            SagaCommand::ReleaseInventory(c) => c.order_id,
        }
    }

    /// Serializes the command body without its tag.
    pub fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        let value = match self {
            SagaCommand::CreateOrder(c) => serde_json::to_value(c)?,
            SagaCommand::CancelOrder(c) => serde_json::to_value(c)?,
            SagaCommand::ProcessPayment(c) => serde_json::to_value(c)?,
            SagaCommand::CancelPayment(c) => serde_json::to_value(c)?,
            SagaCommand::ReserveInventory(c) => serde_json::to_value(c)?,
            SagaCommand::ReleaseInventory(c) => serde_json::to_value(c)?,
        };
        Ok(value)
    }

    /// Decodes a command body for the given tag.
    pub fn from_payload(
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Result<Self, DomainError> {
        let command = match message_type {
            MessageType::CreateOrder => SagaCommand::CreateOrder(serde_json::from_value(payload)?),
            MessageType::CancelOrder => SagaCommand::CancelOrder(serde_json::from_value(payload)?),
            MessageType::ProcessPayment => {
                SagaCommand::ProcessPayment(serde_json::from_value(payload)?)
            }
            MessageType::CancelPayment => {
                SagaCommand::CancelPayment(serde_json::from_value(payload)?)
            }
            MessageType::ReserveInventory => {
                SagaCommand::ReserveInventory(serde_json::from_value(payload)?)
            }
            MessageType::ReleaseInventory => {
                SagaCommand::ReleaseInventory(serde_json::from_value(payload)?)
            }
            other => {
                return Err(DomainError::UnexpectedMessageType {
                    expected: "saga command",
                    actual: other,
                });
            }
        };
        Ok(command)
    }
}
