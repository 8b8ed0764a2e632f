//! Domain layer for the order saga.
//!
//! This crate provides:
//! - the saga state machine (`SagaState`, `SagaStatus`, `SagaStep`)
//! - the commands and events exchanged between orchestrator and participants,
//!   tagged by `MessageType`
//! - the entities owned by the order, payment and inventory participants
//! - product registrations for the product topic

pub mod command;
pub mod error;
pub mod event;
pub mod inventory;
pub mod message;
pub mod order;
pub mod payment;
pub mod product;
pub mod saga;

pub use command::{
    CancelOrder, CancelPayment, CreateOrder, ProcessPayment, ReleaseInventory, ReserveInventory,
    SagaCommand,
};
pub use error::DomainError;
pub use event::{
    InventoryFailed, InventoryReleased, InventoryReserved, OrderCancelled, OrderCreated,
    PaymentCancelled, PaymentCompleted, PaymentFailed, SagaEvent,
};
pub use inventory::Inventory;
pub use message::MessageType;
pub use order::{Order, OrderStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use product::Product;
pub use saga::{SagaState, SagaStatus, SagaStep};
