//! Saga participants: one service per entity, each replying through the outbox.

pub mod inventory;
pub mod order;
pub mod payment;

pub use inventory::{INVENTORY_AGGREGATE, InventoryService};
pub use order::{ORDER_AGGREGATE, OrderService};
pub use payment::{PAYMENT_AGGREGATE, PaymentService};
