//! Shared types for the order saga system.
//!
//! Identifiers, the money amount type and the broker topic names used by
//! every participant live here so that the domain, storage and messaging
//! crates agree on one vocabulary.

pub mod topics;
pub mod types;

pub use topics::{
    BATCH_TOPIC, DLT_SUFFIX, PRODUCT_TOPIC, SAGA_COMMAND_TOPIC, SAGA_EVENT_TOPIC,
    dead_letter_topic,
};
pub use types::{CustomerId, Money, OrderId, PaymentId, ProductId, SagaId};
