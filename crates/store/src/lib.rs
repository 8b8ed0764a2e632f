//! Storage for saga state, participant rows, the transactional outbox and
//! dead-lettered messages.
//!
//! Every state change and the messages it produces are written through one
//! [`StoreTx`], so a handler either commits both or neither.

pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use dead_letter::{FailedMessage, FailedMessageStatus};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTx};
pub use outbox::{OutboxRecord, OutboxStatus, SAGA_AGGREGATE};
pub use postgres::{PgStoreTx, PostgresStore};
pub use store::{DeadLetterStore, OutboxStore, SagaStore, Store, StoreTx};
