//! Domain error types.

use thiserror::Error;

use crate::message::MessageType;

/// Errors raised by domain entities and message decoding.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The entity is not in a state that permits the action.
    #[error("Invalid {entity} transition: cannot {action} from {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    /// A stored or transmitted enum value is not recognised.
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// A known message type arrived on a channel that does not carry it.
    #[error("Message type {actual} is not a {expected}")]
    UnexpectedMessageType {
        expected: &'static str,
        actual: MessageType,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
