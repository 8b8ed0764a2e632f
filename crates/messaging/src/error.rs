//! Messaging error types.

use store::StoreError;
use thiserror::Error;

/// Errors raised by a [`Broker`](crate::Broker).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// A partition outside the topic's range was addressed.
    #[error("Topic '{topic}' has no partition {partition}")]
    UnknownPartition { topic: String, partition: i32 },
}

/// Errors raised while relaying the outbox.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Storage error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised while registering a product.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error("Invalid product: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}
