//! Saga error types.

use domain::DomainError;
use messaging::HandlerError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while running the saga or one of its participants.
///
/// Business rejections never show up here: they become failure events.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Storage error. The local transaction was rolled back.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An entity refused a transition.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

impl From<SagaError> for HandlerError {
    /// Storage failures are worth retrying; anything else will fail the same
    /// way on every attempt and is dropped.
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Store(_) => HandlerError::retryable(err),
            SagaError::Domain(_) | SagaError::Serialization(_) => HandlerError::discard(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_retryable() {
        let err = SagaError::Store(StoreError::NotFound {
            kind: "saga",
            id: "x".to_string(),
        });
        assert!(matches!(HandlerError::from(err), HandlerError::Retryable(_)));
    }

    #[test]
    fn domain_errors_are_discarded() {
        let err = SagaError::Domain(DomainError::UnknownVariant {
            kind: "saga status",
            value: "NOPE".to_string(),
        });
        assert!(matches!(HandlerError::from(err), HandlerError::Discard(_)));
    }
}
