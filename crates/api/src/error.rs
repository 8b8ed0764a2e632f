//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use messaging::{BrokerError, ProductError, RelayError};
use saga::SagaError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The resource exists but is not in a state that allows the operation.
    Conflict(String),
    /// Saga or participant error.
    Saga(SagaError),
    /// Storage error outside a saga operation.
    Store(StoreError),
    /// Product registration error.
    Product(ProductError),
    /// The broker could not serve the request.
    Broker(BrokerError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Store(err) => internal(err.to_string()),
            ApiError::Product(err) => product_error_to_response(err),
            ApiError::Broker(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            ApiError::Internal(msg) => internal(msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn internal(message: String) -> (StatusCode, String) {
    tracing::error!(error = %message, "internal server error");
    (StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::Domain(DomainError::UnknownVariant { .. }) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        SagaError::Domain(_) => (StatusCode::CONFLICT, err.to_string()),
        _ => internal(err.to_string()),
    }
}

fn product_error_to_response(err: ProductError) -> (StatusCode, String) {
    match &err {
        ProductError::Invalid(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        ProductError::Broker(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        ProductError::Serialization(_) => internal(err.to_string()),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError::Broker(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<ProductError> for ApiError {
    fn from(err: ProductError) -> Self {
        ApiError::Product(err)
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Store(err) => ApiError::Store(err),
        }
    }
}
