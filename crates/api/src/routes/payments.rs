//! Payment lookups and provider inquiry.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::PaymentId;
use domain::Payment;
use saga::InquiryResponse;
use store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /payments/{id}: load a payment by id.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    state
        .payments
        .get_payment(&PaymentId::new(id.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))
}

/// GET /payments/{id}/inquiry: asks the gateway for the provider-side state.
///
/// A payment that never reached the gateway has no payment key and cannot be
/// inquired.
#[tracing::instrument(skip(state))]
pub async fn inquire<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<InquiryResponse>, ApiError> {
    let payment = state
        .payments
        .get_payment(&PaymentId::new(id.as_str()))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))?;
    let payment_key = payment
        .payment_key
        .ok_or_else(|| ApiError::Conflict(format!("Payment {id} has no payment key")))?;

    Ok(Json(state.payments.inquire_payment(&payment_key).await))
}
