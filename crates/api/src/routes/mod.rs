//! HTTP route handlers.

pub mod admin;
pub mod batch;
pub mod circuit_breakers;
pub mod failed_messages;
pub mod inventory;
pub mod orders;
pub mod outbox;
pub mod payments;
pub mod products;
pub mod sagas;
pub mod system;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a path or query value, turning a parse failure into a 400.
pub(crate) fn parse<T>(kind: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {kind} '{raw}': {e}")))
}
