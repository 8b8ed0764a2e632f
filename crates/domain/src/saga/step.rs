//! Saga steps and the forward/compensation chains between them.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A position in the forward chain or the compensation chain.
///
/// ```text
/// forward:       CREATE_ORDER ──► PROCESS_PAYMENT ──► RESERVE_INVENTORY ──► COMPLETE_SAGA
/// compensation:  RELEASE_INVENTORY ──► CANCEL_PAYMENT ──► CANCEL_ORDER
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    #[default]
    CreateOrder,
    ProcessPayment,
    ReserveInventory,
    CompleteSaga,
    CancelPayment,
    CancelOrder,
    ReleaseInventory,
}

impl SagaStep {
    /// All steps, forward chain first.
    pub const ALL: [SagaStep; 7] = [
        SagaStep::CreateOrder,
        SagaStep::ProcessPayment,
        SagaStep::ReserveInventory,
        SagaStep::CompleteSaga,
        SagaStep::CancelPayment,
        SagaStep::CancelOrder,
        SagaStep::ReleaseInventory,
    ];

    /// Ordinal of the step. Forward steps are 1..=4, compensation steps 10..=12.
    pub fn order(&self) -> u8 {
        match self {
            SagaStep::CreateOrder => 1,
            SagaStep::ProcessPayment => 2,
            SagaStep::ReserveInventory => 3,
            SagaStep::CompleteSaga => 4,
            SagaStep::CancelPayment => 10,
            SagaStep::CancelOrder => 11,
            SagaStep::ReleaseInventory => 12,
        }
    }

    /// Returns true for steps of the compensation chain.
    pub fn is_compensation(&self) -> bool {
        self.order() >= 10
    }

    /// Returns the step that follows this one in its own chain.
    pub fn next(&self) -> Option<SagaStep> {
        match self {
            SagaStep::CreateOrder => Some(SagaStep::ProcessPayment),
            SagaStep::ProcessPayment => Some(SagaStep::ReserveInventory),
            SagaStep::ReserveInventory => Some(SagaStep::CompleteSaga),
            SagaStep::CompleteSaga => None,
            SagaStep::ReleaseInventory => Some(SagaStep::CancelPayment),
            SagaStep::CancelPayment => Some(SagaStep::CancelOrder),
            SagaStep::CancelOrder => None,
        }
    }

    /// Returns the step that undoes the work done before this step failed.
    pub fn compensation(&self) -> Option<SagaStep> {
        match self {
            SagaStep::ProcessPayment => Some(SagaStep::CancelOrder),
            SagaStep::ReserveInventory => Some(SagaStep::CancelPayment),
            _ => None,
        }
    }

    /// Returns every compensation step required after a failure at `self`, in execution order.
    pub fn compensation_chain(&self) -> Vec<SagaStep> {
        let mut chain = Vec::new();
        let mut current = self.compensation();
        while let Some(step) = current {
            chain.push(step);
            current = step.next();
        }
        chain
    }

    /// Returns the step name as stored and transmitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::CreateOrder => "CREATE_ORDER",
            SagaStep::ProcessPayment => "PROCESS_PAYMENT",
            SagaStep::ReserveInventory => "RESERVE_INVENTORY",
            SagaStep::CompleteSaga => "COMPLETE_SAGA",
            SagaStep::CancelPayment => "CANCEL_PAYMENT",
            SagaStep::CancelOrder => "CANCEL_ORDER",
            SagaStep::ReleaseInventory => "RELEASE_INVENTORY",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStep {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| DomainError::UnknownVariant {
                kind: "saga step",
                value: s.to_string(),
            })
    }
}
