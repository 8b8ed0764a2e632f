//! Persistent saga instance.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, PaymentId, ProductId, SagaId};
use serde::{Deserialize, Serialize};

use super::{SagaStatus, SagaStep};
use crate::error::DomainError;

/// One saga instance: the business snapshot plus its position in the state machine.
///
/// Only the orchestrator mutates a `SagaState`, and only through the methods
/// below, so `completed_at` is set exactly once when a terminal status is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaState {
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
    pub status: SagaStatus,
    pub current_step: SagaStep,
    pub payment_id: Option<PaymentId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SagaState {
    /// Creates a saga that is about to emit CreateOrder.
    pub fn start(
        customer_id: CustomerId,
        product_id: ProductId,
        quantity: u32,
        total_amount: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            order_id: OrderId::new(),
            customer_id,
            product_id,
            quantity,
            total_amount,
            status: SagaStatus::OrderPending,
            current_step: SagaStep::CreateOrder,
            payment_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns true once the saga reached COMPLETED, COMPENSATED or FAILED.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to a non-terminal status.
    pub fn set_status(&mut self, status: SagaStatus) -> Result<(), DomainError> {
        if status.is_terminal() {
            return Err(self.invalid("set a terminal status directly"));
        }
        self.ensure_active("change status")?;
        self.status = status;
        self.touch();
        Ok(())
    }

    /// Advances `current_step` along its chain. Does nothing at the end of a chain.
    pub fn advance_to_next_step(&mut self) {
        if let Some(next) = self.current_step.next() {
            self.current_step = next;
            self.touch();
        }
    }

    /// Points `current_step` at a compensation step about to be emitted.
    pub fn set_step(&mut self, step: SagaStep) {
        self.current_step = step;
        self.touch();
    }

    /// Records the payment id reported by a successful charge.
    pub fn record_payment(&mut self, payment_id: PaymentId) {
        self.payment_id = Some(payment_id);
        self.touch();
    }

    /// Enters COMPENSATING, keeping `current_step` at the step that failed.
    pub fn start_compensation(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if !self.status.can_compensate() {
            return Err(self.invalid("start compensation"));
        }
        self.status = SagaStatus::Compensating;
        self.failure_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Terminal success.
    pub fn mark_completed(&mut self) -> Result<(), DomainError> {
        self.ensure_active("complete")?;
        self.current_step = SagaStep::CompleteSaga;
        self.finish(SagaStatus::Completed);
        Ok(())
    }

    /// Terminal state after the compensation chain ran to its end.
    pub fn mark_compensated(&mut self) -> Result<(), DomainError> {
        if self.status != SagaStatus::Compensating {
            return Err(self.invalid("mark compensated"));
        }
        self.finish(SagaStatus::Compensated);
        Ok(())
    }

    /// Terminal failure with nothing left to compensate.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_active("mark failed")?;
        self.failure_reason = Some(reason.into());
        self.finish(SagaStatus::Failed);
        Ok(())
    }

    fn finish(&mut self, status: SagaStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at.get_or_insert(now);
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn ensure_active(&self, action: &'static str) -> Result<(), DomainError> {
        if self.is_terminal() {
            Err(self.invalid(action))
        } else {
            Ok(())
        }
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            entity: "saga",
            from: self.status.to_string(),
            action,
        }
    }
}
