//! Payment entity owned by the payment participant.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, PaymentId, SagaId};
use serde::{Deserialize, Serialize};

use crate::command::ProcessPayment;
use crate::error::DomainError;

/// Local lifecycle of a payment.
///
/// ```text
/// PENDING ──┬──► COMPLETED ──► CANCELLED
///           └──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            other => Err(DomainError::UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

/// Means of payment passed to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[default]
    Card,
    BankTransfer,
    VirtualAccount,
    Mobile,
    KakaoPay,
    NaverPay,
    TossPay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub payment_id: PaymentId,
    pub saga_id: SagaId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub payment_key: Option<String>,
    pub refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment with a fresh id for the ProcessPayment command.
    pub fn pending(command: &ProcessPayment) -> Self {
        let now = Utc::now();
        Self {
            payment_id: PaymentId::new(uuid::Uuid::new_v4().to_string()),
            saga_id: command.saga_id,
            order_id: command.order_id,
            customer_id: command.customer_id.clone(),
            amount: command.amount,
            status: PaymentStatus::Pending,
            transaction_id: None,
            payment_key: None,
            refund_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(
        &mut self,
        transaction_id: Option<String>,
        payment_key: Option<String>,
    ) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid("complete"));
        }
        self.status = PaymentStatus::Completed;
        self.transaction_id = transaction_id;
        self.payment_key = payment_key;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid("fail"));
        }
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cancels the payment. `refund_id` is `None` when the refund itself failed.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        refund_id: Option<String>,
    ) -> Result<(), DomainError> {
        if matches!(self.status, PaymentStatus::Cancelled | PaymentStatus::Failed) {
            return Err(self.invalid("cancel"));
        }
        self.status = PaymentStatus::Cancelled;
        self.failure_reason = Some(reason.into());
        self.refund_id = refund_id;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            entity: "payment",
            from: self.status.to_string(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        Payment::pending(&ProcessPayment {
            saga_id: SagaId::new(),
            order_id: OrderId::new(),
            customer_id: CustomerId::new("c1"),
            amount: Money::new(10000),
        })
    }

    #[test]
    fn test_complete_records_gateway_references() {
        let mut payment = payment();
        payment
            .complete(Some("TXN-1".to_string()), Some("PK-1".to_string()))
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.payment_key.as_deref(), Some("PK-1"));
        assert!(payment.fail("late").is_err());
    }

    #[test]
    fn test_cancel_after_complete() {
        let mut payment = payment();
        payment.complete(None, None).unwrap();
        payment
            .cancel("inventory shortage", Some("RF-1".to_string()))
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        assert_eq!(payment.refund_id.as_deref(), Some("RF-1"));
        assert!(payment.cancel("again", None).is_err());
    }

    #[test]
    fn test_failed_payment_cannot_be_cancelled() {
        let mut payment = payment();
        payment.fail("declined").unwrap();
        assert!(payment.cancel("compensate", None).is_err());
    }

    #[test]
    fn test_payment_method_default_is_card() {
        assert_eq!(PaymentMethod::default(), PaymentMethod::Card);
        assert_eq!(
            serde_json::to_string(&PaymentMethod::KakaoPay).unwrap(),
            "\"KAKAO_PAY\""
        );
    }
}
