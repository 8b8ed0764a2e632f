//! Payment participant.

use chrono::Utc;
use common::{PaymentId, SagaId};
use domain::{
    CancelPayment, Payment, PaymentCancelled, PaymentCompleted, PaymentFailed, PaymentMethod,
    PaymentStatus, ProcessPayment, SagaEvent,
};
use store::SagaStore;

use crate::error::Result;
use crate::gateway::{
    InquiryResponse, PaymentGateway, PaymentGatewayClient, PaymentRequest, RefundRequest,
};

/// Aggregate type of the rows this participant writes to the outbox.
pub const PAYMENT_AGGREGATE: &str = "Payment";

const DEFAULT_FAILURE_REASON: &str = "Payment failed";

/// Owns payments and talks to the gateway.
///
/// Gateway calls happen before the local transaction opens, so no row lock
/// is held while waiting on the provider.
pub struct PaymentService<S: SagaStore, G: PaymentGateway> {
    store: S,
    client: PaymentGatewayClient<G>,
}

impl<S: SagaStore, G: PaymentGateway> PaymentService<S, G> {
    pub fn new(store: S, client: PaymentGatewayClient<G>) -> Self {
        Self { store, client }
    }

    pub fn client(&self) -> &PaymentGatewayClient<G> {
        &self.client
    }

    /// Charges the customer and replies PaymentCompleted or PaymentFailed.
    ///
    /// A declined charge, a gateway error and an OPEN breaker all end as a
    /// FAILED payment and a PaymentFailed reply.
    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, order_id = %command.order_id, amount = %command.amount))]
    pub async fn process_payment(
        &self,
        command: &ProcessPayment,
        method: PaymentMethod,
    ) -> Result<SagaEvent> {
        let mut payment = Payment::pending(command);
        let request = PaymentRequest {
            order_id: command.order_id,
            amount: command.amount,
            method,
            order_name: format!("Order-{}", command.order_id),
            customer_name: command.customer_id.to_string(),
        };

        let response = self.client.process_payment(&request).await;

        let event = if response.success {
            payment.complete(response.transaction_id, response.payment_key)?;
            tracing::info!(payment_id = %payment.payment_id, "payment completed");
            SagaEvent::PaymentCompleted(PaymentCompleted {
                saga_id: command.saga_id,
                order_id: command.order_id,
                payment_id: payment.payment_id.clone(),
                amount: payment.amount,
                timestamp: Utc::now(),
            })
        } else {
            let reason = response
                .error_message
                .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
            payment.fail(&reason)?;
            tracing::warn!(
                payment_id = %payment.payment_id,
                error_code = response.error_code.as_deref().unwrap_or("UNKNOWN"),
                %reason,
                "payment failed"
            );
            SagaEvent::PaymentFailed(PaymentFailed {
                saga_id: command.saga_id,
                order_id: command.order_id,
                reason,
                timestamp: Utc::now(),
            })
        };

        let mut tx = self.store.begin().await?;
        tx.save_payment(&payment).await?;
        tx.enqueue_event(PAYMENT_AGGREGATE, &event).await?;
        tx.commit().await?;

        metrics::counter!("payments_processed_total", "status" => payment.status.as_str())
            .increment(1);
        Ok(event)
    }

    /// Refunds and cancels the payment, then replies PaymentCancelled.
    ///
    /// A refund the gateway refused still cancels the payment; the refund
    /// error is appended to the stored reason for manual follow-up. A missing
    /// payment is logged and the reply is sent anyway.
    #[tracing::instrument(skip(self, command), fields(saga_id = %command.saga_id, payment_id = %command.payment_id))]
    pub async fn cancel_payment(&self, command: &CancelPayment) -> Result<SagaEvent> {
        let refund = match self.store.get_payment(&command.payment_id).await? {
            Some(payment) if payment.status == PaymentStatus::Completed => {
                match &payment.payment_key {
                    Some(payment_key) => {
                        let request = RefundRequest {
                            payment_key: payment_key.clone(),
                            transaction_id: payment.transaction_id.clone().unwrap_or_default(),
                            amount: payment.amount,
                            reason: command.reason.clone(),
                        };
                        Some(self.client.process_refund(&request).await)
                    }
                    None => None,
                }
            }
            _ => None,
        };

        let mut tx = self.store.begin().await?;
        match tx.payment(&command.payment_id).await? {
            Some(mut payment)
                if !matches!(
                    payment.status,
                    PaymentStatus::Cancelled | PaymentStatus::Failed
                ) =>
            {
                let (reason, refund_id) = match refund {
                    Some(response) if response.success => {
                        tracing::info!(refund_id = ?response.refund_id, "payment refunded");
                        (command.reason.clone(), response.refund_id)
                    }
                    Some(response) => {
                        let error = response.error_message.unwrap_or_default();
                        tracing::error!(%error, "refund failed, manual follow-up required");
                        metrics::counter!("payment_refunds_failed_total").increment(1);
                        (format!("{} (refund failed: {error})", command.reason), None)
                    }
                    None => (command.reason.clone(), None),
                };
                payment.cancel(reason, refund_id)?;
                tx.save_payment(&payment).await?;
            }
            Some(payment) => {
                tracing::warn!(status = %payment.status, "payment cannot be cancelled, replying anyway");
            }
            None => tracing::warn!("payment not found, replying anyway"),
        }

        let event = SagaEvent::PaymentCancelled(PaymentCancelled {
            saga_id: command.saga_id,
            order_id: command.order_id,
            payment_id: command.payment_id.clone(),
            reason: command.reason.clone(),
            timestamp: Utc::now(),
        });
        tx.enqueue_event(PAYMENT_AGGREGATE, &event).await?;
        tx.commit().await?;

        metrics::counter!("payments_cancelled_total").increment(1);
        Ok(event)
    }

    /// Asks the gateway for the provider-side state of a payment.
    pub async fn inquire_payment(&self, payment_key: &str) -> InquiryResponse {
        self.client.inquire_payment(payment_key).await
    }

    pub async fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.store.get_payment(payment_id).await?)
    }

    pub async fn find_by_saga(&self, saga_id: SagaId) -> Result<Option<Payment>> {
        Ok(self.store.find_payment_by_saga(saga_id).await?)
    }
}
