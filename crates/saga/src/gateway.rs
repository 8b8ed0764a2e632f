//! Payment gateway port, the bundled simulation, and the client that puts
//! the payment circuit breaker in front of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use common::{Money, OrderId};
use domain::PaymentMethod;
use messaging::{CallError, CircuitBreaker};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error code of a call rejected by an OPEN breaker.
pub const CIRCUIT_BREAKER_OPEN: &str = "CIRCUIT_BREAKER_OPEN";
pub const PAYMENT_ERROR: &str = "PAYMENT_ERROR";
pub const REFUND_ERROR: &str = "REFUND_ERROR";
pub const INQUIRY_ERROR: &str = "INQUIRY_ERROR";

const BREAKER_OPEN_MESSAGE: &str = "Payment service temporarily unavailable (circuit breaker OPEN)";

/// Errors raised by a [`PaymentGateway`]. Each one counts as a failed call
/// for the payment breaker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The provider refused the request.
    #[error("Gateway declined the request: {0}")]
    Declined(String),

    /// No answer within the configured timeout.
    #[error("Gateway timed out after {0:?}")]
    Timeout(Duration),

    /// The provider could not be reached.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentResponseStatus {
    Approved,
    Pending,
    Failed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundResponseStatus {
    Completed,
    Pending,
    Failed,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub order_name: String,
    pub customer_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub payment_key: Option<String>,
    pub status: PaymentResponseStatus,
    pub method: PaymentMethod,
    pub approved_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl PaymentResponse {
    fn failed(method: PaymentMethod, code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: None,
            payment_key: None,
            status: PaymentResponseStatus::Failed,
            method,
            approved_at: None,
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub payment_key: String,
    pub transaction_id: String,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub success: bool,
    pub refund_id: Option<String>,
    pub transaction_id: String,
    pub refunded_amount: Option<Money>,
    pub status: RefundResponseStatus,
    pub refunded_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl RefundResponse {
    fn failed(transaction_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            refund_id: None,
            transaction_id: transaction_id.to_string(),
            refunded_amount: None,
            status: RefundResponseStatus::Failed,
            refunded_at: None,
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryResponse {
    pub success: bool,
    pub payment_key: String,
    pub transaction_id: Option<String>,
    pub amount: Option<Money>,
    pub status: PaymentResponseStatus,
    pub method: Option<PaymentMethod>,
    pub approved_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl InquiryResponse {
    fn failed(payment_key: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payment_key: payment_key.to_string(),
            transaction_id: None,
            amount: None,
            status: PaymentResponseStatus::Failed,
            method: None,
            approved_at: None,
            error_code: Some(code.to_string()),
            error_message: Some(message.into()),
        }
    }
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, GatewayError>;

    async fn process_refund(&self, request: &RefundRequest)
    -> Result<RefundResponse, GatewayError>;

    async fn inquire_payment(&self, payment_key: &str) -> Result<InquiryResponse, GatewayError>;
}

/// Latency and failure switches of [`SimulatedPaymentGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySimulation {
    /// Latency of a normal call.
    pub delay: Duration,
    /// Upper bound of the uniform extra latency added to a normal call.
    pub delay_jitter: Duration,
    /// Probability in `[0, 1]` that a payment or refund fails.
    pub failure_rate: f64,
    /// Probability in `[0, 1]` that a call takes `slow_call_delay` instead.
    pub slow_call_rate: f64,
    pub slow_call_delay: Duration,
}

impl Default for GatewaySimulation {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            delay_jitter: Duration::ZERO,
            failure_rate: 0.0,
            slow_call_rate: 0.0,
            slow_call_delay: Duration::from_millis(3000),
        }
    }
}

impl GatewaySimulation {
    /// No latency, no failures.
    pub fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
            delay_jitter: Duration::ZERO,
            ..Self::default()
        }
    }

    /// No latency, every payment and refund fails.
    pub fn always_failing() -> Self {
        Self {
            failure_rate: 1.0,
            ..Self::instant()
        }
    }
}

/// In-process gateway that approves everything unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPaymentGateway {
    simulation: GatewaySimulation,
}

impl SimulatedPaymentGateway {
    pub fn new(simulation: GatewaySimulation) -> Self {
        Self { simulation }
    }

    pub fn simulation(&self) -> &GatewaySimulation {
        &self.simulation
    }

    async fn simulate_delay(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_delay(&self) -> Duration {
        let simulation = &self.simulation;
        let mut rng = rand::thread_rng();
        if chance(&mut rng, simulation.slow_call_rate) {
            return simulation.slow_call_delay;
        }
        let jitter = simulation.delay_jitter.as_millis() as u64;
        if jitter == 0 {
            simulation.delay
        } else {
            simulation.delay + Duration::from_millis(rng.gen_range(0..=jitter))
        }
    }

    fn simulate_failure(&self, message: &str) -> Result<(), GatewayError> {
        if chance(&mut rand::thread_rng(), self.simulation.failure_rate) {
            Err(GatewayError::Declined(message.to_string()))
        } else {
            Ok(())
        }
    }
}

/// True with probability `rate`. Rates outside `[0, 1]` saturate and NaN
/// never fires.
fn chance(rng: &mut impl Rng, rate: f64) -> bool {
    if rate >= 1.0 {
        true
    } else if rate > 0.0 {
        rng.gen_bool(rate)
    } else {
        false
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResponse, GatewayError> {
        tracing::info!(
            order_id = %request.order_id,
            amount = %request.amount,
            method = ?request.method,
            "simulated payment"
        );
        self.simulate_delay().await;
        self.simulate_failure("Simulated payment failure")?;

        Ok(PaymentResponse {
            success: true,
            transaction_id: Some(reference("TXN")),
            payment_key: Some(format!("PK-{}", Uuid::new_v4())),
            status: PaymentResponseStatus::Approved,
            method: request.method,
            approved_at: Some(Utc::now()),
            error_code: None,
            error_message: None,
        })
    }

    async fn process_refund(
        &self,
        request: &RefundRequest,
    ) -> Result<RefundResponse, GatewayError> {
        tracing::info!(
            transaction_id = %request.transaction_id,
            amount = %request.amount,
            reason = %request.reason,
            "simulated refund"
        );
        self.simulate_delay().await;
        self.simulate_failure("Simulated refund failure")?;

        Ok(RefundResponse {
            success: true,
            refund_id: Some(reference("REF")),
            transaction_id: request.transaction_id.clone(),
            refunded_amount: Some(request.amount),
            status: RefundResponseStatus::Completed,
            refunded_at: Some(Utc::now()),
            error_code: None,
            error_message: None,
        })
    }

    async fn inquire_payment(&self, payment_key: &str) -> Result<InquiryResponse, GatewayError> {
        self.simulate_delay().await;

        Ok(InquiryResponse {
            success: true,
            payment_key: payment_key.to_string(),
            transaction_id: Some("TXN-SIMULATED".to_string()),
            amount: Some(Money::new(10000)),
            status: PaymentResponseStatus::Approved,
            method: Some(PaymentMethod::Card),
            approved_at: Some(Utc::now() - chrono::Duration::minutes(5)),
            error_code: None,
            error_message: None,
        })
    }
}

/// `<prefix>-<epoch millis>-<8 hex chars>`
fn reference(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", Utc::now().timestamp_millis(), &id[..8])
}

/// Calls the gateway through the payment circuit breaker.
///
/// Never returns an error: every failure, including a call the breaker did
/// not permit, comes back as an unsuccessful response with an error code.
pub struct PaymentGatewayClient<G: PaymentGateway> {
    gateway: G,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl<G: PaymentGateway> PaymentGatewayClient<G> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

    pub fn new(gateway: G, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            gateway,
            breaker,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn process_payment(&self, request: &PaymentRequest) -> PaymentResponse {
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(timeout, self.gateway.process_payment(request))
                    .await
                    .map_err(|_| GatewayError::Timeout(timeout))?
            })
            .await;

        match result {
            Ok(response) => response,
            Err(CallError::NotPermitted(_)) => {
                tracing::error!("circuit breaker OPEN, payment not attempted");
                metrics::counter!("payment_gateway_rejected_total").increment(1);
                PaymentResponse::failed(request.method, CIRCUIT_BREAKER_OPEN, BREAKER_OPEN_MESSAGE)
            }
            Err(CallError::Failed(err)) => {
                tracing::error!(error = %err, "payment failed");
                PaymentResponse::failed(request.method, PAYMENT_ERROR, err.to_string())
            }
        }
    }

    #[tracing::instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub async fn process_refund(&self, request: &RefundRequest) -> RefundResponse {
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(timeout, self.gateway.process_refund(request))
                    .await
                    .map_err(|_| GatewayError::Timeout(timeout))?
            })
            .await;

        match result {
            Ok(response) => response,
            Err(CallError::NotPermitted(_)) => {
                tracing::error!("circuit breaker OPEN, refund not attempted");
                metrics::counter!("payment_gateway_rejected_total").increment(1);
                RefundResponse::failed(
                    &request.transaction_id,
                    CIRCUIT_BREAKER_OPEN,
                    BREAKER_OPEN_MESSAGE,
                )
            }
            Err(CallError::Failed(err)) => {
                tracing::error!(error = %err, "refund failed");
                RefundResponse::failed(&request.transaction_id, REFUND_ERROR, err.to_string())
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn inquire_payment(&self, payment_key: &str) -> InquiryResponse {
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async move {
                tokio::time::timeout(timeout, self.gateway.inquire_payment(payment_key))
                    .await
                    .map_err(|_| GatewayError::Timeout(timeout))?
            })
            .await;

        match result {
            Ok(response) => response,
            Err(CallError::NotPermitted(_)) => {
                InquiryResponse::failed(payment_key, CIRCUIT_BREAKER_OPEN, BREAKER_OPEN_MESSAGE)
            }
            Err(CallError::Failed(err)) => {
                tracing::error!(error = %err, "payment inquiry failed");
                InquiryResponse::failed(payment_key, INQUIRY_ERROR, err.to_string())
            }
        }
    }
}
