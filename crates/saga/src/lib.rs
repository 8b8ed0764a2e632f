//! Orchestrated order saga.
//!
//! This crate provides:
//! - the [`SagaOrchestrator`] that drives each saga from participant replies
//! - the order, payment and inventory participants
//! - the payment gateway port and its breaker-guarded client
//! - message handlers wiring both to the saga topics
//!
//! The saga follows these steps:
//! 1. Create order
//! 2. Process payment
//! 3. Reserve inventory
//!
//! If payment or inventory fails, the steps already done are compensated in
//! reverse order. Every state change and the message it produces commit in
//! one local transaction; the outbox relay publishes afterwards.

pub mod consumers;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod services;

pub use consumers::{SagaCommandHandler, SagaEventHandler};
pub use error::{Result, SagaError};
pub use gateway::{
    GatewayError, GatewaySimulation, InquiryResponse, PaymentGateway, PaymentGatewayClient,
    PaymentRequest, PaymentResponse, PaymentResponseStatus, RefundRequest, RefundResponse,
    RefundResponseStatus, SimulatedPaymentGateway,
};
pub use orchestrator::{EventOutcome, SagaOrchestrator};
pub use services::{InventoryService, OrderService, PaymentService};
