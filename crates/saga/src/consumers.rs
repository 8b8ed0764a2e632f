//! Message handlers for the saga command and event topics.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{PaymentMethod, SagaCommand, SagaEvent};
use messaging::{Envelope, HandlerError, Message, MessageHandler};
use store::SagaStore;

use crate::gateway::PaymentGateway;
use crate::orchestrator::SagaOrchestrator;
use crate::services::{InventoryService, OrderService, PaymentService};

/// Routes saga commands to the participant that owns them.
pub struct SagaCommandHandler<S: SagaStore, G: PaymentGateway> {
    orders: Arc<OrderService<S>>,
    payments: Arc<PaymentService<S, G>>,
    inventory: Arc<InventoryService<S>>,
    payment_method: PaymentMethod,
}

impl<S: SagaStore, G: PaymentGateway> SagaCommandHandler<S, G> {
    pub fn new(
        orders: Arc<OrderService<S>>,
        payments: Arc<PaymentService<S, G>>,
        inventory: Arc<InventoryService<S>>,
    ) -> Self {
        Self {
            orders,
            payments,
            inventory,
            payment_method: PaymentMethod::default(),
        }
    }

    /// Payment method used for ProcessPayment. Defaults to CARD.
    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    pub async fn dispatch(&self, command: &SagaCommand) -> crate::Result<SagaEvent> {
        match command {
            SagaCommand::CreateOrder(c) => self.orders.create_order(c).await,
            SagaCommand::CancelOrder(c) => self.orders.cancel_order(c).await,
            SagaCommand::ProcessPayment(c) => {
                self.payments.process_payment(c, self.payment_method).await
            }
            SagaCommand::CancelPayment(c) => self.payments.cancel_payment(c).await,
            SagaCommand::ReserveInventory(c) => self.inventory.reserve_stock(c).await,
            SagaCommand::ReleaseInventory(c) => self.inventory.release_stock(c).await,
        }
    }
}

#[async_trait]
impl<S: SagaStore, G: PaymentGateway> MessageHandler for SagaCommandHandler<S, G> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let command = Envelope::decode(&message.value)
            .and_then(Envelope::into_command)
            .map_err(HandlerError::discard)?;

        tracing::debug!(
            saga_id = %command.saga_id(),
            command = %command.message_type(),
            "saga command received"
        );
        self.dispatch(&command).await?;
        Ok(())
    }
}

/// Feeds participant replies to the orchestrator.
pub struct SagaEventHandler<S: SagaStore> {
    orchestrator: Arc<SagaOrchestrator<S>>,
}

impl<S: SagaStore> SagaEventHandler<S> {
    pub fn new(orchestrator: Arc<SagaOrchestrator<S>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S: SagaStore> MessageHandler for SagaEventHandler<S> {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event = Envelope::decode(&message.value)
            .and_then(Envelope::into_event)
            .map_err(HandlerError::discard)?;

        self.orchestrator.handle_event(&event).await?;
        Ok(())
    }
}
