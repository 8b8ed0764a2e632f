//! Integration tests driving whole sagas through the outbox relay, the
//! broker and both saga consumers.

use std::sync::Arc;
use std::time::Duration;

use common::{CustomerId, Money, ProductId, SAGA_COMMAND_TOPIC, SAGA_EVENT_TOPIC};
use domain::{MessageType, OrderStatus, PaymentStatus, SagaState, SagaStatus};
use messaging::{
    Broker, CircuitBreaker, CircuitBreakerConfig, Consumer, ConsumerConfig, Delivery, Envelope,
    InMemoryBroker, InMemoryIdempotencyGuard, OutboxRelay, RetryPolicy,
};
use saga::{
    GatewaySimulation, InventoryService, OrderService, PaymentGatewayClient, PaymentService,
    SagaCommandHandler, SagaEventHandler, SagaOrchestrator, SimulatedPaymentGateway,
};
use store::{InMemoryStore, OutboxStatus, OutboxStore};

type Commands =
    Consumer<InMemoryBroker, SagaCommandHandler<InMemoryStore, SimulatedPaymentGateway>>;
type Events = Consumer<InMemoryBroker, SagaEventHandler<InMemoryStore>>;

struct TestHarness {
    store: InMemoryStore,
    broker: InMemoryBroker,
    guard: Arc<InMemoryIdempotencyGuard>,
    orchestrator: Arc<SagaOrchestrator<InMemoryStore>>,
    orders: Arc<OrderService<InMemoryStore>>,
    payments: Arc<PaymentService<InMemoryStore, SimulatedPaymentGateway>>,
    inventory: Arc<InventoryService<InMemoryStore>>,
    relay: OutboxRelay<InMemoryStore, InMemoryBroker>,
    commands: Commands,
    events: Events,
}

impl TestHarness {
    fn new(simulation: GatewaySimulation) -> Self {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new(3);
        let guard = Arc::new(InMemoryIdempotencyGuard::new());

        let payment_breaker = Arc::new(CircuitBreaker::new(
            "payment",
            CircuitBreakerConfig::payment(),
        ));
        let broker_breaker = Arc::new(CircuitBreaker::new(
            "broker",
            CircuitBreakerConfig::broker(),
        ));

        let orchestrator = Arc::new(SagaOrchestrator::new(store.clone()));
        let orders = Arc::new(OrderService::new(store.clone()));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            PaymentGatewayClient::new(SimulatedPaymentGateway::new(simulation), payment_breaker),
        ));
        let inventory = Arc::new(InventoryService::new(store.clone()));

        let relay = OutboxRelay::new(store.clone(), broker.clone(), broker_breaker);
        let commands = Consumer::new(
            broker.clone(),
            SagaCommandHandler::new(orders.clone(), payments.clone(), inventory.clone()),
            guard.clone(),
            ConsumerConfig::new("participants", SAGA_COMMAND_TOPIC).with_retry(fast_retry()),
        );
        let events = Consumer::new(
            broker.clone(),
            SagaEventHandler::new(orchestrator.clone()),
            guard.clone(),
            ConsumerConfig::new("orchestrator", SAGA_EVENT_TOPIC).with_retry(fast_retry()),
        );

        Self {
            store,
            broker,
            guard,
            orchestrator,
            orders,
            payments,
            inventory,
            relay,
            commands,
            events,
        }
    }

    async fn stock(&self, product: &str, quantity: u32) {
        self.inventory
            .initialize_inventory(ProductId::new(product), quantity)
            .await
            .unwrap();
    }

    async fn start(&self, product: &str, quantity: u32) -> SagaState {
        self.orchestrator
            .start_saga(
                CustomerId::new("c1"),
                ProductId::new(product),
                quantity,
                Money::new(10000),
            )
            .await
            .unwrap()
    }

    /// Relays and consumes until no message is left in flight.
    async fn settle(&self) {
        for _ in 0..20 {
            self.relay.relay_once().await.unwrap();
            let commands = self.commands.poll_once().await.unwrap();
            self.relay.relay_once().await.unwrap();
            let events = self.events.poll_once().await.unwrap();
            if commands == 0 && events == 0 {
                return;
            }
        }
        panic!("sagas did not settle");
    }

    async fn saga(&self, saga: &SagaState) -> SagaState {
        self.orchestrator
            .get_saga(saga.saga_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Command types published for one saga, in publish order.
    async fn commands_for(&self, saga: &SagaState) -> Vec<MessageType> {
        self.broker
            .messages(SAGA_COMMAND_TOPIC)
            .await
            .into_iter()
            .filter(|m| m.key.as_deref() == Some(saga.saga_id.to_string().as_str()))
            .map(|m| Envelope::decode(&m.value).unwrap().event_type)
            .collect()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn test_happy_path_completes_saga() {
    let h = TestHarness::new(GatewaySimulation::instant());
    h.stock("p1", 10).await;
    let saga = h.start("p1", 2).await;

    h.settle().await;

    let saga = h.saga(&saga).await;
    assert_eq!(saga.status, SagaStatus::Completed);
    assert!(saga.completed_at.is_some());
    assert_eq!(
        h.commands_for(&saga).await,
        vec![
            MessageType::CreateOrder,
            MessageType::ProcessPayment,
            MessageType::ReserveInventory,
        ]
    );

    let order = h.orders.get_order(saga.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);

    let payment = h.payments.find_by_saga(saga.saga_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(saga.payment_id, Some(payment.payment_id));

    let stock = h
        .inventory
        .get_inventory(&ProductId::new("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.reserved_quantity, 2);
    assert_eq!(stock.available_quantity(), 8);

    assert_eq!(h.store.count_by_status(OutboxStatus::Pending).await.unwrap(), 0);
}

#[tokio::test]
async fn test_payment_failure_compensates_order() {
    let h = TestHarness::new(GatewaySimulation::always_failing());
    h.stock("p1", 10).await;
    let saga = h.start("p1", 2).await;

    h.settle().await;

    let saga = h.saga(&saga).await;
    assert_eq!(saga.status, SagaStatus::Compensated);
    assert!(saga.failure_reason.is_some());
    assert_eq!(
        h.commands_for(&saga).await,
        vec![
            MessageType::CreateOrder,
            MessageType::ProcessPayment,
            MessageType::CancelOrder,
        ]
    );

    let order = h.orders.get_order(saga.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let stock = h
        .inventory
        .get_inventory(&ProductId::new("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.reserved_quantity, 0);
}

#[tokio::test]
async fn test_inventory_failure_refunds_payment_then_cancels_order() {
    let h = TestHarness::new(GatewaySimulation::instant());
    h.stock("p1", 1).await;
    let saga = h.start("p1", 2).await;

    h.settle().await;

    let saga = h.saga(&saga).await;
    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.failure_reason.as_deref(), Some("Insufficient stock"));
    assert_eq!(
        h.commands_for(&saga).await,
        vec![
            MessageType::CreateOrder,
            MessageType::ProcessPayment,
            MessageType::ReserveInventory,
            MessageType::CancelPayment,
            MessageType::CancelOrder,
        ]
    );

    let payment = h.payments.find_by_saga(saga.saga_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Cancelled);
    assert!(payment.refund_id.is_some());

    let order = h.orders.get_order(saga.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_concurrent_sagas_settle_independently() {
    let h = TestHarness::new(GatewaySimulation::instant());
    h.stock("p1", 3).await;

    let first = h.start("p1", 2).await;
    let second = h.start("p1", 2).await;
    let third = h.start("p2", 1).await;

    h.settle().await;

    let statuses = [
        h.saga(&first).await.status,
        h.saga(&second).await.status,
        h.saga(&third).await.status,
    ];
    let completed = statuses
        .iter()
        .filter(|s| **s == SagaStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(statuses[2], SagaStatus::Compensated);
}

#[tokio::test]
async fn test_redelivered_commands_do_not_repeat_side_effects() {
    let h = TestHarness::new(GatewaySimulation::instant());
    h.stock("p1", 10).await;
    let saga = h.start("p1", 2).await;
    h.settle().await;
    let outbox_before = h.store.outbox_records().await.len();

    // A second group over the same topic sees the same positions.
    let replay = Consumer::new(
        h.broker.clone(),
        SagaCommandHandler::new(h.orders.clone(), h.payments.clone(), h.inventory.clone()),
        h.guard.clone(),
        ConsumerConfig::new("participants-replay", SAGA_COMMAND_TOPIC),
    );
    let redelivered = h
        .broker
        .poll("participants-replay", SAGA_COMMAND_TOPIC, 100)
        .await
        .unwrap();
    assert_eq!(redelivered.len(), 3);
    for message in redelivered {
        assert_eq!(replay.process(&message).await.unwrap(), Delivery::Duplicate);
    }

    assert_eq!(h.store.outbox_records().await.len(), outbox_before);
    let stock = h
        .inventory
        .get_inventory(&ProductId::new("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stock.reserved_quantity, 2);
    assert_eq!(h.saga(&saga).await.status, SagaStatus::Completed);
}

#[tokio::test]
async fn test_broker_outage_parks_rows_until_requeued() {
    let h = TestHarness::new(GatewaySimulation::instant());
    h.stock("p1", 10).await;
    let saga = h.start("p1", 1).await;

    h.broker.set_available(false);
    let report = h.relay.relay_once().await.unwrap();
    assert_eq!(report.failed, 1);
    h.broker.set_available(true);

    h.settle().await;
    assert_eq!(h.saga(&saga).await.status, SagaStatus::OrderPending);

    let failed = h.store.find_by_status(OutboxStatus::Failed, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(h.store.requeue(failed[0].id).await.unwrap());

    h.settle().await;
    assert_eq!(h.saga(&saga).await.status, SagaStatus::Completed);
}

#[tokio::test]
async fn test_payment_breaker_opens_after_repeated_failures() {
    let h = TestHarness::new(GatewaySimulation::always_failing());
    h.stock("p1", 100).await;

    let mut sagas = Vec::new();
    for _ in 0..6 {
        sagas.push(h.start("p1", 1).await);
    }
    h.settle().await;

    for saga in &sagas {
        assert_eq!(h.saga(saga).await.status, SagaStatus::Compensated);
    }
    let breaker = h.payments.client().breaker();
    assert_eq!(breaker.state(), messaging::CircuitState::Open);

    let mut rejected = 0;
    for saga in &sagas {
        let reason = h.saga(saga).await.failure_reason.unwrap_or_default();
        if reason.contains("circuit breaker OPEN") {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 1);
}

#[tokio::test]
async fn test_unknown_saga_event_is_consumed_without_effect() {
    let h = TestHarness::new(GatewaySimulation::instant());
    let ghost = SagaState::start(
        CustomerId::new("c9"),
        ProductId::new("p9"),
        1,
        Money::new(1),
    );
    let event = domain::SagaEvent::OrderCancelled(domain::OrderCancelled {
        saga_id: ghost.saga_id,
        order_id: ghost.order_id,
        reason: "x".to_string(),
        timestamp: chrono::Utc::now(),
    });
    h.broker
        .publish(
            messaging::ProducerRecord::new(
                SAGA_EVENT_TOPIC,
                Envelope::from_event(&event).unwrap().encode().unwrap(),
            )
            .with_key(ghost.saga_id.to_string()),
        )
        .await
        .unwrap();

    assert_eq!(h.events.poll_once().await.unwrap(), 1);
    assert!(h.orchestrator.get_saga(ghost.saga_id).await.unwrap().is_none());
    assert!(h.store.outbox_records().await.is_empty());
    assert_eq!(h.guard.len().await, 1);
}
