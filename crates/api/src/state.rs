//! Construction of the services shared by the HTTP handlers and the
//! background workers.

use std::sync::Arc;

use common::{PRODUCT_TOPIC, SAGA_COMMAND_TOPIC, SAGA_EVENT_TOPIC, dead_letter_topic};
use messaging::{
    BROKER_CIRCUIT_BREAKER, BatchConsumer, BatchRecordHandler, BatchStats, CircuitBreakerConfig, CircuitBreakerRegistry, Consumer,
    ConsumerConfig, DeadLetterHandler, IdempotencyGuard, InMemoryBroker,
    InMemoryIdempotencyGuard, OutboxRelay, PAYMENT_CIRCUIT_BREAKER, ProductIngestHandler,
    ProductPublisher,
};
use saga::{
    InventoryService, OrderService, PaymentGatewayClient, PaymentService, SagaCommandHandler,
    SagaEventHandler, SagaOrchestrator, SimulatedPaymentGateway,
};
use store::Store;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Consumer group of the order, payment and inventory participants.
pub const PARTICIPANT_GROUP: &str = "saga-participants";

/// Consumer group of the orchestrator.
pub const ORCHESTRATOR_GROUP: &str = "saga-orchestrator";

/// Consumer group of the product ingestion consumer.
pub const INGEST_GROUP: &str = "product-ingest";

/// Consumer group of the batch consumer.
pub const BATCH_GROUP: &str = "batch-ingest";

/// Consumer group persisting dead-lettered messages.
pub const DEAD_LETTER_GROUP: &str = "dead-letter";

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub orchestrator: Arc<SagaOrchestrator<S>>,
    pub orders: Arc<OrderService<S>>,
    pub payments: Arc<PaymentService<S, SimulatedPaymentGateway>>,
    pub inventory: Arc<InventoryService<S>>,
    /// Outbox and dead-letter access.
    pub store: S,
    pub broker: InMemoryBroker,
    pub relay: Arc<OutboxRelay<S, InMemoryBroker>>,
    pub breakers: CircuitBreakerRegistry,
    pub products: ProductPublisher<InMemoryBroker>,
    pub ingest: ProductIngestHandler,
    pub batch: BatchStats,
    pub guard: Arc<dyn IdempotencyGuard>,
    pub config: Config,
}

impl<S: Store> AppState<S> {
    /// Wires the orchestrator, the participants and the relay over `store`.
    pub fn new(store: S, config: Config) -> Arc<Self> {
        let broker = InMemoryBroker::new(config.partitions);
        let breakers = CircuitBreakerRegistry::new();
        let payment_breaker =
            breakers.circuit_breaker(PAYMENT_CIRCUIT_BREAKER, CircuitBreakerConfig::payment());
        let broker_breaker =
            breakers.circuit_breaker(BROKER_CIRCUIT_BREAKER, CircuitBreakerConfig::broker());

        let gateway = PaymentGatewayClient::new(
            SimulatedPaymentGateway::new(config.gateway.clone()),
            payment_breaker,
        )
        .with_timeout(config.gateway_timeout);

        let relay = OutboxRelay::new(store.clone(), broker.clone(), broker_breaker)
            .with_batch_size(config.relay_batch_size);

        Arc::new(Self {
            orchestrator: Arc::new(SagaOrchestrator::new(store.clone())),
            orders: Arc::new(OrderService::new(store.clone())),
            payments: Arc::new(PaymentService::new(store.clone(), gateway)),
            inventory: Arc::new(InventoryService::new(store.clone())),
            products: ProductPublisher::new(broker.clone(), PRODUCT_TOPIC),
            ingest: ProductIngestHandler::new(),
            batch: BatchStats::new(),
            relay: Arc::new(relay),
            guard: Arc::new(InMemoryIdempotencyGuard::new()),
            store,
            broker,
            breakers,
            config,
        })
    }

    /// Starts the outbox relay and every consumer. All tasks stop once
    /// `shutdown` flips to true.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let retry = self.config.retry.clone();
        let mut handles = Vec::new();

        let relay = self.relay.clone();
        let interval = self.config.relay_interval;
        let rx = shutdown.clone();
        handles.push(tokio::spawn(async move { relay.run(interval, rx).await }));

        let commands = SagaCommandHandler::new(
            self.orders.clone(),
            self.payments.clone(),
            self.inventory.clone(),
        )
        .with_payment_method(self.config.payment_method);
        handles.push(tokio::spawn(
            Consumer::new(
                self.broker.clone(),
                commands,
                self.guard.clone(),
                ConsumerConfig::new(PARTICIPANT_GROUP, SAGA_COMMAND_TOPIC).with_retry(retry.clone()),
            )
            .run(shutdown.clone()),
        ));

        handles.push(tokio::spawn(
            Consumer::new(
                self.broker.clone(),
                SagaEventHandler::new(self.orchestrator.clone()),
                self.guard.clone(),
                ConsumerConfig::new(ORCHESTRATOR_GROUP, SAGA_EVENT_TOPIC).with_retry(retry.clone()),
            )
            .run(shutdown.clone()),
        ));

        handles.push(tokio::spawn(
            Consumer::new(
                self.broker.clone(),
                self.ingest.clone(),
                self.guard.clone(),
                ConsumerConfig::new(INGEST_GROUP, self.config.ingestion_topic.clone())
                    .with_retry(retry),
            )
            .run(shutdown.clone()),
        ));

        handles.push(tokio::spawn(
            BatchConsumer::new(
                self.broker.clone(),
                BatchRecordHandler,
                self.guard.clone(),
                ConsumerConfig::new(BATCH_GROUP, self.config.batch_topic.clone()),
            )
            .with_stats(self.batch.clone())
            .run(shutdown.clone()),
        ));

        let mut dead_letter_topics = vec![
            dead_letter_topic(SAGA_COMMAND_TOPIC),
            dead_letter_topic(SAGA_EVENT_TOPIC),
            dead_letter_topic(&self.config.ingestion_topic),
        ];
        dead_letter_topics.sort();
        dead_letter_topics.dedup();
        for topic in dead_letter_topics {
            handles.push(tokio::spawn(
                Consumer::new(
                    self.broker.clone(),
                    DeadLetterHandler::new(self.store.clone()),
                    self.guard.clone(),
                    ConsumerConfig::new(DEAD_LETTER_GROUP, topic).without_dead_letter(),
                )
                .run(shutdown.clone()),
            ));
        }

        tracing::info!(tasks = handles.len(), "background workers started");
        handles
    }
}
