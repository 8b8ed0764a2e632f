//! Message transport for the saga: a partitioned broker port, the outbox
//! relay, idempotent consumers with dead-lettering, and the circuit breaker
//! that guards outbound calls.

pub mod batch;
pub mod broker;
pub mod circuit_breaker;
pub mod consumer;
pub mod dead_letter;
pub mod envelope;
pub mod error;
pub mod idempotency;
pub mod product;
pub mod relay;

pub use batch::{BatchConsumer, BatchRecordHandler, BatchReport, BatchStats};
pub use broker::{
    Broker, ConsumerGroupInfo, DEFAULT_PARTITIONS, GroupOffset, InMemoryBroker, Message,
    PartitionInfo, ProducerRecord, RecordMetadata, TopicInfo,
};
pub use circuit_breaker::{
    BROKER_CIRCUIT_BREAKER, CallError, CallNotPermitted, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitState,
    PAYMENT_CIRCUIT_BREAKER,
};
pub use consumer::{
    Consumer, ConsumerConfig, DLT_EXCEPTION_MESSAGE, DLT_ORIGINAL_OFFSET, DLT_ORIGINAL_PARTITION,
    DLT_ORIGINAL_TOPIC, Delivery, HandlerError, MessageHandler, RetryPolicy,
};
pub use dead_letter::DeadLetterHandler;
pub use envelope::Envelope;
pub use error::{BrokerError, ProductError, RelayError, Result};
pub use idempotency::{IdempotencyGuard, InMemoryIdempotencyGuard, MessageKey};
pub use product::{ProductIngestHandler, ProductPublisher};
pub use relay::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, OutboxRelay, RelayReport};
