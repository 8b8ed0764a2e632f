//! Polling consumer with idempotency, bounded retries and dead-lettering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::dead_letter_topic;
use thiserror::Error;
use tokio::sync::watch;

use crate::broker::{Broker, Message, ProducerRecord};
use crate::error::BrokerError;
use crate::idempotency::{IdempotencyGuard, MessageKey};

/// Header carrying the topic a dead-lettered message was consumed from.
pub const DLT_ORIGINAL_TOPIC: &str = "dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION: &str = "dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET: &str = "dlt-original-offset";
pub const DLT_EXCEPTION_MESSAGE: &str = "dlt-exception-message";

/// Why a handler could not process a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Transient; retried with backoff, then dead-lettered.
    #[error("Retryable: {0}")]
    Retryable(String),

    /// Will never succeed; dead-lettered without retrying.
    #[error("Non-retryable: {0}")]
    NonRetryable(String),

    /// Logged and dropped.
    #[error("Discarded: {0}")]
    Discard(String),
}

impl HandlerError {
    pub fn retryable(err: impl std::fmt::Display) -> Self {
        HandlerError::Retryable(err.to_string())
    }

    pub fn non_retryable(err: impl std::fmt::Display) -> Self {
        HandlerError::NonRetryable(err.to_string())
    }

    pub fn discard(err: impl std::fmt::Display) -> Self {
        HandlerError::Discard(err.to_string())
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Retryable(m) | HandlerError::NonRetryable(m) | HandlerError::Discard(m) => m,
        }
    }
}

/// Processes one message of a subscription.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Attempts and exponential backoff before a message is dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Settings of one subscription.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub topic: String,
    pub retry: RetryPolicy,
    pub max_poll_records: usize,
    pub poll_interval: Duration,
    /// Whether exhausted messages are published to `<topic>.DLT`.
    pub dead_letter: bool,
}

impl ConsumerConfig {
    pub fn new(group: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            topic: topic.into(),
            retry: RetryPolicy::default(),
            max_poll_records: 100,
            poll_interval: Duration::from_millis(100),
            dead_letter: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn without_dead_letter(mut self) -> Self {
        self.dead_letter = false;
        self
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Processed,
    /// Already handled under the same key.
    Duplicate,
    DeadLettered,
    Discarded,
}

/// Drives one handler over one topic.
///
/// Messages are processed strictly in poll order. A message is committed
/// only after it was handled, dead-lettered or discarded.
pub struct Consumer<B: Broker, H: MessageHandler> {
    broker: B,
    handler: H,
    guard: Arc<dyn IdempotencyGuard>,
    config: ConsumerConfig,
}

impl<B: Broker, H: MessageHandler> Consumer<B, H> {
    pub fn new(
        broker: B,
        handler: H,
        guard: Arc<dyn IdempotencyGuard>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            handler,
            guard,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Polls once and processes everything fetched. Returns how many
    /// messages were fetched.
    pub async fn poll_once(&self) -> Result<usize, BrokerError> {
        let messages = self
            .broker
            .poll(
                &self.config.group,
                &self.config.topic,
                self.config.max_poll_records,
            )
            .await?;

        for message in &messages {
            if let Err(err) = self.process(message).await {
                // Uncommitted messages of this batch must be fetched again.
                self.broker
                    .seek_to_committed(&self.config.group, &self.config.topic)
                    .await?;
                return Err(err);
            }
        }
        Ok(messages.len())
    }

    /// Handles one message end to end, including the commit.
    #[tracing::instrument(
        skip(self, message),
        fields(topic = %message.topic, partition = message.partition, offset = message.offset)
    )]
    pub async fn process(&self, message: &Message) -> Result<Delivery, BrokerError> {
        let key = MessageKey::for_message(&self.config.group, message);

        if self.guard.is_processed(&key).await {
            tracing::info!(key = %key, "message already processed, skipping");
            metrics::counter!("consumer_duplicates_total", "topic" => self.config.topic.clone())
                .increment(1);
            self.broker.commit(&self.config.group, message).await?;
            return Ok(Delivery::Duplicate);
        }

        let delivery = match self.handle_with_retry(message).await {
            Ok(()) => Delivery::Processed,
            Err(HandlerError::Discard(reason)) => {
                tracing::warn!(%reason, "message discarded");
                Delivery::Discarded
            }
            Err(err) => {
                self.dead_letter(message, &err).await?;
                Delivery::DeadLettered
            }
        };

        self.guard.mark_processed(&key).await;
        self.broker.commit(&self.config.group, message).await?;
        metrics::counter!(
            "consumer_messages_total",
            "topic" => self.config.topic.clone(),
            "outcome" => delivery_label(&delivery)
        )
        .increment(1);
        Ok(delivery)
    }

    async fn handle_with_retry(&self, message: &Message) -> Result<(), HandlerError> {
        let mut attempt = 1;
        loop {
            match self.handler.handle(message).await {
                Err(HandlerError::Retryable(reason)) if attempt < self.config.retry.max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    tracing::warn!(attempt, ?delay, %reason, "handler failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn dead_letter(&self, message: &Message, err: &HandlerError) -> Result<(), BrokerError> {
        if !self.config.dead_letter {
            tracing::error!(error = %err, "message failed and has no dead-letter topic, dropping");
            return Ok(());
        }

        let topic = dead_letter_topic(&message.topic);
        let mut record = ProducerRecord::new(&topic, message.value.clone())
            .with_header(DLT_ORIGINAL_TOPIC, message.topic.clone())
            .with_header(DLT_ORIGINAL_PARTITION, message.partition.to_string())
            .with_header(DLT_ORIGINAL_OFFSET, message.offset.to_string())
            .with_header(DLT_EXCEPTION_MESSAGE, err.message());
        if let Some(key) = &message.key {
            record = record.with_key(key.clone());
        }

        self.broker.publish(record).await?;
        tracing::error!(dlt = %topic, error = %err, "message sent to dead-letter topic");
        metrics::counter!("consumer_dead_lettered_total", "topic" => message.topic.clone())
            .increment(1);
        Ok(())
    }

    /// Polls until `shutdown` flips to true. Broker errors are logged and
    /// retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            group = %self.config.group,
            topic = %self.config.topic,
            "consumer started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetched = match self.poll_once().await {
                Ok(n) => n,
                Err(err) => {
                    tracing::warn!(topic = %self.config.topic, error = %err, "poll failed");
                    0
                }
            };

            if fetched == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        tracing::info!(topic = %self.config.topic, "consumer stopped");
    }
}

fn delivery_label(delivery: &Delivery) -> &'static str {
    match delivery {
        Delivery::Processed => "processed",
        Delivery::Duplicate => "duplicate",
        Delivery::DeadLettered => "dead_lettered",
        Delivery::Discarded => "discarded",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::idempotency::InMemoryIdempotencyGuard;

    struct Scripted {
        calls: Arc<AtomicUsize>,
        fail_times: usize,
        error: HandlerError,
    }

    #[async_trait]
    impl MessageHandler for Scripted {
        async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
        }
    }

    fn consumer(
        broker: &InMemoryBroker,
        fail_times: usize,
        error: HandlerError,
    ) -> (Consumer<InMemoryBroker, Scripted>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Scripted {
            calls: calls.clone(),
            fail_times,
            error,
        };
        let consumer = Consumer::new(
            broker.clone(),
            handler,
            Arc::new(InMemoryIdempotencyGuard::new()),
            ConsumerConfig::new("g", "orders").with_retry(fast_retry()),
        );
        (consumer, calls)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_processed() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", "m"))
            .await
            .unwrap();
        let (consumer, calls) = consumer(&broker, 2, HandlerError::retryable("db down"));

        let message = &broker.poll("peek", "orders", 1).await.unwrap()[0];
        assert_eq!(consumer.process(message).await.unwrap(), Delivery::Processed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(broker.messages("orders.DLT").await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_go_to_dead_letter_topic_with_headers() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", "payload").with_key("k1"))
            .await
            .unwrap();
        let (consumer, calls) = consumer(&broker, usize::MAX, HandlerError::retryable("db down"));

        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let dlt = broker.messages("orders.DLT").await;
        assert_eq!(dlt.len(), 1);
        assert_eq!(dlt[0].value, "payload");
        assert_eq!(dlt[0].key.as_deref(), Some("k1"));
        assert_eq!(dlt[0].header(DLT_ORIGINAL_TOPIC), Some("orders"));
        assert_eq!(dlt[0].header(DLT_ORIGINAL_OFFSET), Some("0"));
        assert_eq!(dlt[0].header(DLT_EXCEPTION_MESSAGE), Some("db down"));
    }

    #[tokio::test]
    async fn non_retryable_skips_retries() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", ""))
            .await
            .unwrap();
        let (consumer, calls) =
            consumer(&broker, usize::MAX, HandlerError::non_retryable("blank"));

        consumer.poll_once().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.messages("orders.DLT").await.len(), 1);
    }

    #[tokio::test]
    async fn discarded_message_is_committed_without_dead_letter() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", "??"))
            .await
            .unwrap();
        let (consumer, _) = consumer(&broker, usize::MAX, HandlerError::discard("unknown type"));

        consumer.poll_once().await.unwrap();
        assert!(broker.messages("orders.DLT").await.is_empty());
        broker.rewind("g").await;
        assert!(broker.poll("g", "orders", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_message_twice_is_handled_once() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", "m"))
            .await
            .unwrap();
        let (consumer, calls) = consumer(&broker, 0, HandlerError::discard("unused"));

        let message = broker.poll("g", "orders", 1).await.unwrap().remove(0);
        assert_eq!(consumer.process(&message).await.unwrap(), Delivery::Processed);
        assert_eq!(consumer.process(&message).await.unwrap(), Delivery::Duplicate);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn groups_sharing_a_guard_each_handle_the_record() {
        let broker = InMemoryBroker::new(1);
        broker.publish(ProducerRecord::new("t", "m")).await.unwrap();
        let guard: Arc<dyn IdempotencyGuard> = Arc::new(InMemoryIdempotencyGuard::new());

        let counted = |group: &str| {
            let calls = Arc::new(AtomicUsize::new(0));
            let consumer = Consumer::new(
                broker.clone(),
                Scripted {
                    calls: calls.clone(),
                    fail_times: 0,
                    error: HandlerError::discard("unused"),
                },
                guard.clone(),
                ConsumerConfig::new(group, "t").with_retry(fast_retry()),
            );
            (consumer, calls)
        };
        let (group_a, calls_a) = counted("group-a");
        let (group_b, calls_b) = counted("group-b");

        assert_eq!(group_a.poll_once().await.unwrap(), 1);
        assert_eq!(group_b.poll_once().await.unwrap(), 1);
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);

        broker.rewind("group-b").await;
        let message = broker.poll("peek", "t", 1).await.unwrap().remove(0);
        assert_eq!(group_b.process(&message).await.unwrap(), Delivery::Duplicate);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_broker_leaves_message_uncommitted() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", "m"))
            .await
            .unwrap();
        let (consumer, _) = consumer(&broker, 0, HandlerError::discard("unused"));

        broker.set_available(false);
        assert!(consumer.poll_once().await.is_err());
        broker.set_available(true);
        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(consumer.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_dead_letter_publish_refetches_the_batch() {
        let broker = InMemoryBroker::new(1);
        broker
            .publish(ProducerRecord::new("orders", "a"))
            .await
            .unwrap();
        broker
            .publish(ProducerRecord::new("orders", "b"))
            .await
            .unwrap();

        struct GoOffline(InMemoryBroker);

        #[async_trait]
        impl MessageHandler for GoOffline {
            async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
                self.0.set_available(false);
                Err(HandlerError::non_retryable("bad"))
            }
        }

        let consumer = Consumer::new(
            broker.clone(),
            GoOffline(broker.clone()),
            Arc::new(InMemoryIdempotencyGuard::new()),
            ConsumerConfig::new("g", "orders").with_retry(fast_retry()),
        );
        assert!(consumer.poll_once().await.is_err());

        broker.set_available(true);
        let refetched = broker.poll("g", "orders", 10).await.unwrap();
        assert_eq!(refetched.len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let broker = InMemoryBroker::new(1);
        let (consumer, _) = consumer(&broker, 0, HandlerError::discard("unused"));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(consumer.run(rx));
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
