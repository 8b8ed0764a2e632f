//! Batch consumer: handles a whole poll at once and acknowledges it as a unit.
//!
//! Unlike [`Consumer`](crate::Consumer) there are no retries and no
//! dead-letter topic. A record that fails is counted and left behind; it
//! never stops the rest of the batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::broker::{Broker, Message};
use crate::consumer::{ConsumerConfig, HandlerError, MessageHandler};
use crate::error::BrokerError;
use crate::idempotency::{IdempotencyGuard, MessageKey};

/// Outcome counts of one or more batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: u64,
    pub succeeded: u64,
    /// Already processed by this group.
    pub skipped: u64,
    pub failed: u64,
}

/// Running totals across every batch of one consumer.
#[derive(Clone, Default)]
pub struct BatchStats {
    total: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BatchReport {
        BatchReport {
            total: self.total.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, report: &BatchReport) {
        self.total.fetch_add(report.total, Ordering::Relaxed);
        self.succeeded.fetch_add(report.succeeded, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped, Ordering::Relaxed);
        self.failed.fetch_add(report.failed, Ordering::Relaxed);
    }
}

/// Accepts any record with a non-blank payload.
#[derive(Clone, Default)]
pub struct BatchRecordHandler;

#[async_trait]
impl MessageHandler for BatchRecordHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        if message.value.trim().is_empty() {
            return Err(HandlerError::NonRetryable(format!(
                "payload is blank, key={}",
                message.key.as_deref().unwrap_or("")
            )));
        }
        tracing::debug!(
            partition = message.partition,
            offset = message.offset,
            key = message.key.as_deref().unwrap_or(""),
            "batch record processed"
        );
        Ok(())
    }
}

/// Drives one handler over one topic, a batch at a time.
pub struct BatchConsumer<B: Broker, H: MessageHandler> {
    broker: B,
    handler: H,
    guard: Arc<dyn IdempotencyGuard>,
    config: ConsumerConfig,
    stats: BatchStats,
}

impl<B: Broker, H: MessageHandler> BatchConsumer<B, H> {
    /// Only `group`, `topic`, `max_poll_records` and `poll_interval` of
    /// `config` apply.
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
            stats: BatchStats::new(),
        }
    }

    /// Reports into `stats` instead of a private counter set.
    pub fn with_stats(mut self, stats: BatchStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Polls once, handles every record and commits the batch.
    #[tracing::instrument(skip(self), fields(group = %self.config.group, topic = %self.config.topic))]
    pub async fn poll_batch(&self) -> Result<BatchReport, BrokerError> {
        let records = self
            .broker
            .poll(
                &self.config.group,
                &self.config.topic,
                self.config.max_poll_records,
            )
            .await?;
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let started = Instant::now();
        let mut report = BatchReport {
            total: records.len() as u64,
            ..BatchReport::default()
        };

        for record in &records {
            let key = MessageKey::for_message(&self.config.group, record);
            if self.guard.is_processed(&key).await {
                report.skipped += 1;
                continue;
            }
            match self.handler.handle(record).await {
                Ok(()) => {
                    self.guard.mark_processed(&key).await;
                    report.succeeded += 1;
                }
                Err(err) => {
                    tracing::error!(
                        partition = record.partition,
                        offset = record.offset,
                        error = %err,
                        "batch record failed"
                    );
                    report.failed += 1;
                }
            }
        }

        if let Err(err) = self.commit(&records).await {
            self.broker
                .seek_to_committed(&self.config.group, &self.config.topic)
                .await?;
            return Err(err);
        }

        self.stats.record(&report);
        metrics::counter!("batch_records_total", "outcome" => "succeeded")
            .increment(report.succeeded);
        metrics::counter!("batch_records_total", "outcome" => "skipped").increment(report.skipped);
        metrics::counter!("batch_records_total", "outcome" => "failed").increment(report.failed);
        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch processed"
        );
        Ok(report)
    }

    /// Commits the last record of each partition.
    async fn commit(&self, records: &[Message]) -> Result<(), BrokerError> {
        let mut last: BTreeMap<i32, &Message> = BTreeMap::new();
        for record in records {
            last.insert(record.partition, record);
        }
        for record in last.values() {
            self.broker.commit(&self.config.group, record).await?;
        }
        Ok(())
    }

    /// Polls until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            group = %self.config.group,
            topic = %self.config.topic,
            "batch consumer started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetched = match self.poll_batch().await {
                Ok(report) => report.total,
                Err(err) => {
                    tracing::warn!(topic = %self.config.topic, error = %err, "batch poll failed");
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
        tracing::info!(topic = %self.config.topic, "batch consumer stopped");
    }
}
