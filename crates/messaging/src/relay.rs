//! Publishes PENDING outbox rows to the broker.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use store::{OutboxRecord, OutboxStore};
use tokio::sync::{Mutex, watch};

use crate::broker::{Broker, ProducerRecord};
use crate::circuit_breaker::{CallError, CircuitBreaker, CircuitState};
use crate::envelope::Envelope;
use crate::error::RelayError;

/// Default number of rows read per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time between two cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of one relay cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReport {
    /// Rows marked SENT.
    pub published: usize,
    /// Rows marked FAILED.
    pub failed: usize,
    /// The breaker was OPEN; no row was touched.
    pub skipped: bool,
    /// The breaker rejected a call mid-batch; the remaining rows stay PENDING.
    pub aborted: bool,
}

/// Relays the outbox through a circuit breaker.
///
/// Cycles never overlap: the timer and manual triggers share one lock.
pub struct OutboxRelay<S: OutboxStore, B: Broker> {
    store: S,
    broker: B,
    breaker: Arc<CircuitBreaker>,
    batch_size: usize,
    cycle: Mutex<()>,
}

impl<S: OutboxStore, B: Broker> OutboxRelay<S, B> {
    pub fn new(store: S, broker: B, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            store,
            broker,
            breaker,
            batch_size: DEFAULT_BATCH_SIZE,
            cycle: Mutex::new(()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs one cycle.
    #[tracing::instrument(skip(self))]
    pub async fn relay_once(&self) -> Result<RelayReport, RelayError> {
        let _cycle = self.cycle.lock().await;
        let mut report = RelayReport::default();

        if self.breaker.state() == CircuitState::Open {
            tracing::warn!(
                circuit_breaker = self.breaker.name(),
                "circuit breaker is OPEN, skipping outbox relay"
            );
            metrics::counter!("outbox_relay_skipped_total").increment(1);
            report.skipped = true;
            return Ok(report);
        }

        let pending = self.store.find_pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::debug!(count = pending.len(), "relaying pending outbox rows");

        for record in &pending {
            match self.publish(record).await {
                Ok(()) => {
                    self.store.mark_sent(record.id).await?;
                    report.published += 1;
                    metrics::counter!("outbox_published_total").increment(1);
                }
                Err(CallError::NotPermitted(err)) => {
                    tracing::warn!(
                        outbox_id = %record.id,
                        error = %err,
                        "circuit breaker rejected publish, aborting batch"
                    );
                    report.aborted = true;
                    break;
                }
                Err(CallError::Failed(err)) => {
                    tracing::error!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        topic = %record.topic,
                        error = %err,
                        "failed to publish outbox row"
                    );
                    self.store.mark_failed(record.id).await?;
                    report.failed += 1;
                    metrics::counter!("outbox_failed_total").increment(1);
                }
            }
        }

        tracing::info!(
            published = report.published,
            failed = report.failed,
            aborted = report.aborted,
            "outbox relay cycle finished"
        );
        Ok(report)
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<(), CallError<String>> {
        let value = Envelope::from_outbox(record)
            .encode()
            .map_err(|e| CallError::Failed(e.to_string()))?;
        let message = ProducerRecord::new(&record.topic, value).with_key(&record.aggregate_id);

        self.breaker
            .call(move || async move {
                self.broker
                    .publish(message)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await?;

        tracing::debug!(
            outbox_id = %record.id,
            event_type = %record.event_type,
            key = %record.aggregate_id,
            "outbox row published"
        );
        Ok(())
    }

    /// Runs a cycle every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(?interval, batch_size = self.batch_size, "outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.relay_once().await {
                        tracing::error!(error = %err, "outbox relay cycle failed");
                    }
                }
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::info!("outbox relay stopped");
    }
}
