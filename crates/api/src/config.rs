//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::{BATCH_TOPIC, PRODUCT_TOPIC};
use domain::PaymentMethod;
use messaging::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, DEFAULT_PARTITIONS, RetryPolicy};
use saga::{GatewaySimulation, PaymentGatewayClient, SimulatedPaymentGateway};

/// Server and worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; the in-memory store is used when unset
/// - `BROKER_PARTITIONS`: partitions per topic (default: `3`)
/// - `OUTBOX_RELAY_INTERVAL_MS`, `OUTBOX_RELAY_BATCH_SIZE`: relay cadence (default: `5000`, `100`)
/// - `CONSUMER_MAX_ATTEMPTS`, `CONSUMER_BACKOFF_INITIAL_MS`, `CONSUMER_BACKOFF_MULTIPLIER`,
///   `CONSUMER_BACKOFF_MAX_MS`: retry policy before dead-lettering (default: `3`, `1000`, `2.0`, `10000`)
/// - `INGESTION_TOPIC`: topic of the product ingestion consumer (default: `"product-topic"`)
/// - `BATCH_TOPIC`: topic of the batch consumer (default: `"batch-topic"`)
/// - `PAYMENT_METHOD`: method passed to the gateway (default: `"CARD"`)
/// - `PAYMENT_GATEWAY_DELAY_MS`, `PAYMENT_GATEWAY_DELAY_JITTER_MS`,
///   `PAYMENT_GATEWAY_FAILURE_RATE`, `PAYMENT_GATEWAY_SLOW_RATE`,
///   `PAYMENT_GATEWAY_SLOW_DELAY_MS`, `PAYMENT_GATEWAY_TIMEOUT_MS`: gateway simulation switches
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub partitions: usize,
    pub relay_interval: Duration,
    pub relay_batch_size: usize,
    pub retry: RetryPolicy,
    pub ingestion_topic: String,
    pub batch_topic: String,
    pub payment_method: PaymentMethod,
    pub gateway: GatewaySimulation,
    pub gateway_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Unparsable values
    /// fall back to their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };
        let rate = |key: &str, default: f64| {
            lookup(key)
                .and_then(|v| f64::from_str(v.trim()).ok())
                .filter(|r| r.is_finite())
                .map(|r| r.clamp(0.0, 1.0))
                .unwrap_or(default)
        };

        let retry = RetryPolicy {
            max_attempts: parsed("CONSUMER_MAX_ATTEMPTS")
                .map(|n| n.max(1) as u32)
                .unwrap_or(defaults.retry.max_attempts),
            initial_delay: millis("CONSUMER_BACKOFF_INITIAL_MS", defaults.retry.initial_delay),
            multiplier: lookup("CONSUMER_BACKOFF_MULTIPLIER")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.retry.multiplier),
            max_delay: millis("CONSUMER_BACKOFF_MAX_MS", defaults.retry.max_delay),
        };

        let gateway = GatewaySimulation {
            delay: millis("PAYMENT_GATEWAY_DELAY_MS", defaults.gateway.delay),
            delay_jitter: millis(
                "PAYMENT_GATEWAY_DELAY_JITTER_MS",
                defaults.gateway.delay_jitter,
            ),
            failure_rate: rate("PAYMENT_GATEWAY_FAILURE_RATE", defaults.gateway.failure_rate),
            slow_call_rate: rate("PAYMENT_GATEWAY_SLOW_RATE", defaults.gateway.slow_call_rate),
            slow_call_delay: millis(
                "PAYMENT_GATEWAY_SLOW_DELAY_MS",
                defaults.gateway.slow_call_delay,
            ),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            partitions: parsed("BROKER_PARTITIONS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.partitions),
            relay_interval: millis("OUTBOX_RELAY_INTERVAL_MS", defaults.relay_interval),
            relay_batch_size: parsed("OUTBOX_RELAY_BATCH_SIZE")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.relay_batch_size),
            retry,
            ingestion_topic: lookup("INGESTION_TOPIC")
                .filter(|topic| !topic.trim().is_empty())
                .unwrap_or(defaults.ingestion_topic),
            batch_topic: lookup("BATCH_TOPIC")
                .filter(|topic| !topic.trim().is_empty())
                .unwrap_or(defaults.batch_topic),
            payment_method: lookup("PAYMENT_METHOD")
                .and_then(|m| serde_json::from_value(serde_json::Value::String(m)).ok())
                .unwrap_or(defaults.payment_method),
            gateway,
            gateway_timeout: millis("PAYMENT_GATEWAY_TIMEOUT_MS", defaults.gateway_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            partitions: DEFAULT_PARTITIONS,
            relay_interval: DEFAULT_INTERVAL,
            relay_batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            ingestion_topic: PRODUCT_TOPIC.to_string(),
            batch_topic: BATCH_TOPIC.to_string(),
            payment_method: PaymentMethod::default(),
            gateway: GatewaySimulation::default(),
            gateway_timeout: PaymentGatewayClient::<SimulatedPaymentGateway>::DEFAULT_TIMEOUT,
        }
    }
}
