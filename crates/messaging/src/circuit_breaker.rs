//! Count-based circuit breaker guarding the broker and the payment gateway.
//!
//! ```text
//!            failure or slow-call rate ≥ threshold
//!   CLOSED ───────────────────────────────────────► OPEN
//!     ▲                                               │
//!     │ trials healthy          wait duration elapsed │
//!     │                                               ▼
//!     └──────────────────── HALF_OPEN ◄───────────────┘
//!                               │ trials unhealthy
//!                               └──────────────────► OPEN
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Registry name of the breaker guarding payment gateway calls.
pub const PAYMENT_CIRCUIT_BREAKER: &str = "payment";

/// Registry name of the breaker guarding outbox publication.
pub const BROKER_CIRCUIT_BREAKER: &str = "broker";

/// Policy of one breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Percentage of failed calls that opens the breaker.
    pub failure_rate_threshold: f32,
    /// Percentage of slow calls that opens the breaker.
    pub slow_call_rate_threshold: f32,
    /// Calls taking at least this long count as slow.
    pub slow_call_duration: Duration,
    pub wait_duration_in_open: Duration,
    pub permitted_calls_in_half_open: usize,
    /// Number of most recent calls considered.
    pub sliding_window_size: usize,
    /// Rates are not evaluated before this many calls were recorded.
    pub minimum_number_of_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_duration: Duration::from_secs(2),
            wait_duration_in_open: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
            sliding_window_size: 10,
            minimum_number_of_calls: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn payment() -> Self {
        Self {
            slow_call_rate_threshold: 80.0,
            slow_call_duration: Duration::from_secs(3),
            wait_duration_in_open: Duration::from_secs(60),
            ..Self::default()
        }
    }

    pub fn broker() -> Self {
        Self {
            failure_rate_threshold: 70.0,
            slow_call_rate_threshold: 90.0,
            slow_call_duration: Duration::from_secs(5),
            wait_duration_in_open: Duration::from_secs(30),
            permitted_calls_in_half_open: 5,
            sliding_window_size: 20,
            minimum_number_of_calls: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A call was rejected without being attempted.
#[derive(Debug, Clone, Error)]
#[error("CircuitBreaker '{name}' is OPEN and does not permit further calls")]
pub struct CallNotPermitted {
    pub name: String,
}

/// Outcome of [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    NotPermitted(#[from] CallNotPermitted),

    #[error("{0}")]
    Failed(E),
}

/// Counters of the current window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerMetrics {
    pub failure_rate: f32,
    pub slow_call_rate: f32,
    pub number_of_buffered_calls: usize,
    pub number_of_failed_calls: usize,
    pub number_of_successful_calls: usize,
    pub number_of_slow_calls: usize,
    pub number_of_not_permitted_calls: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub metrics: CircuitBreakerMetrics,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    failed: bool,
    slow: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Rates {
    calls: usize,
    failed: usize,
    slow: usize,
}

impl Rates {
    fn of<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Self {
        outcomes.into_iter().fold(Self::default(), |mut acc, o| {
            acc.calls += 1;
            acc.failed += usize::from(o.failed);
            acc.slow += usize::from(o.slow);
            acc
        })
    }

    fn percent(part: usize, total: usize) -> f32 {
        if total == 0 {
            0.0
        } else {
            part as f32 * 100.0 / total as f32
        }
    }

    fn failure_rate(&self) -> f32 {
        Self::percent(self.failed, self.calls)
    }

    fn slow_call_rate(&self) -> f32 {
        Self::percent(self.slow, self.calls)
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: VecDeque<Outcome>,
    opened_at: Option<Instant>,
    /// Set by an operator; suppresses the automatic move to HALF_OPEN.
    forced: bool,
    half_open_permits: usize,
    half_open_outcomes: Vec<Outcome>,
    not_permitted: u64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            forced: false,
            half_open_permits: 0,
            half_open_outcomes: Vec::new(),
            not_permitted: 0,
        }
    }
}

/// A named breaker. Synchronous and cheap to consult; share it behind an
/// [`Arc`].
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Asks for permission to make one call.
    pub fn try_acquire(&self) -> Result<(), CallNotPermitted> {
        let mut inner = self.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen
                if inner.half_open_permits < self.config.permitted_calls_in_half_open =>
            {
                inner.half_open_permits += 1;
                Ok(())
            }
            _ => {
                inner.not_permitted += 1;
                metrics::counter!("circuit_breaker_not_permitted_total", "name" => self.name.clone())
                    .increment(1);
                Err(CallNotPermitted {
                    name: self.name.clone(),
                })
            }
        }
    }

    pub fn on_success(&self, duration: Duration) {
        self.record(Outcome {
            failed: false,
            slow: duration >= self.config.slow_call_duration,
        });
    }

    pub fn on_error(&self, duration: Duration) {
        self.record(Outcome {
            failed: true,
            slow: duration >= self.config.slow_call_duration,
        });
    }

    /// Runs `f` if permitted and records its outcome and duration.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        let started = Instant::now();
        let result = f().await;
        let elapsed = started.elapsed();
        match result {
            Ok(value) => {
                self.on_success(elapsed);
                Ok(value)
            }
            Err(err) => {
                self.on_error(elapsed);
                Err(CallError::Failed(err))
            }
        }
    }

    /// CLOSED with an empty window and counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.window.clear();
        inner.not_permitted = 0;
    }

    /// OPEN until an operator closes or resets the breaker.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Open);
        inner.forced = true;
    }

    pub fn close(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        let rates = match inner.state {
            CircuitState::HalfOpen => Rates::of(&inner.half_open_outcomes),
            _ => Rates::of(&inner.window),
        };
        CircuitBreakerMetrics {
            failure_rate: rates.failure_rate(),
            slow_call_rate: rates.slow_call_rate(),
            number_of_buffered_calls: rates.calls,
            number_of_failed_calls: rates.failed,
            number_of_successful_calls: rates.calls - rates.failed,
            number_of_slow_calls: rates.slow,
            number_of_not_permitted_calls: inner.not_permitted,
        }
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: self.state(),
            metrics: self.metrics(),
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        let wait_elapsed = inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.wait_duration_in_open);
        if inner.state == CircuitState::Open && !inner.forced && wait_elapsed {
            self.transition(inner, CircuitState::HalfOpen);
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(outcome);
                while inner.window.len() > self.config.sliding_window_size {
                    inner.window.pop_front();
                }
                let rates = Rates::of(&inner.window);
                if rates.calls >= self.config.minimum_number_of_calls && self.exceeded(&rates) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_outcomes.push(outcome);
                if inner.half_open_outcomes.len() >= self.config.permitted_calls_in_half_open {
                    let rates = Rates::of(&inner.half_open_outcomes);
                    let next = if self.exceeded(&rates) {
                        CircuitState::Open
                    } else {
                        CircuitState::Closed
                    };
                    self.transition(&mut inner, next);
                }
            }
            // Calls admitted before the breaker opened.
            CircuitState::Open => {}
        }
    }

    fn exceeded(&self, rates: &Rates) -> bool {
        let failure_rate = rates.failure_rate();
        let slow_call_rate = rates.slow_call_rate();
        if failure_rate >= self.config.failure_rate_threshold {
            tracing::error!(circuit_breaker = %self.name, failure_rate, "failure rate exceeded");
            return true;
        }
        if slow_call_rate >= self.config.slow_call_rate_threshold {
            tracing::warn!(circuit_breaker = %self.name, slow_call_rate, "slow call rate exceeded");
            return true;
        }
        false
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        inner.forced = false;
        inner.half_open_permits = 0;
        inner.half_open_outcomes.clear();
        match to {
            CircuitState::Closed => {
                inner.window.clear();
                inner.opened_at = None;
            }
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::HalfOpen => {}
        }

        tracing::warn!(
            circuit_breaker = %self.name,
            from = %from,
            to = %to,
            "circuit breaker state changed"
        );
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "name" => self.name.clone(),
            "state" => to.as_str()
        )
        .increment(1);
    }
}

/// Breakers by name, for the operational surface.
#[derive(Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<BTreeMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker named `name`, creating it with `config` if absent.
    pub fn circuit_breaker(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Every registered breaker, ordered by name.
    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration: Duration::from_secs(1),
            wait_duration_in_open: Duration::from_secs(10),
            permitted_calls_in_half_open: 2,
            sliding_window_size: 4,
            minimum_number_of_calls: 4,
        }
    }

    fn fail(breaker: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            breaker.try_acquire().unwrap();
            breaker.on_error(Duration::ZERO);
        }
    }

    fn succeed(breaker: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            breaker.try_acquire().unwrap();
            breaker.on_success(Duration::ZERO);
        }
    }

    #[test]
    fn presets() {
        let payment = CircuitBreakerConfig::payment();
        assert_eq!(payment.failure_rate_threshold, 50.0);
        assert_eq!(payment.slow_call_rate_threshold, 80.0);
        assert_eq!(payment.wait_duration_in_open, Duration::from_secs(60));

        let broker = CircuitBreakerConfig::broker();
        assert_eq!(broker.sliding_window_size, 20);
        assert_eq!(broker.minimum_number_of_calls, 10);
    }

    #[test]
    fn stays_closed_below_minimum_calls() {
        let breaker = CircuitBreaker::new("t", small());
        fail(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_at_failure_threshold_and_rejects() {
        let breaker = CircuitBreaker::new("t", small());
        succeed(&breaker, 2);
        fail(&breaker, 2);

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
        assert_eq!(breaker.metrics().number_of_not_permitted_calls, 1);
    }

    #[test]
    fn slow_calls_open_the_breaker() {
        let config = CircuitBreakerConfig {
            slow_call_rate_threshold: 50.0,
            failure_rate_threshold: 100.0,
            ..small()
        };
        let breaker = CircuitBreaker::new("t", config);
        for _ in 0..4 {
            breaker.try_acquire().unwrap();
            breaker.on_success(Duration::from_secs(2));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.metrics().number_of_slow_calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn half_opens_after_wait_and_closes_on_healthy_trials() {
        let breaker = CircuitBreaker::new("t", small());
        fail(&breaker, 4);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().number_of_buffered_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_limits_trial_calls_and_reopens_on_failure() {
        let breaker = CircuitBreaker::new("t", small());
        fail(&breaker, 4);
        tokio::time::advance(Duration::from_secs(11)).await;

        breaker.try_acquire().unwrap();
        breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());

        breaker.on_error(Duration::ZERO);
        breaker.on_error(Duration::ZERO);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_open_ignores_wait_until_closed() {
        let breaker = CircuitBreaker::new("t", small());
        breaker.force_open();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.close();
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn reset_clears_window_and_counters() {
        let breaker = CircuitBreaker::new("t", small());
        fail(&breaker, 4);
        let _ = breaker.try_acquire();
        breaker.reset();

        let metrics = breaker.metrics();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(metrics.number_of_buffered_calls, 0);
        assert_eq!(metrics.number_of_not_permitted_calls, 0);
    }

    #[tokio::test]
    async fn call_records_failures_and_maps_rejection() {
        let breaker = CircuitBreaker::new("t", small());
        for _ in 0..4 {
            let result: Result<(), CallError<&str>> = breaker.call(|| async { Err("boom") }).await;
            assert!(matches!(result, Err(CallError::Failed("boom"))));
        }

        let rejected: Result<(), CallError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(CallError::NotPermitted(_))));
    }

    #[test]
    fn registry_returns_same_breaker_by_name() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.circuit_breaker("payment", CircuitBreakerConfig::payment());
        let b = registry.circuit_breaker("payment", CircuitBreakerConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("broker").is_none());

        registry.circuit_breaker("broker", CircuitBreakerConfig::broker());
        let names: Vec<_> = registry.all().iter().map(|b| b.name().to_string()).collect();
        assert_eq!(names, vec!["broker", "payment"]);
    }
}
