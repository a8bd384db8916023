//! Circuit breaker with a sliding-window failure rate, preventing cascading
//! failures against a remote target.
//!
//! One breaker instance is shared process-wide per remote target.
//!
//! # States
//!
//! - **Closed**: requests pass through; outcomes are recorded in a sliding
//!   window of the most recent calls. Once the window is full and the failure
//!   rate reaches the threshold, the circuit opens.
//! - **Open**: requests fail immediately for the open duration.
//! - **HalfOpen**: after the open duration, probe requests are allowed; a run
//!   of successes closes the circuit, any failure reopens it.
//!
//! # Example
//!
//! ```rust
//! use commerce_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .failure_rate_threshold(0.5)
//!         .window(20)
//!         .open_duration(Duration::from_secs(30))
//!         .build(),
//! );
//!
//! match breaker.call(|| async { Ok::<_, String>(42) }).await {
//!     Ok(result) => println!("success: {result}"),
//!     Err(e) => println!("failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate in `0.0..=1.0` that opens the circuit once the window is
    /// full.
    pub failure_rate_threshold: f64,
    /// Number of most-recent calls considered.
    pub window: usize,
    /// How long to stay open before probing.
    pub open_duration: Duration,
    /// Consecutive probe successes required to close again.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            window: 20,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_rate_threshold: None,
            window: None,
            open_duration: None,
            success_threshold: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_rate_threshold: Option<f64>,
    window: Option<usize>,
    open_duration: Option<Duration>,
    success_threshold: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure rate threshold.
    #[must_use]
    pub const fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = Some(threshold);
        self
    }

    /// Set the sliding window size.
    #[must_use]
    pub const fn window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }

    /// Set how long the circuit stays open before probing.
    #[must_use]
    pub const fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = Some(duration);
        self
    }

    /// Set the probe successes required to close.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_rate_threshold: self
                .failure_rate_threshold
                .unwrap_or(defaults.failure_rate_threshold),
            window: self.window.unwrap_or(defaults.window).max(1),
            open_duration: self.open_duration.unwrap_or(defaults.open_duration),
            success_threshold: self.success_threshold.unwrap_or(defaults.success_threshold).max(1),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Requests pass through normally.
    Closed,
    /// Requests fail immediately.
    Open,
    /// Probe requests are testing recovery.
    HalfOpen,
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request rejected.
    #[error("circuit breaker is open")]
    Open,
    /// Operation failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    /// Outcomes of the most recent calls, `true` = failure.
    window: VecDeque<bool>,
    probe_successes: usize,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.window.iter().filter(|failed| **failed).count() as f64 / self.window.len() as f64
        }
    }
}

/// Sliding-window circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<BreakerState>>,
    // Metrics
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                window: VecDeque::new(),
                probe_successes: 0,
                opened_at: None,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current state of the circuit breaker.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Call an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] when the circuit rejects the
    /// call, or [`CircuitBreakerError::Inner`] when the operation fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.can_attempt().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("circuit breaker is OPEN, rejecting request");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn can_attempt(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed | State::HalfOpen => true,
            State::Open => match state.opened_at {
                Some(opened_at) if opened_at.elapsed() >= self.config.open_duration => {
                    tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                    state.state = State::HalfOpen;
                    state.probe_successes = 0;
                    true
                }
                _ => false,
            },
        }
    }

    fn record_outcome(config: &CircuitBreakerConfig, state: &mut BreakerState, failed: bool) {
        state.window.push_back(failed);
        while state.window.len() > config.window {
            state.window.pop_front();
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                Self::record_outcome(&self.config, &mut state, false);
            }
            State::HalfOpen => {
                state.probe_successes += 1;
                if state.probe_successes >= self.config.success_threshold {
                    tracing::info!(
                        probes = state.probe_successes,
                        "circuit breaker transitioning HALF_OPEN -> CLOSED"
                    );
                    state.state = State::Closed;
                    state.window.clear();
                    state.probe_successes = 0;
                    state.opened_at = None;
                }
            }
            State::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                Self::record_outcome(&self.config, &mut state, true);
                let rate = state.failure_rate();
                if state.window.len() >= self.config.window
                    && rate >= self.config.failure_rate_threshold
                {
                    tracing::warn!(
                        failure_rate = rate,
                        window = state.window.len(),
                        "circuit breaker transitioning CLOSED -> OPEN"
                    );
                    state.state = State::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                tracing::warn!("circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)");
                state.state = State::Open;
                state.opened_at = Some(Instant::now());
                state.probe_successes = 0;
            }
            State::Open => {
                state.opened_at = Some(Instant::now());
            }
        }
    }

    /// Circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker to closed, clearing the window. For tests
    /// and manual intervention.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        tracing::info!("circuit breaker manually reset to CLOSED");
        state.state = State::Closed;
        state.window.clear();
        state.probe_successes = 0;
        state.opened_at = None;
    }
}

/// Counters for circuit breaker monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Calls attempted, rejected ones included.
    pub total_calls: u64,
    /// Calls that succeeded.
    pub total_successes: u64,
    /// Calls that failed.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub total_rejections: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small_breaker(window: usize, open: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_rate_threshold(0.5)
                .window(window)
                .open_duration(open)
                .success_threshold(2)
                .build(),
        )
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Err::<i32, _>("error") }).await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Ok::<_, String>(1) }).await;
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let breaker = small_breaker(4, Duration::from_secs(30));
        succeed(&breaker).await;
        succeed(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn opens_once_window_is_full_and_rate_reached() {
        let breaker = small_breaker(4, Duration::from_secs(30));
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Closed);
        // 3 failures / 4 calls = 0.75 >= 0.5
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn rejects_while_open() {
        let breaker = small_breaker(2, Duration::from_secs(30));
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Open);

        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(breaker.metrics().total_rejections, 1);
    }

    #[tokio::test]
    async fn closes_after_successful_probes() {
        let breaker = small_breaker(2, Duration::from_millis(50));
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&breaker).await;
        assert_eq!(breaker.state().await, State::HalfOpen);
        succeed(&breaker).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn reopens_on_probe_failure() {
        let breaker = small_breaker(2, Duration::from_millis(50));
        fail(&breaker).await;
        fail(&breaker).await;

        tokio::time::sleep(Duration::from_millis(80)).await;

        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn window_slides_over_old_outcomes() {
        let breaker = small_breaker(4, Duration::from_secs(30));
        fail(&breaker).await;
        fail(&breaker).await;
        // Four successes push the failures out of the window.
        for _ in 0..4 {
            succeed(&breaker).await;
        }
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn reset_closes_the_circuit() {
        let breaker = small_breaker(2, Duration::from_secs(30));
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, State::Open);

        breaker.reset().await;
        assert_eq!(breaker.state().await, State::Closed);
    }
}
