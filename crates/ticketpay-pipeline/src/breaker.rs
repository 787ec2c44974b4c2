//! Circuit breaker around the payment network.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls are rejected without reaching the network until
//!   `reset_timeout` has passed since the last failure.
//! - **`HalfOpen`**: one trial call is admitted. Success closes the circuit,
//!   failure re-opens it and restarts the cooldown.
//!
//! One breaker is shared by every transfer of a [`SettlementService`](crate::SettlementService).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::BreakerConfig;

/// Circuit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through.
    Closed,
    /// Requests are rejected.
    Open,
    /// A single trial request is allowed.
    HalfOpen,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    /// Circuit position.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the last failure was recorded.
    pub last_failure_at: Option<Instant>,
    /// When a call was last admitted.
    pub last_attempt_at: Option<Instant>,
}

/// Call and rejection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerMetrics {
    /// Calls submitted to `execute`.
    pub calls: u64,
    /// Calls rejected without running.
    pub rejections: u64,
    /// Admitted calls that failed.
    pub failures: u64,
}

/// Errors from [`CircuitBreaker::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not run.
    #[error("circuit breaker is open")]
    Open,

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    snapshot: CircuitBreakerState,
    trial_in_flight: bool,
}

/// Failure-counting circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: RwLock<Inner>,
    calls: AtomicU64,
    rejections: AtomicU64,
    failures: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                snapshot: CircuitBreakerState {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    last_failure_at: None,
                    last_attempt_at: None,
                },
                trial_in_flight: false,
            }),
            calls: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Current circuit position.
    ///
    /// An open circuit whose cooldown elapsed reports `Open` until the next
    /// call moves it to `HalfOpen`.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.snapshot.state
    }

    /// Copy of the full breaker state.
    pub async fn snapshot(&self) -> CircuitBreakerState {
        self.inner.read().await.snapshot
    }

    /// Counters.
    #[must_use]
    pub fn metrics(&self) -> BreakerMetrics {
        BreakerMetrics {
            calls: self.calls.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// # Errors
    ///
    /// - `BreakerError::Open` if the call was rejected.
    /// - `BreakerError::Inner` if the operation failed.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if !self.admit().await {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Circuit breaker open, rejecting call");
            return Err(BreakerError::Open);
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.on_failure().await;
                Err(BreakerError::Inner(err))
            }
        }
    }

    async fn admit(&self) -> bool {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        let admitted = match inner.snapshot.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .snapshot
                    .last_failure_at
                    .map_or(true, |at| now.duration_since(at) >= self.config.reset_timeout);
                if cooled {
                    tracing::info!("Circuit breaker transitioning OPEN -> HALF_OPEN");
                    inner.snapshot.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                }
                cooled
            }
            CircuitState::HalfOpen => {
                // A trial that never reported back (its future was dropped) stops
                // blocking after one more cooldown.
                let stale = inner
                    .snapshot
                    .last_attempt_at
                    .map_or(true, |at| now.duration_since(at) >= self.config.reset_timeout);
                if inner.trial_in_flight && !stale {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        };

        if admitted {
            inner.snapshot.last_attempt_at = Some(now);
        }
        admitted
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        if inner.snapshot.state != CircuitState::Closed {
            tracing::info!("Circuit breaker transitioning HALF_OPEN -> CLOSED");
        }
        inner.snapshot.state = CircuitState::Closed;
        inner.snapshot.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.snapshot.last_failure_at = Some(Instant::now());
        inner.snapshot.consecutive_failures = inner.snapshot.consecutive_failures.saturating_add(1);

        match inner.snapshot.state {
            CircuitState::Closed => {
                if inner.snapshot.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = inner.snapshot.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    inner.snapshot.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit breaker transitioning HALF_OPEN -> OPEN (trial failed)");
                inner.snapshot.state = CircuitState::Open;
                inner.trial_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }
}
