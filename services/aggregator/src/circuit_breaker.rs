//! Circuit breaker pattern for per-provider failure isolation
//!
//! ## States
//!
//! ```text
//! CLOSED ──failure_threshold──> OPEN ──recovery_timeout──> HALF_OPEN
//!   │                            ▲                            │
//!   └──── half_open_retries ─────┴──────── failure ───────────┘
//!             successes
//! ```
//!
//! - **Closed**: requests pass through; consecutive failures count up.
//! - **Open**: requests are rejected immediately; after
//!   `recovery_timeout` the next state inspection moves to HalfOpen.
//! - **HalfOpen**: up to `half_open_retries` concurrent probes are
//!   admitted; that many successes close the circuit, any failure
//!   re-opens it with a fresh retry deadline.

use crate::error::{AggregatorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests are rejected
    Open,
    /// Testing recovery - limited probe requests allowed
    HalfOpen,
}

impl CircuitState {
    /// Whether requests pass through unconditionally
    pub fn is_closed(&self) -> bool {
        matches!(self, CircuitState::Closed)
    }

    /// Whether requests are being rejected
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open)
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before admitting probes again
    pub recovery_timeout: Duration,
    /// Probe successes needed to close the circuit from half-open
    pub half_open_retries: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_retries: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    half_open_attempts: u32,
    half_open_probes: u32,
    next_retry: Option<Instant>,
    next_retry_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_attempts: 0,
            half_open_probes: 0,
            next_retry: None,
            next_retry_at: None,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    /// Lazy Open -> HalfOpen transition once the retry deadline has passed
    fn refresh(&mut self, provider: &str) {
        if self.state == CircuitState::Open {
            if let Some(deadline) = self.next_retry {
                if Instant::now() >= deadline {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_attempts = 0;
                    self.half_open_probes = 0;
                    tracing::info!(provider, "Circuit breaker transitioning to half-open");
                }
            }
        }
    }

    fn trip(&mut self, provider: &str, recovery_timeout: Duration) {
        self.state = CircuitState::Open;
        self.next_retry = Some(Instant::now() + recovery_timeout);
        self.next_retry_at = Some(
            Utc::now()
                + chrono::Duration::from_std(recovery_timeout)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
        );
        tracing::warn!(
            provider,
            failures = self.failure_count,
            "Circuit breaker opened"
        );
    }
}

/// Statistics exposed for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failure count
    pub failure_count: u32,
    /// Probe successes recorded in the current half-open episode
    pub half_open_attempts: u32,
    /// Total requests attempted through the breaker
    pub total_requests: u64,
    /// Total failed requests
    pub total_failures: u64,
    /// Number of times the circuit opened
    pub circuit_opens: u64,
    /// Last successful call
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last failed call
    pub last_failure_at: Option<DateTime<Utc>>,
    /// When probes will next be admitted, if currently open
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Per-provider circuit breaker
pub struct CircuitBreaker {
    provider: String,
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,

    // Metrics
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    circuit_opens: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker for one provider
    pub fn new(provider: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: RwLock::new(BreakerState::new()),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
        }
    }

    /// The provider this breaker guards
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Execute an operation through the breaker
    ///
    /// Rejected calls fail with [`AggregatorError::CircuitOpen`] without
    /// running the operation; otherwise the outcome is recorded and the
    /// underlying result returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if !self.try_admit().await {
            return Err(AggregatorError::CircuitOpen {
                provider: self.provider.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }

    /// Check admission, reserving a probe slot in half-open
    async fn try_admit(&self) -> bool {
        let mut state = self.state.write().await;
        state.refresh(&self.provider);

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_probes < self.config.half_open_retries {
                    state.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.last_success_at = Some(Utc::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.half_open_attempts += 1;
                if state.half_open_attempts >= self.config.half_open_retries {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.next_retry = None;
                    state.next_retry_at = None;
                    tracing::info!(
                        provider = %self.provider,
                        successes = state.half_open_attempts,
                        "Circuit breaker closed"
                    );
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        state.last_failure_at = Some(Utc::now());
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    self.circuit_opens.fetch_add(1, Ordering::Relaxed);
                    state.trip(&self.provider, self.config.recovery_timeout);
                }
            }
            CircuitState::HalfOpen => {
                self.circuit_opens.fetch_add(1, Ordering::Relaxed);
                state.trip(&self.provider, self.config.recovery_timeout);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, applying the lazy Open -> HalfOpen transition
    pub async fn state(&self) -> CircuitState {
        let mut state = self.state.write().await;
        state.refresh(&self.provider);
        state.state
    }

    /// Reset to Closed with zeroed counters
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = BreakerState::new();
        tracing::info!(provider = %self.provider, "Circuit breaker reset");
    }

    /// Snapshot of state and counters
    pub async fn stats(&self) -> CircuitBreakerStats {
        let mut state = self.state.write().await;
        state.refresh(&self.provider);
        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            half_open_attempts: state.half_open_attempts,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            circuit_opens: self.circuit_opens.load(Ordering::Relaxed),
            last_success_at: state.last_success_at,
            last_failure_at: state.last_failure_at,
            next_retry_at: if state.state == CircuitState::Open {
                state.next_retry_at
            } else {
                None
            },
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
