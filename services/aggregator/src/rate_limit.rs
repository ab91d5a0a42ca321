//! Rate limiting for provider requests
//!
//! Two interchangeable strategies behind one type: a token bucket
//! (smooth refill at `requests_per_minute`, capacity `burst_limit`) and a
//! sliding window (at most `burst_limit` admissions per trailing minute).
//! `wait_for_slot` blocks cooperatively, polling on ticks of at most
//! 100 ms so it never stalls the scheduler.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Length of the sliding admission window
const WINDOW: Duration = Duration::from_secs(60);

/// Maximum cooperative polling tick inside `wait_for_slot`
const POLL_TICK: Duration = Duration::from_millis(100);

/// Configuration for rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request budget per minute
    pub requests_per_minute: u32,
    /// Maximum burst size; defaults to `requests_per_minute`
    pub burst_limit: Option<u32>,
}

impl RateLimitConfig {
    /// Config with the default burst (equal to the sustained rate)
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            burst_limit: None,
        }
    }

    /// Effective burst capacity
    pub fn burst(&self) -> u32 {
        self.burst_limit.unwrap_or(self.requests_per_minute)
    }

    /// Refill rate in tokens per millisecond
    fn refill_per_ms(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60_000.0
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Which admission strategy a limiter runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Token bucket: smooth refill, burst capacity
    TokenBucket,
    /// Sliding window: hard cap per trailing minute
    SlidingWindow,
}

#[derive(Debug)]
enum LimiterState {
    TokenBucket {
        tokens: f64,
        last_refill: Instant,
    },
    SlidingWindow {
        admitted: VecDeque<Instant>,
        window: Duration,
    },
}

impl LimiterState {
    fn new(strategy: RateLimitStrategy, config: &RateLimitConfig, window: Duration) -> Self {
        match strategy {
            RateLimitStrategy::TokenBucket => LimiterState::TokenBucket {
                tokens: f64::from(config.burst()),
                last_refill: Instant::now(),
            },
            RateLimitStrategy::SlidingWindow => LimiterState::SlidingWindow {
                admitted: VecDeque::new(),
                window,
            },
        }
    }
}

/// Per-provider request throttle
pub struct RateLimiter {
    config: Mutex<RateLimitConfig>,
    strategy: RateLimitStrategy,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter with the given strategy
    pub fn new(config: RateLimitConfig, strategy: RateLimitStrategy) -> Self {
        Self {
            state: Mutex::new(LimiterState::new(strategy, &config, WINDOW)),
            config: Mutex::new(config),
            strategy,
        }
    }

    /// Token-bucket limiter
    pub fn token_bucket(config: RateLimitConfig) -> Self {
        Self::new(config, RateLimitStrategy::TokenBucket)
    }

    /// Sliding-window limiter
    pub fn sliding_window(config: RateLimitConfig) -> Self {
        Self::new(config, RateLimitStrategy::SlidingWindow)
    }

    #[cfg(test)]
    fn sliding_window_with_window(config: RateLimitConfig, window: Duration) -> Self {
        Self {
            state: Mutex::new(LimiterState::new(
                RateLimitStrategy::SlidingWindow,
                &config,
                window,
            )),
            config: Mutex::new(config),
            strategy: RateLimitStrategy::SlidingWindow,
        }
    }

    /// The strategy this limiter runs
    pub fn strategy(&self) -> RateLimitStrategy {
        self.strategy
    }

    /// Current configuration
    pub async fn config(&self) -> RateLimitConfig {
        *self.config.lock().await
    }

    /// Non-blocking admission check, consuming a slot when admitted
    pub async fn allow_request(&self) -> bool {
        let config = *self.config.lock().await;
        let mut state = self.state.lock().await;
        Self::admit(&mut state, &config)
    }

    /// Block cooperatively until a slot is available, then consume it
    pub async fn wait_for_slot(&self) {
        loop {
            let wait = {
                let config = *self.config.lock().await;
                let mut state = self.state.lock().await;
                if Self::admit(&mut state, &config) {
                    return;
                }
                Self::time_until_slot(&state, &config)
            };
            tokio::time::sleep(wait.clamp(Duration::from_millis(1), POLL_TICK)).await;
        }
    }

    /// Wait for admission, then run the operation
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.wait_for_slot().await;
        operation().await
    }

    /// Clear all admission state
    pub async fn reset(&self) {
        let config = *self.config.lock().await;
        let mut state = self.state.lock().await;
        let window = match &*state {
            LimiterState::SlidingWindow { window, .. } => *window,
            _ => WINDOW,
        };
        *state = LimiterState::new(self.strategy, &config, window);
    }

    /// Hot-swap the configuration
    ///
    /// Token-bucket balances are clamped to the new burst; a sliding
    /// window keeps its admission history and applies the new cap.
    pub async fn update_config(&self, new_config: RateLimitConfig) {
        let mut config = self.config.lock().await;
        *config = new_config;
        if let LimiterState::TokenBucket { tokens, .. } = &mut *self.state.lock().await {
            *tokens = tokens.min(f64::from(new_config.burst()));
        }
    }

    fn admit(state: &mut LimiterState, config: &RateLimitConfig) -> bool {
        match state {
            LimiterState::TokenBucket {
                tokens,
                last_refill,
            } => {
                let now = Instant::now();
                let elapsed_ms = now.duration_since(*last_refill).as_secs_f64() * 1_000.0;
                *tokens =
                    (*tokens + elapsed_ms * config.refill_per_ms()).min(f64::from(config.burst()));
                *last_refill = now;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    true
                } else {
                    false
                }
            }
            LimiterState::SlidingWindow { admitted, window } => {
                let now = Instant::now();
                let cutoff = now.checked_sub(*window);
                while let Some(oldest) = admitted.front() {
                    match cutoff {
                        Some(cutoff) if *oldest <= cutoff => {
                            admitted.pop_front();
                        }
                        _ => break,
                    }
                }

                if admitted.len() < config.burst() as usize {
                    admitted.push_back(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn time_until_slot(state: &LimiterState, config: &RateLimitConfig) -> Duration {
        match state {
            LimiterState::TokenBucket { tokens, .. } => {
                let deficit = (1.0 - tokens).max(0.0);
                let rate = config.refill_per_ms();
                if rate <= 0.0 {
                    POLL_TICK
                } else {
                    Duration::from_millis((deficit / rate).ceil() as u64)
                }
            }
            LimiterState::SlidingWindow { admitted, window } => admitted
                .front()
                .map(|oldest| window.saturating_sub(oldest.elapsed()))
                .unwrap_or(POLL_TICK),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_token_bucket_burst_then_throttle() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig {
            requests_per_minute: 600, // one token per 100ms
            burst_limit: Some(3),
        });

        for _ in 0..3 {
            assert!(limiter.allow_request().await);
        }
        assert!(!limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_token_bucket_refills_over_time() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig {
            requests_per_minute: 6_000, // one token per 10ms
            burst_limit: Some(1),
        });

        assert!(limiter.allow_request().await);
        assert!(!limiter.allow_request().await);

        sleep(Duration::from_millis(25)).await;
        assert!(limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_token_bucket_capacity_never_exceeds_burst() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig {
            requests_per_minute: 600, // one token per 100ms
            burst_limit: Some(2),
        });

        // Plenty of refill time, but only `burst` tokens accumulate.
        sleep(Duration::from_millis(30)).await;
        assert!(limiter.allow_request().await);
        assert!(limiter.allow_request().await);
        assert!(!limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_sliding_window_caps_admissions() {
        let limiter = RateLimiter::sliding_window(RateLimitConfig {
            requests_per_minute: 1_000,
            burst_limit: Some(2),
        });

        assert!(limiter.allow_request().await);
        assert!(limiter.allow_request().await);
        assert!(!limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_sliding_window_admits_after_expiry() {
        let limiter = RateLimiter::sliding_window_with_window(
            RateLimitConfig {
                requests_per_minute: 1_000,
                burst_limit: Some(1),
            },
            Duration::from_millis(30),
        );

        assert!(limiter.allow_request().await);
        assert!(!limiter.allow_request().await);

        sleep(Duration::from_millis(40)).await;
        assert!(limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_wait_for_slot_unblocks() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig {
            requests_per_minute: 6_000, // one token per 10ms
            burst_limit: Some(1),
        });
        assert!(limiter.allow_request().await);

        let start = Instant::now();
        limiter.wait_for_slot().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_execute_runs_after_admission() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig::per_minute(600));
        let value = limiter.execute(|| async { Ok(41 + 1) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_reset_restores_full_burst() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig {
            requests_per_minute: 60,
            burst_limit: Some(2),
        });
        assert!(limiter.allow_request().await);
        assert!(limiter.allow_request().await);
        assert!(!limiter.allow_request().await);

        limiter.reset().await;
        assert!(limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_update_config_clamps_tokens() {
        let limiter = RateLimiter::token_bucket(RateLimitConfig {
            requests_per_minute: 60,
            burst_limit: Some(10),
        });

        limiter
            .update_config(RateLimitConfig {
                requests_per_minute: 60,
                burst_limit: Some(1),
            })
            .await;

        assert!(limiter.allow_request().await);
        assert!(!limiter.allow_request().await);
    }

    #[tokio::test]
    async fn test_default_burst_equals_rate() {
        let config = RateLimitConfig::per_minute(120);
        assert_eq!(config.burst(), 120);

        let explicit = RateLimitConfig {
            requests_per_minute: 120,
            burst_limit: Some(10),
        };
        assert_eq!(explicit.burst(), 10);
    }
}
