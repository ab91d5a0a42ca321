//! Configuration module for the aggregation core
//!
//! Provides environment-based configuration with validated defaults for
//! every knob the host may set: cache freshness, default protection
//! settings, and the valuation currency.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::rate_limit::{RateLimitConfig, RateLimitStrategy};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Top-level configuration for the aggregation service and orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// How long a persisted portfolio stays fresh for the cache
    /// short-circuit, in milliseconds
    pub cache_ttl_ms: u64,

    /// Currency used for portfolio valuation and snapshots
    pub base_currency: String,

    /// TTL for the caching valuator decorator, in milliseconds
    pub price_cache_ttl_ms: u64,

    /// Default period for scheduled sync cycles, in milliseconds
    pub sync_interval_ms: u64,

    /// Default per-provider rate limit, unless overridden per provider
    pub rate_limit: RateLimitConfig,

    /// Default rate-limit strategy for new providers
    pub rate_limit_strategy: RateLimitStrategy,

    /// Default per-provider circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 300_000,
            base_currency: "USD".to_string(),
            price_cache_ttl_ms: 60_000,
            sync_interval_ms: 300_000,
            rate_limit: RateLimitConfig::per_minute(60),
            rate_limit_strategy: RateLimitStrategy::TokenBucket,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_ttl_ms: env_parse("AGGREGATOR_CACHE_TTL_MS", defaults.cache_ttl_ms),
            base_currency: env::var("AGGREGATOR_BASE_CURRENCY")
                .unwrap_or(defaults.base_currency),
            price_cache_ttl_ms: env_parse(
                "AGGREGATOR_PRICE_CACHE_TTL_MS",
                defaults.price_cache_ttl_ms,
            ),
            sync_interval_ms: env_parse("AGGREGATOR_SYNC_INTERVAL_MS", defaults.sync_interval_ms),
            rate_limit: RateLimitConfig {
                requests_per_minute: env_parse(
                    "AGGREGATOR_RATE_LIMIT_PER_MINUTE",
                    defaults.rate_limit.requests_per_minute,
                ),
                burst_limit: env::var("AGGREGATOR_RATE_LIMIT_BURST")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            },
            rate_limit_strategy: defaults.rate_limit_strategy,
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env_parse(
                    "AGGREGATOR_BREAKER_FAILURE_THRESHOLD",
                    defaults.circuit_breaker.failure_threshold,
                ),
                recovery_timeout: Duration::from_millis(env_parse(
                    "AGGREGATOR_BREAKER_RECOVERY_MS",
                    defaults.circuit_breaker.recovery_timeout.as_millis() as u64,
                )),
                half_open_retries: env_parse(
                    "AGGREGATOR_BREAKER_HALF_OPEN_RETRIES",
                    defaults.circuit_breaker.half_open_retries,
                ),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl_ms == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }
        if self.base_currency.len() != 3
            || !self.base_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(format!(
                "Base currency must be a 3-letter code, got {:?}",
                self.base_currency
            ));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err("Rate limit must be greater than 0 requests per minute".to_string());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("Circuit breaker failure threshold must be greater than 0".to_string());
        }
        if self.circuit_breaker.half_open_retries == 0 {
            return Err("Circuit breaker half-open retries must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Cache TTL as a [`Duration`]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Price-cache TTL as a [`Duration`]
    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.price_cache_ttl_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(config.cache_ttl_ms, 300_000);
        assert_eq!(config.base_currency, "USD");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        env::set_var("AGGREGATOR_CACHE_TTL_MS", "1000");
        env::set_var("AGGREGATOR_BREAKER_FAILURE_THRESHOLD", "7");

        let config = AggregatorConfig::from_env();
        assert_eq!(config.cache_ttl_ms, 1000);
        assert_eq!(config.circuit_breaker.failure_threshold, 7);

        env::remove_var("AGGREGATOR_CACHE_TTL_MS");
        env::remove_var("AGGREGATOR_BREAKER_FAILURE_THRESHOLD");
    }

    #[test]
    fn test_validation() {
        let mut config = AggregatorConfig::default();
        assert!(config.validate().is_ok());

        config.cache_ttl_ms = 0;
        assert!(config.validate().is_err());

        config.cache_ttl_ms = 1000;
        config.base_currency = "DOLLARS".to_string();
        assert!(config.validate().is_err());

        config.base_currency = "EUR".to_string();
        config.rate_limit.requests_per_minute = 0;
        assert!(config.validate().is_err());
    }
}
