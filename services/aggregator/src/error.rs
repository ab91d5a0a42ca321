//! Error types for the aggregation core

use thiserror::Error;
use types::DomainError;

/// Result type alias for aggregation operations
pub type Result<T> = std::result::Result<T, AggregatorError>;

/// Main error type for the aggregation core
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// A provider call failed
    #[error("Provider {provider} failed: {reason}")]
    Provider {
        /// The provider that failed
        provider: String,
        /// Reason for the failure
        reason: String,
    },

    /// A provider's circuit breaker refused the call
    #[error("Circuit breaker open for provider {provider}")]
    CircuitOpen {
        /// The provider whose circuit is open
        provider: String,
    },

    /// Rate limit admission failed
    ///
    /// Transparently resolved by `wait_for_slot`; only surfaces from
    /// non-blocking admission checks.
    #[error("Rate limited for provider {provider}")]
    RateLimited {
        /// The provider that is throttled
        provider: String,
    },

    /// Another sync cycle is already in flight
    #[error("Sync already in progress")]
    SyncInProgress,

    /// No portfolio stored under the given id
    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(String),

    /// Unknown provider identifier
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Persistence port failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Valuator port failure
    #[error("Valuation error: {0}")]
    Valuation(String),

    /// Configuration error in aggregator settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Optional port capability not implemented by this provider
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Domain invariant violation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// JSON (de)serialization failure
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AggregatorError {
    /// Create a provider failure
    pub fn provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        AggregatorError::Provider {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable through retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AggregatorError::Provider { .. }
                | AggregatorError::CircuitOpen { .. }
                | AggregatorError::RateLimited { .. }
                | AggregatorError::SyncInProgress
                | AggregatorError::Repository(_)
                | AggregatorError::Valuation(_)
        )
    }

    /// Check if this error should be recorded against a provider's breaker
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            AggregatorError::Provider { .. } | AggregatorError::Repository(_)
        )
    }
}
