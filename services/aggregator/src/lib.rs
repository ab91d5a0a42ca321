//! # Folio Aggregator - Portfolio Aggregation Core
//!
//! ## Purpose
//!
//! Library-level orchestrator that collects asset holdings for a set of
//! user-owned addresses from heterogeneous data providers (EVM chains,
//! Solana, brokerages), reconciles overlapping holdings into a single
//! deduplicated portfolio, enriches assets with market prices, and exposes
//! the result behind a stable API with a domain-event stream.
//!
//! ## Integration Points
//!
//! - **Provider ports**: injected [`AssetProvider`] implementations; the
//!   core never makes network calls of its own
//! - **Persistence ports**: [`PortfolioRepository`] and
//!   [`AddressRepository`], with in-memory reference implementations
//! - **Valuation port**: [`Valuator`], optionally wrapped in the
//!   TTL-caching [`CachedValuator`] decorator
//! - **Event bus**: optional; every pipeline stage publishes lifecycle
//!   events when one is attached and is a no-op otherwise
//!
//! ## Architecture Role
//!
//! The aggregation service fans out to providers in parallel with
//! per-provider failure isolation: one provider failing never aborts its
//! peers, and the pipeline always completes with whatever partial data was
//! gathered. The sync orchestrator wraps every provider health call in a
//! per-provider circuit breaker and rate limiter and tracks rolling
//! metrics.
//!
//! ## Example
//!
//! ```no_run
//! use aggregator_service::{
//!     AggregationParams, AggregationService, AggregatorConfig,
//!     InMemoryPortfolioRepository,
//! };
//! use std::sync::Arc;
//! use types::Chain;
//!
//! # async fn example(valuator: Arc<dyn aggregator_service::Valuator>) -> aggregator_service::Result<()> {
//! let repository = Arc::new(InMemoryPortfolioRepository::new());
//! let service = AggregationService::new(repository, valuator, AggregatorConfig::default());
//!
//! let params = AggregationParams::for_chain(
//!     Chain::Ethereum,
//!     vec!["0xd8da6bf26964af9d7eed9e03e53415d37aa96045".to_string()],
//! );
//! let portfolio = service.aggregate_portfolio(params).await?;
//! println!("{} assets", portfolio.asset_count());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Protection components
pub mod circuit_breaker;
pub mod rate_limit;

// Core pipeline
pub mod config;
pub mod error;
pub mod ports;
pub mod registry;
pub mod service;
pub mod sync;
pub mod valuation;

// Reference adapters and test support
pub mod memory;
pub mod test_utils;

// Re-export protection components
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use rate_limit::{RateLimitConfig, RateLimitStrategy, RateLimiter};

// Re-export the core surface
pub use config::AggregatorConfig;
pub use error::{AggregatorError, Result};
pub use ports::{
    AssetProvider, AddressRepository, PortfolioRepository, ProviderKind, RawAsset, RawTransaction,
    UpdateCallback, UpdateSubscription, Valuator, BROKERAGE_SENTINEL,
};
pub use registry::{
    normalize_address, validate_address, AddressEntry, AddressMetadata, AddressRegistry,
    AddressSource, WalletAccount, WalletConnection,
};
pub use service::{AggregationParams, AggregationService};
pub use sync::{
    ProviderSyncMetrics, ScheduledSync, SyncMetrics, SyncOrchestrator, SyncResult,
};
pub use valuation::CachedValuator;

// Re-export reference adapters
pub use memory::{InMemoryAddressRepository, InMemoryPortfolioRepository};

// Re-export domain types for convenience
pub use types::{
    Asset, AssetKey, AssetType, Balance, Chain, DomainEvent, EventType, Money, Portfolio,
    PortfolioSnapshot, PriceInfo, SourceType,
};
