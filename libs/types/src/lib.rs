//! # Folio Types - Portfolio Aggregation Domain Model
//!
//! Domain entities and value objects shared by every crate in the Folio
//! workspace: assets with provenance metadata, the portfolio aggregate
//! root, money arithmetic, the reconciliation engine, and the domain-event
//! taxonomy.
//!
//! ## Architecture Role
//!
//! This crate is pure domain logic: no I/O, no async, no clocks beyond
//! timestamping mutations. The aggregation service orchestrates providers
//! and repositories around these types; the event bus carries the
//! [`DomainEvent`] records they describe.
//!
//! ## Invariants upheld here
//!
//! - Symbols are non-empty and upper-case; balances are non-negative.
//! - A portfolio never holds two assets with the same [`AssetKey`].
//! - Merging conserves balances and keeps the most recently fetched price.
//! - Money arithmetic rejects mixed currencies, underflow, and negative
//!   factors.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod asset;
pub mod error;
pub mod event;
pub mod money;
pub mod portfolio;
pub mod reconcile;

pub use asset::{
    format_amount, Asset, AssetMetadata, AssetType, Balance, Chain, PriceInfo, SourceType,
    EVM_CHAINS,
};
pub use error::{DomainError, Result};
pub use event::{DomainEvent, EventType};
pub use money::Money;
pub use portfolio::{AddOutcome, AssetSnapshot, Portfolio, PortfolioSnapshot, TotalValue};
pub use reconcile::{merge, reconcile, same_asset, AssetKey};
