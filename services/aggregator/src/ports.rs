//! Abstract boundaries to external collaborators
//!
//! The core makes no network calls of its own: providers, persistence,
//! and valuation are injected behind the traits in this module and owned
//! by the host. Everything here is `async-trait` based and object-safe so
//! hosts can hand in `Arc<dyn ...>` implementations.

use crate::error::{AggregatorError, Result};
use crate::registry::AddressEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use types::{Asset, AssetMetadata, AssetType, Balance, Chain, Portfolio, PriceInfo, SourceType};

/// Which address family a provider serves
///
/// Drives the orchestrator's routing: EVM providers get the union of all
/// EVM-chain addresses, Solana providers get the `solana` list, and
/// brokerage providers take a single sentinel account instead of
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// EVM chains (ethereum, polygon, arbitrum, optimism, binance)
    Evm,
    /// Solana
    Solana,
    /// Brokerage account, not address-based
    Brokerage,
}

/// Sentinel "address" routed to brokerage providers
pub const BROKERAGE_SENTINEL: &str = "default";

/// One holding as reported by a provider, before domain mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAsset {
    /// Asset symbol as the provider reports it
    pub symbol: String,
    /// Optional human-readable name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Classification tag
    pub asset_type: AssetType,
    /// Chain the holding lives on, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chain: Option<Chain>,
    /// Raw amount in whole units
    pub amount: Decimal,
    /// Fractional digits the asset natively carries
    pub decimals: u32,
    /// Contract address, absent for native tokens
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contract_address: Option<String>,
    /// Optional icon URL
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    /// Source classification for merge precedence
    pub source_type: SourceType,
    /// Account address the holding was observed under
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account: Option<String>,
}

impl RawAsset {
    /// Map into a domain asset attributed to `provider`
    ///
    /// The id is deterministic within a run: provider plus reconciliation
    /// key, so repeated fetches of the same holding map to the same
    /// identity.
    pub fn into_asset(self, provider: &str) -> types::Result<Asset> {
        let mut metadata = AssetMetadata::for_provider(provider, self.source_type);
        metadata.account = self.account;

        let mut asset = Asset::new(
            "pending",
            &self.symbol,
            self.asset_type,
            Balance::new(self.amount, self.decimals)?,
        )?
        .with_metadata(metadata);
        asset.chain = self.chain;
        asset.contract_address = self.contract_address;
        asset.name = self.name;
        asset.image_url = self.image_url;
        asset.id = format!("{}:{}", provider, asset.asset_key());
        Ok(asset)
    }
}

/// One transfer as reported by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Provider-scoped transaction id
    pub id: String,
    /// Symbol the transfer concerns
    pub symbol: String,
    /// Signed amount: negative for outgoing transfers
    pub amount: Decimal,
    /// Chain the transfer happened on, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chain: Option<Chain>,
    /// When the transfer happened
    pub occurred_at: DateTime<Utc>,
}

/// Callback invoked when a subscribed provider pushes an update
pub type UpdateCallback = Arc<dyn Fn(RawAsset) + Send + Sync>;

/// Handle that detaches a provider update subscription when cancelled
pub struct UpdateSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl UpdateSubscription {
    /// Wrap a cancellation closure
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detach the subscription
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Provider port: any external source of asset holdings
#[async_trait]
pub trait AssetProvider: Send + Sync {
    /// Stable provider identifier ("evm", "solana", "brokerage", ...)
    fn source(&self) -> &str;

    /// Address family this provider serves
    fn kind(&self) -> ProviderKind;

    /// Establish the provider's session; idempotent
    async fn connect(&self) -> Result<()>;

    /// Tear down the provider's session; idempotent
    async fn disconnect(&self) -> Result<()>;

    /// Whether the provider currently has a live session
    fn is_connected(&self) -> bool;

    /// Fetch holdings for the given addresses
    async fn fetch_assets(&self, addresses: &[String]) -> Result<Vec<RawAsset>>;

    /// Fetch transfer history for the given addresses (optional capability)
    async fn fetch_transactions(&self, _addresses: &[String]) -> Result<Vec<RawTransaction>> {
        Err(AggregatorError::NotSupported(format!(
            "{} does not expose transactions",
            self.source()
        )))
    }

    /// Subscribe to pushed holding updates (optional capability)
    async fn subscribe_to_updates(
        &self,
        _addresses: &[String],
        _callback: UpdateCallback,
    ) -> Result<UpdateSubscription> {
        Err(AggregatorError::NotSupported(format!(
            "{} does not push updates",
            self.source()
        )))
    }
}

/// Persistence port for portfolios
///
/// The aggregation service relies on `find_by_id` returning a portfolio
/// with a meaningful `last_updated` for cache-freshness decisions.
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    /// Persist a portfolio, replacing any existing one with the same id
    async fn save(&self, portfolio: &Portfolio) -> Result<()>;

    /// Load by id
    async fn find_by_id(&self, id: &str) -> Result<Option<Portfolio>>;

    /// Load every portfolio bound to a user
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Portfolio>>;

    /// Delete by id; reports whether anything was deleted
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Whether a portfolio with this id exists
    async fn exists(&self, id: &str) -> Result<bool>;
}

/// Valuation port: market prices and currency conversion
#[async_trait]
pub trait Valuator: Send + Sync {
    /// Price of one symbol in the given currency
    async fn get_price(&self, symbol: &str, currency: &str) -> Result<PriceInfo>;

    /// Prices for a batch of symbols; absent symbols are simply omitted
    async fn get_batch_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> Result<HashMap<String, PriceInfo>>;

    /// Convert an amount between currencies
    async fn convert_value(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal>;

    /// Drop cached prices for the given symbols, or everything when `None`
    async fn invalidate_cache(&self, symbols: Option<&[String]>);
}

/// Persistence port for tracked addresses
#[async_trait]
pub trait AddressRepository: Send + Sync {
    /// Persist an entry, replacing any existing (chain, address) pair
    async fn save(&self, entry: AddressEntry) -> Result<()>;

    /// Remove by (chain, address); reports whether anything was removed
    async fn remove(&self, chain: &Chain, address: &str) -> Result<bool>;

    /// All entries on one chain
    async fn find_by_chain(&self, chain: &Chain) -> Result<Vec<AddressEntry>>;

    /// Every tracked entry
    async fn find_all(&self) -> Result<Vec<AddressEntry>>;

    /// Entries carrying the given label
    async fn find_by_label(&self, label: &str) -> Result<Vec<AddressEntry>>;

    /// Update an existing entry; reports whether it was found
    async fn update(&self, entry: AddressEntry) -> Result<bool>;

    /// Drop every entry
    async fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_raw_asset_mapping() {
        let raw = RawAsset {
            symbol: "usdc".to_string(),
            name: Some("USD Coin".to_string()),
            asset_type: AssetType::Token,
            chain: Some(Chain::Ethereum),
            amount: dec!(250.5),
            decimals: 6,
            contract_address: Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".to_string()),
            image_url: None,
            source_type: SourceType::Blockchain,
            account: Some("0xabc".to_string()),
        };

        let asset = raw.into_asset("evm").unwrap();
        assert_eq!(asset.symbol, "USDC");
        assert_eq!(
            asset.id,
            "evm:ethereum:USDC:0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"
        );
        assert_eq!(asset.metadata.provider.as_deref(), Some("evm"));
        assert_eq!(asset.metadata.account.as_deref(), Some("0xabc"));
        assert_eq!(asset.balance.formatted, "250.500000");
    }

    #[test]
    fn test_raw_asset_mapping_rejects_negative_amount() {
        let raw = RawAsset {
            symbol: "ETH".to_string(),
            name: None,
            asset_type: AssetType::Crypto,
            chain: Some(Chain::Ethereum),
            amount: dec!(-1),
            decimals: 18,
            contract_address: None,
            image_url: None,
            source_type: SourceType::Blockchain,
            account: None,
        };
        assert!(raw.into_asset("evm").is_err());
    }

    #[test]
    fn test_update_subscription_cancels_once() {
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = cancelled.clone();
        let subscription = UpdateSubscription::new(move || {
            flag.store(true, std::sync::atomic::Ordering::Relaxed);
        });
        subscription.cancel();
        assert!(cancelled.load(std::sync::atomic::Ordering::Relaxed));
    }
}
