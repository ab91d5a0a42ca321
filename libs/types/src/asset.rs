//! Asset entity and its supporting tags
//!
//! An [`Asset`] is one holding reported by a provider: a normalized symbol,
//! a balance, an optional market price, and provenance metadata used by the
//! reconciliation engine to merge equivalent holdings across providers.

use crate::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Blockchain (or venue) a holding lives on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Binance,
    Solana,
    Bitcoin,
    /// Any chain the core has no special handling for
    Other(String),
}

/// EVM chains share address format and provider routing
pub const EVM_CHAINS: [Chain; 5] = [
    Chain::Ethereum,
    Chain::Polygon,
    Chain::Arbitrum,
    Chain::Optimism,
    Chain::Binance,
];

impl Chain {
    /// Canonical lower-case name
    pub fn as_str(&self) -> &str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Binance => "binance",
            Chain::Solana => "solana",
            Chain::Bitcoin => "bitcoin",
            Chain::Other(name) => name,
        }
    }

    /// Whether this chain uses EVM address semantics
    pub fn is_evm(&self) -> bool {
        EVM_CHAINS.contains(self)
    }

    /// Map a wallet-reported numeric chain id to a chain tag
    ///
    /// Unknown ids map to the id itself, preserved as an opaque chain name.
    pub fn from_chain_id(chain_id: u64) -> Chain {
        match chain_id {
            1 => Chain::Ethereum,
            137 => Chain::Polygon,
            42161 => Chain::Arbitrum,
            10 => Chain::Optimism,
            56 => Chain::Binance,
            other => Chain::Other(other.to_string()),
        }
    }
}

impl From<&str> for Chain {
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ethereum" => Chain::Ethereum,
            "polygon" => Chain::Polygon,
            "arbitrum" => Chain::Arbitrum,
            "optimism" => Chain::Optimism,
            "binance" => Chain::Binance,
            "solana" => Chain::Solana,
            "bitcoin" => Chain::Bitcoin,
            other => Chain::Other(other.to_string()),
        }
    }
}

impl From<String> for Chain {
    fn from(name: String) -> Self {
        Chain::from(name.as_str())
    }
}

impl From<Chain> for String {
    fn from(chain: Chain) -> Self {
        chain.as_str().to_string()
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Token,
    Nft,
    Stock,
    Option,
    Crypto,
    Defi,
}

/// Where a holding was observed
///
/// Ranks drive merge precedence: lower rank wins when two providers report
/// the same asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Read directly from a chain (RPC, indexer)
    Blockchain,
    /// Decentralized exchange position
    Dex,
    /// Centralized exchange or brokerage account
    Cex,
    /// Manually entered by the user
    Manual,
}

impl SourceType {
    /// Merge precedence rank, lower wins
    pub fn rank(&self) -> u8 {
        match self {
            SourceType::Blockchain => 1,
            SourceType::Dex => 2,
            SourceType::Cex => 3,
            SourceType::Manual => 4,
        }
    }
}

/// Balance record: raw amount, token decimals, pre-formatted display string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Non-negative amount in whole units
    pub amount: Decimal,
    /// Number of fractional digits the asset natively carries
    pub decimals: u32,
    /// Display string formatted to `decimals` places
    pub formatted: String,
}

impl Balance {
    /// Create a balance, formatting the display string to `decimals` places
    pub fn new(amount: Decimal, decimals: u32) -> Result<Self> {
        if amount < Decimal::ZERO {
            return Err(DomainError::NegativeAmount { amount });
        }
        Ok(Self {
            amount,
            decimals,
            formatted: format_amount(amount, decimals),
        })
    }

    /// Zero balance with the given decimals
    pub fn zero(decimals: u32) -> Self {
        Self {
            amount: Decimal::ZERO,
            decimals,
            formatted: format_amount(Decimal::ZERO, decimals),
        }
    }
}

/// Format an amount with a fixed number of fractional digits
pub fn format_amount(amount: Decimal, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, amount)
}

/// Market price attached to an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    /// Price per whole unit
    pub value: Decimal,
    /// 3-letter quote currency code
    pub currency: String,
    /// When the price was fetched; recency drives merge selection
    pub fetched_at: DateTime<Utc>,
    /// Optional label of the price source
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
}

impl PriceInfo {
    /// Create a price stamped with the current time
    pub fn new(value: Decimal, currency: &str) -> Result<Self> {
        Ok(Self {
            value,
            currency: crate::money::validate_currency(currency)?,
            fetched_at: Utc::now(),
            source: None,
        })
    }

    /// Attach a source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Override the fetch timestamp (snapshot restore, tests)
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }
}

/// Provenance and free-form metadata carried by an asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    /// Identifier of the provider that produced this asset
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<String>,
    /// When the provider fetched the underlying data
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fetched_at: Option<DateTime<Utc>>,
    /// Source classification used for merge precedence
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_type: Option<SourceType>,
    /// Account address the holding was observed under
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub account: Option<String>,
    /// Append-only list of provider labels merged into this asset
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub merged_from: Vec<String>,
    /// Anything else a provider wants to attach
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AssetMetadata {
    /// Metadata for a freshly fetched asset
    pub fn for_provider(provider: &str, source_type: SourceType) -> Self {
        Self {
            provider: Some(provider.to_string()),
            fetched_at: Some(Utc::now()),
            source_type: Some(source_type),
            ..Default::default()
        }
    }

    /// Attach the account the holding was observed under
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Merge precedence rank; metadata without a source type loses ties
    pub fn precedence_rank(&self) -> u8 {
        self.source_type.map(|s| s.rank()).unwrap_or(u8::MAX)
    }
}

/// One holding: symbol, balance, optional price, provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Opaque identity, stable within a single aggregation run
    pub id: String,
    /// Upper-case symbol, never empty
    pub symbol: String,
    /// Optional human-readable name
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    /// Classification tag
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    /// Chain the holding lives on, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chain: Option<Chain>,
    /// Balance record
    pub balance: Balance,
    /// Market price, if enrichment has run
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price: Option<PriceInfo>,
    /// Chain-specific contract address, absent for native tokens
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contract_address: Option<String>,
    /// Optional icon URL
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    /// Provenance and free-form metadata
    #[serde(default)]
    pub metadata: AssetMetadata,
}

impl Asset {
    /// Create an asset with a normalized, validated symbol
    pub fn new(
        id: impl Into<String>,
        symbol: &str,
        asset_type: AssetType,
        balance: Balance,
    ) -> Result<Self> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(DomainError::InvalidSymbol(symbol.to_string()));
        }
        Ok(Self {
            id: id.into(),
            symbol: symbol.to_ascii_uppercase(),
            name: None,
            asset_type,
            chain: None,
            balance,
            price: None,
            contract_address: None,
            image_url: None,
            metadata: AssetMetadata::default(),
        })
    }

    /// Set the human-readable name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the chain tag
    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Set the contract address
    pub fn with_contract_address(mut self, contract: impl Into<String>) -> Self {
        self.contract_address = Some(contract.into());
        self
    }

    /// Set the icon URL
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Set the initial price
    pub fn with_price(mut self, price: PriceInfo) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the provenance metadata
    pub fn with_metadata(mut self, metadata: AssetMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replace the market price
    pub fn update_price(&mut self, price: PriceInfo) {
        self.price = Some(price);
    }

    /// Replace the balance record
    pub fn update_balance(&mut self, balance: Balance) {
        self.balance = balance;
    }

    /// Market value of the holding: amount x price, if priced
    pub fn value(&self) -> Option<Decimal> {
        self.price.as_ref().map(|p| self.balance.amount * p.value)
    }

    /// Reconciliation index key for this asset
    pub fn asset_key(&self) -> crate::reconcile::AssetKey {
        crate::reconcile::AssetKey::of(self)
    }
}
