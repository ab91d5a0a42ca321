//! Mock port implementations for tests
//!
//! Scripted providers with failure and latency injection, a scripted
//! valuator with call counting, and raw-asset builders. Used by the unit
//! suites in this crate and by the integration tests under `tests/`.

use crate::error::{AggregatorError, Result};
use crate::ports::{AssetProvider, ProviderKind, RawAsset, Valuator};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use types::{AssetType, Chain, PriceInfo, SourceType};

/// Initialize tracing for tests; safe to call repeatedly
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted provider with failure and latency injection
pub struct MockProvider {
    source: String,
    kind: ProviderKind,
    assets: Mutex<Vec<RawAsset>>,
    delay: Option<Duration>,

    connected: AtomicBool,
    fail_fetch: Mutex<Option<String>>,
    fail_connect: Mutex<Option<String>>,
    fetch_calls: AtomicU64,
    connect_calls: AtomicU64,
}

impl MockProvider {
    /// Provider with the given source id and kind
    pub fn new(source: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            source: source.into(),
            kind,
            assets: Mutex::new(Vec::new()),
            delay: None,
            connected: AtomicBool::new(false),
            fail_fetch: Mutex::new(None),
            fail_connect: Mutex::new(None),
            fetch_calls: AtomicU64::new(0),
            connect_calls: AtomicU64::new(0),
        }
    }

    /// EVM provider named "evm"
    pub fn evm() -> Self {
        Self::new("evm", ProviderKind::Evm)
    }

    /// Solana provider named "solana"
    pub fn solana() -> Self {
        Self::new("solana", ProviderKind::Solana)
    }

    /// Brokerage provider named "brokerage"
    pub fn brokerage() -> Self {
        Self::new("brokerage", ProviderKind::Brokerage)
    }

    /// Script the assets every fetch returns
    pub fn with_assets(self, assets: Vec<RawAsset>) -> Self {
        *self.assets.lock().unwrap() = assets;
        self
    }

    /// Delay every connect and fetch by the given duration
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every fetch fail with the given message
    pub fn fail_fetches(&self, message: impl Into<String>) {
        *self.fail_fetch.lock().unwrap() = Some(message.into());
    }

    /// Make every connect fail with the given message
    pub fn fail_connections(&self, message: impl Into<String>) {
        *self.fail_connect.lock().unwrap() = Some(message.into());
    }

    /// Clear all injected failures
    pub fn heal(&self) {
        *self.fail_fetch.lock().unwrap() = None;
        *self.fail_connect.lock().unwrap() = None;
    }

    /// Number of fetch calls made against this provider
    pub fn fetch_count(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    /// Number of connect calls made against this provider
    pub fn connect_count(&self) -> u64 {
        self.connect_calls.load(Ordering::Relaxed)
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AssetProvider for MockProvider {
    fn source(&self) -> &str {
        &self.source
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::Relaxed);
        self.maybe_delay().await;
        if let Some(message) = self.fail_connect.lock().unwrap().clone() {
            return Err(AggregatorError::provider(&self.source, message));
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn fetch_assets(&self, _addresses: &[String]) -> Result<Vec<RawAsset>> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        self.maybe_delay().await;
        if let Some(message) = self.fail_fetch.lock().unwrap().clone() {
            return Err(AggregatorError::provider(&self.source, message));
        }
        Ok(self.assets.lock().unwrap().clone())
    }
}

/// Scripted valuator with call counting
pub struct MockValuator {
    prices: Mutex<HashMap<String, Decimal>>,
    currency: String,
    fail: AtomicBool,
    calls: AtomicU64,
    last_batch: Mutex<Vec<String>>,
}

impl MockValuator {
    /// Valuator with no prices scripted, quoting in USD
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            currency: "USD".to_string(),
            fail: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            last_batch: Mutex::new(Vec::new()),
        }
    }

    /// Script a price for a symbol
    pub fn with_price(self, symbol: &str, value: Decimal) -> Self {
        self.prices.lock().unwrap().insert(symbol.to_string(), value);
        self
    }

    /// Make every lookup fail
    pub fn fail_lookups(&self) {
        self.fail.store(true, Ordering::Relaxed);
    }

    /// Number of lookup calls (single or batch)
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Symbols requested by the most recent batch call
    pub fn last_batch(&self) -> Vec<String> {
        self.last_batch.lock().unwrap().clone()
    }

    fn price_for(&self, symbol: &str, currency: &str) -> Option<PriceInfo> {
        self.prices.lock().unwrap().get(symbol).map(|value| PriceInfo {
            value: *value,
            currency: currency.to_string(),
            fetched_at: Utc::now(),
            source: Some("mock".to_string()),
        })
    }
}

impl Default for MockValuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Valuator for MockValuator {
    async fn get_price(&self, symbol: &str, currency: &str) -> Result<PriceInfo> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::Relaxed) {
            return Err(AggregatorError::Valuation("mock valuator down".to_string()));
        }
        self.price_for(symbol, currency)
            .ok_or_else(|| AggregatorError::Valuation(format!("No price for {}", symbol)))
    }

    async fn get_batch_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> Result<HashMap<String, PriceInfo>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_batch.lock().unwrap() = symbols.to_vec();
        if self.fail.load(Ordering::Relaxed) {
            return Err(AggregatorError::Valuation("mock valuator down".to_string()));
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.price_for(s, currency).map(|p| (s.clone(), p)))
            .collect())
    }

    async fn convert_value(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        if from.eq_ignore_ascii_case(to) {
            Ok(amount)
        } else {
            Err(AggregatorError::Valuation(format!(
                "No conversion rate {} -> {}",
                from, to
            )))
        }
    }

    async fn invalidate_cache(&self, _symbols: Option<&[String]>) {}
}

/// Native ETH holding on ethereum, 18 decimals
pub fn raw_eth(amount: Decimal, account: &str) -> RawAsset {
    RawAsset {
        symbol: "ETH".to_string(),
        name: Some("Ether".to_string()),
        asset_type: AssetType::Crypto,
        chain: Some(Chain::Ethereum),
        amount,
        decimals: 18,
        contract_address: None,
        image_url: None,
        source_type: SourceType::Blockchain,
        account: Some(account.to_string()),
    }
}

/// USDC token holding with an explicit chain and contract casing
pub fn raw_usdc(chain: Chain, contract: &str, amount: Decimal, account: &str) -> RawAsset {
    RawAsset {
        symbol: "USDC".to_string(),
        name: Some("USD Coin".to_string()),
        asset_type: AssetType::Token,
        chain: Some(chain),
        amount,
        decimals: 6,
        contract_address: Some(contract.to_string()),
        image_url: None,
        source_type: SourceType::Blockchain,
        account: Some(account.to_string()),
    }
}

/// Native SOL holding, 9 decimals
pub fn raw_sol(amount: Decimal, account: &str) -> RawAsset {
    RawAsset {
        symbol: "SOL".to_string(),
        name: Some("Solana".to_string()),
        asset_type: AssetType::Crypto,
        chain: Some(Chain::Solana),
        amount,
        decimals: 9,
        contract_address: None,
        image_url: None,
        source_type: SourceType::Blockchain,
        account: Some(account.to_string()),
    }
}

/// Brokerage stock position with no chain or account attribution
pub fn raw_stock(symbol: &str, amount: Decimal) -> RawAsset {
    RawAsset {
        symbol: symbol.to_string(),
        name: None,
        asset_type: AssetType::Stock,
        chain: None,
        amount,
        decimals: 2,
        contract_address: None,
        image_url: None,
        source_type: SourceType::Cex,
        account: None,
    }
}
