//! TTL-caching decorator over a [`Valuator`]
//!
//! Wraps any valuator and serves repeated price lookups from an in-memory
//! cache until the configured TTL expires. Single-writer assumption per
//! the core's concurrency model; the cache is only a read-through layer.

use crate::error::Result;
use crate::ports::Valuator;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use types::PriceInfo;

struct CachedPrice {
    price: PriceInfo,
    stored_at: Instant,
}

/// Caching valuator decorator with per-entry TTL
pub struct CachedValuator {
    inner: Arc<dyn Valuator>,
    ttl: Duration,
    cache: RwLock<HashMap<(String, String), CachedPrice>>,
}

impl CachedValuator {
    /// Wrap a valuator with the given price-cache TTL
    pub fn new(inner: Arc<dyn Valuator>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn lookup(&self, symbol: &str, currency: &str) -> Option<PriceInfo> {
        let cache = self.cache.read().await;
        cache
            .get(&(symbol.to_string(), currency.to_string()))
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.price.clone())
    }

    async fn store(&self, symbol: &str, currency: &str, price: PriceInfo) {
        self.cache.write().await.insert(
            (symbol.to_string(), currency.to_string()),
            CachedPrice {
                price,
                stored_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl Valuator for CachedValuator {
    async fn get_price(&self, symbol: &str, currency: &str) -> Result<PriceInfo> {
        if let Some(price) = self.lookup(symbol, currency).await {
            tracing::debug!(symbol, currency, "Price cache hit");
            return Ok(price);
        }
        let price = self.inner.get_price(symbol, currency).await?;
        self.store(symbol, currency, price.clone()).await;
        Ok(price)
    }

    async fn get_batch_prices(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> Result<HashMap<String, PriceInfo>> {
        let mut prices = HashMap::new();
        let mut misses = Vec::new();
        for symbol in symbols {
            match self.lookup(symbol, currency).await {
                Some(price) => {
                    prices.insert(symbol.clone(), price);
                }
                None => misses.push(symbol.clone()),
            }
        }

        if !misses.is_empty() {
            let fetched = self.inner.get_batch_prices(&misses, currency).await?;
            for (symbol, price) in fetched {
                self.store(&symbol, currency, price.clone()).await;
                prices.insert(symbol, price);
            }
        }
        Ok(prices)
    }

    async fn convert_value(&self, amount: Decimal, from: &str, to: &str) -> Result<Decimal> {
        self.inner.convert_value(amount, from, to).await
    }

    async fn invalidate_cache(&self, symbols: Option<&[String]>) {
        match symbols {
            Some(symbols) => {
                let mut cache = self.cache.write().await;
                cache.retain(|(symbol, _), _| !symbols.contains(symbol));
            }
            None => self.cache.write().await.clear(),
        }
        self.inner.invalidate_cache(symbols).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockValuator;
    use rust_decimal_macros::dec;

    fn symbols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_lookup_served_from_cache() {
        let inner = Arc::new(MockValuator::new().with_price("ETH", dec!(3000)));
        let cached = CachedValuator::new(inner.clone(), Duration::from_secs(60));

        cached.get_price("ETH", "USD").await.unwrap();
        cached.get_price("ETH", "USD").await.unwrap();

        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetched() {
        let inner = Arc::new(MockValuator::new().with_price("ETH", dec!(3000)));
        let cached = CachedValuator::new(inner.clone(), Duration::from_millis(10));

        cached.get_price("ETH", "USD").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cached.get_price("ETH", "USD").await.unwrap();

        assert_eq!(inner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_only_fetches_misses() {
        let inner = Arc::new(
            MockValuator::new()
                .with_price("ETH", dec!(3000))
                .with_price("SOL", dec!(150)),
        );
        let cached = CachedValuator::new(inner.clone(), Duration::from_secs(60));

        cached.get_price("ETH", "USD").await.unwrap();
        let batch = cached
            .get_batch_prices(&symbols(&["ETH", "SOL"]), "USD")
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        // One single lookup plus one batch call for the miss only.
        assert_eq!(inner.call_count(), 2);
        assert_eq!(inner.last_batch(), symbols(&["SOL"]));
    }

    #[tokio::test]
    async fn test_invalidate_selected_symbols() {
        let inner = Arc::new(
            MockValuator::new()
                .with_price("ETH", dec!(3000))
                .with_price("SOL", dec!(150)),
        );
        let cached = CachedValuator::new(inner.clone(), Duration::from_secs(60));

        cached.get_price("ETH", "USD").await.unwrap();
        cached.get_price("SOL", "USD").await.unwrap();
        cached.invalidate_cache(Some(&symbols(&["ETH"]))).await;

        cached.get_price("SOL", "USD").await.unwrap(); // still cached
        cached.get_price("ETH", "USD").await.unwrap(); // refetched
        assert_eq!(inner.call_count(), 3);
    }
}
