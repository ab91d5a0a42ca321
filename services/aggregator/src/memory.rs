//! In-memory reference implementations of the persistence ports
//!
//! Hosts embedding the core without a durable store, the address registry
//! default, and the integration tests all run against these. Both are
//! plain RwLock'd maps with last-writer-wins semantics at `save`.

use crate::error::Result;
use crate::ports::{AddressRepository, PortfolioRepository};
use crate::registry::AddressEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use types::{Chain, Portfolio};

/// In-memory portfolio store keyed by portfolio id
#[derive(Debug, Default)]
pub struct InMemoryPortfolioRepository {
    portfolios: RwLock<HashMap<String, Portfolio>>,
}

impl InMemoryPortfolioRepository {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored portfolios
    pub async fn len(&self) -> usize {
        self.portfolios.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.portfolios.read().await.is_empty()
    }
}

#[async_trait]
impl PortfolioRepository for InMemoryPortfolioRepository {
    async fn save(&self, portfolio: &Portfolio) -> Result<()> {
        self.portfolios
            .write()
            .await
            .insert(portfolio.id().to_string(), portfolio.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.read().await.get(id).cloned())
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Portfolio>> {
        Ok(self
            .portfolios
            .read()
            .await
            .values()
            .filter(|p| p.user_id() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.portfolios.write().await.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.portfolios.read().await.contains_key(id))
    }
}

/// In-memory address store keyed by (chain, address)
#[derive(Debug, Default)]
pub struct InMemoryAddressRepository {
    entries: RwLock<HashMap<(Chain, String), AddressEntry>>,
}

impl InMemoryAddressRepository {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AddressRepository for InMemoryAddressRepository {
    async fn save(&self, entry: AddressEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((entry.chain.clone(), entry.address.clone()), entry);
        Ok(())
    }

    async fn remove(&self, chain: &Chain, address: &str) -> Result<bool> {
        Ok(self
            .entries
            .write()
            .await
            .remove(&(chain.clone(), address.to_string()))
            .is_some())
    }

    async fn find_by_chain(&self, chain: &Chain) -> Result<Vec<AddressEntry>> {
        let mut entries: Vec<AddressEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| &e.chain == chain)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.added_at.cmp(&b.added_at));
        Ok(entries)
    }

    async fn find_all(&self) -> Result<Vec<AddressEntry>> {
        let mut entries: Vec<AddressEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.added_at.cmp(&b.added_at));
        Ok(entries)
    }

    async fn find_by_label(&self, label: &str) -> Result<Vec<AddressEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.label.as_deref() == Some(label))
            .cloned()
            .collect())
    }

    async fn update(&self, entry: AddressEntry) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let key = (entry.chain.clone(), entry.address.clone());
        if entries.contains_key(&key) {
            entries.insert(key, entry);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}
