//! Portfolio aggregate root
//!
//! The portfolio is the consistency boundary over the deduplicated asset
//! set: at most one live asset per [`AssetKey`], `last_updated` tracking
//! every mutation, and `sources` recording which providers contributed.

use crate::asset::{Asset, AssetType, Chain};
use crate::error::Result;
use crate::money::Money;
use crate::reconcile::{self, AssetKey};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Outcome of [`Portfolio::add_asset`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// No equivalent asset existed; the asset was inserted as-is
    Inserted,
    /// An equivalent asset existed and the two were merged
    Merged,
}

/// Aggregate root owning the deduplicated asset set
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    id: String,
    user_id: Option<String>,
    assets: HashMap<AssetKey, Asset>,
    sources: BTreeSet<String>,
    last_updated: DateTime<Utc>,
}

impl Portfolio {
    /// Construct an empty portfolio
    pub fn new(id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            user_id,
            assets: HashMap::new(),
            sources: BTreeSet::new(),
            last_updated: Utc::now(),
        }
    }

    /// Portfolio id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning user, if bound to one
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Timestamp of the most recent mutation
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Providers that contributed assets
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.as_str())
    }

    /// Whether the given provider contributed
    pub fn has_source(&self, source: &str) -> bool {
        self.sources.contains(source)
    }

    /// All assets, in no particular order
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Number of live assets
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    /// Look up an asset by its id
    pub fn get_asset(&self, id: &str) -> Option<&Asset> {
        self.assets.values().find(|a| a.id == id)
    }

    /// Look up an asset by reconciliation key
    pub fn get_asset_by_key(&self, key: &AssetKey) -> Option<&Asset> {
        self.assets.get(key)
    }

    /// Distinct symbols across all assets
    pub fn symbols(&self) -> BTreeSet<String> {
        self.assets.values().map(|a| a.symbol.clone()).collect()
    }

    /// Add an asset, merging with an equivalent one if present
    pub fn add_asset(&mut self, asset: Asset) -> Result<AddOutcome> {
        let key = asset.asset_key();
        let outcome = match self.assets.remove(&key) {
            Some(existing) => {
                let merged = reconcile::merge(&existing, &asset)?;
                self.assets.insert(key, merged);
                AddOutcome::Merged
            }
            None => {
                self.assets.insert(key, asset);
                AddOutcome::Inserted
            }
        };
        self.touch();
        Ok(outcome)
    }

    /// Remove an asset by id, reporting whether anything was removed
    pub fn remove_asset(&mut self, id: &str) -> bool {
        let before = self.assets.len();
        self.assets.retain(|_, a| a.id != id);
        let removed = self.assets.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Record a contributing provider
    pub fn add_source(&mut self, source: impl Into<String>) {
        if self.sources.insert(source.into()) {
            self.touch();
        }
    }

    /// Absorb another portfolio: every asset added, every source recorded
    pub fn merge_portfolio(&mut self, other: Portfolio) -> Result<()> {
        for asset in other.assets.into_values() {
            self.add_asset(asset)?;
        }
        for source in other.sources {
            self.add_source(source);
        }
        Ok(())
    }

    /// Rebuild the asset map through the reconciliation engine
    ///
    /// Defense-in-depth: per-insert merging already upholds the one-asset-
    /// per-key invariant, so this is idempotent on a healthy portfolio.
    pub fn reconcile(&mut self) -> Result<()> {
        let assets: Vec<Asset> = self.assets.drain().map(|(_, a)| a).collect();
        for asset in reconcile::reconcile(assets)? {
            self.assets.insert(asset.asset_key(), asset);
        }
        self.touch();
        Ok(())
    }

    /// Apply a price update to the asset with the given symbol
    ///
    /// Returns the ids of the assets updated (several assets can share a
    /// symbol across chains).
    pub fn update_prices_for_symbol(
        &mut self,
        symbol: &str,
        price: &crate::asset::PriceInfo,
    ) -> Vec<String> {
        let mut updated = Vec::new();
        for asset in self.assets.values_mut() {
            if asset.symbol == symbol {
                asset.update_price(price.clone());
                updated.push(asset.id.clone());
            }
        }
        if !updated.is_empty() {
            self.touch();
        }
        updated
    }

    /// Total value in the requested currency
    ///
    /// Assets priced in other currencies or not priced at all are skipped;
    /// this never fails.
    pub fn get_total_value(&self, currency: &str) -> Decimal {
        self.assets
            .values()
            .filter_map(|a| match &a.price {
                Some(p) if p.currency.eq_ignore_ascii_case(currency) => a.value(),
                _ => None,
            })
            .sum()
    }

    /// Assets on the given chain
    pub fn get_assets_by_chain(&self, chain: &Chain) -> Vec<&Asset> {
        self.assets
            .values()
            .filter(|a| a.chain.as_ref() == Some(chain))
            .collect()
    }

    /// Assets of the given type
    pub fn get_assets_by_type(&self, asset_type: AssetType) -> Vec<&Asset> {
        self.assets
            .values()
            .filter(|a| a.asset_type == asset_type)
            .collect()
    }

    /// Whether the portfolio holds no assets
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Drop all assets and sources
    pub fn clear(&mut self) {
        self.assets.clear();
        self.sources.clear();
        self.touch();
    }

    /// Serialize to the persistence snapshot shape
    pub fn to_snapshot(&self, currency: &str) -> Result<PortfolioSnapshot> {
        let total = Money::new(self.get_total_value(currency), currency)?;
        Ok(PortfolioSnapshot {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            assets: self
                .assets
                .values()
                .map(|a| AssetSnapshot {
                    value: a.value(),
                    asset: a.clone(),
                })
                .collect(),
            total_value: TotalValue {
                value: total.amount(),
                currency: total.currency().to_string(),
                timestamp: Utc::now(),
            },
            last_updated: self.last_updated,
            sources: self.sources.iter().cloned().collect(),
        })
    }

    /// Restore from a persistence snapshot
    ///
    /// The snapshot's per-asset `value` field is redundant (derivable from
    /// balance and price) and is ignored on read.
    pub fn from_snapshot(snapshot: PortfolioSnapshot) -> Result<Self> {
        let mut portfolio = Self {
            id: snapshot.id,
            user_id: snapshot.user_id,
            assets: HashMap::with_capacity(snapshot.assets.len()),
            sources: snapshot.sources.into_iter().collect(),
            last_updated: snapshot.last_updated,
        };
        for wrapped in snapshot.assets {
            let asset = wrapped.asset;
            portfolio.assets.insert(asset.asset_key(), asset);
        }
        Ok(portfolio)
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// Persistence snapshot of a portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    pub assets: Vec<AssetSnapshot>,
    pub total_value: TotalValue,
    pub last_updated: DateTime<Utc>,
    pub sources: Vec<String>,
}

/// Asset as persisted: the entity plus its derived value at snapshot time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSnapshot {
    #[serde(flatten)]
    pub asset: Asset,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Decimal>,
}

/// Portfolio-level valuation at snapshot time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalValue {
    pub value: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetMetadata, Balance, PriceInfo, SourceType};
    use rust_decimal_macros::dec;

    fn eth(id: &str, amount: Decimal) -> Asset {
        Asset::new(
            id,
            "ETH",
            AssetType::Crypto,
            Balance::new(amount, 18).unwrap(),
        )
        .unwrap()
        .with_chain(Chain::Ethereum)
        .with_metadata(AssetMetadata::for_provider("evm", SourceType::Blockchain))
    }

    fn sol(id: &str, amount: Decimal) -> Asset {
        Asset::new(
            id,
            "SOL",
            AssetType::Crypto,
            Balance::new(amount, 9).unwrap(),
        )
        .unwrap()
        .with_chain(Chain::Solana)
        .with_metadata(AssetMetadata::for_provider("solana", SourceType::Blockchain))
    }

    #[test]
    fn test_add_asset_merges_equivalents() {
        let mut portfolio = Portfolio::new("p1", None);
        assert_eq!(
            portfolio.add_asset(eth("a", dec!(1.5))).unwrap(),
            AddOutcome::Inserted
        );
        assert_eq!(
            portfolio.add_asset(eth("b", dec!(2.5))).unwrap(),
            AddOutcome::Merged
        );
        assert_eq!(portfolio.asset_count(), 1);
        let asset = portfolio.assets().next().unwrap();
        assert_eq!(asset.balance.amount, dec!(4.0));
    }

    #[test]
    fn test_remove_asset_by_id() {
        let mut portfolio = Portfolio::new("p1", None);
        portfolio.add_asset(eth("a", dec!(1))).unwrap();
        portfolio.add_asset(sol("b", dec!(10))).unwrap();

        let before = portfolio.last_updated();
        assert!(portfolio.remove_asset("a"));
        assert_eq!(portfolio.asset_count(), 1);
        assert!(portfolio.last_updated() >= before);

        let mid = portfolio.last_updated();
        assert!(!portfolio.remove_asset("nope"));
        assert_eq!(portfolio.last_updated(), mid);
    }

    #[test]
    fn test_total_value_skips_unpriced_and_foreign_currency() {
        let mut portfolio = Portfolio::new("p1", None);

        let mut priced = eth("a", dec!(2));
        priced.update_price(PriceInfo::new(dec!(3000), "USD").unwrap());
        portfolio.add_asset(priced).unwrap();

        let mut eur = sol("b", dec!(10));
        eur.update_price(PriceInfo::new(dec!(100), "EUR").unwrap());
        portfolio.add_asset(eur).unwrap();

        let unpriced = Asset::new(
            "c",
            "WBTC",
            AssetType::Token,
            Balance::new(dec!(1), 8).unwrap(),
        )
        .unwrap()
        .with_chain(Chain::Ethereum)
        .with_contract_address("0x2260fac5e5542a773aa44fbcfedf7c193bc2c599");
        portfolio.add_asset(unpriced).unwrap();

        assert_eq!(portfolio.get_total_value("USD"), dec!(6000));
        assert_eq!(portfolio.get_total_value("EUR"), dec!(1000));
        assert_eq!(portfolio.get_total_value("GBP"), dec!(0));
    }

    #[test]
    fn test_filtered_views() {
        let mut portfolio = Portfolio::new("p1", None);
        portfolio.add_asset(eth("a", dec!(1))).unwrap();
        portfolio.add_asset(sol("b", dec!(10))).unwrap();

        assert_eq!(portfolio.get_assets_by_chain(&Chain::Ethereum).len(), 1);
        assert_eq!(portfolio.get_assets_by_chain(&Chain::Bitcoin).len(), 0);
        assert_eq!(portfolio.get_assets_by_type(AssetType::Crypto).len(), 2);
        assert_eq!(portfolio.get_assets_by_type(AssetType::Nft).len(), 0);
    }

    #[test]
    fn test_merge_portfolio_unions_assets_and_sources() {
        let mut left = Portfolio::new("left", None);
        left.add_asset(eth("a", dec!(1))).unwrap();
        left.add_source("evm");

        let mut right = Portfolio::new("right", None);
        right.add_asset(eth("b", dec!(2))).unwrap();
        right.add_asset(sol("c", dec!(5))).unwrap();
        right.add_source("solana");

        left.merge_portfolio(right).unwrap();
        assert_eq!(left.asset_count(), 2);
        assert!(left.has_source("evm"));
        assert!(left.has_source("solana"));
        assert_eq!(
            left.get_asset_by_key(&eth("x", dec!(0)).asset_key())
                .unwrap()
                .balance
                .amount,
            dec!(3)
        );
    }

    #[test]
    fn test_clear_and_is_empty() {
        let mut portfolio = Portfolio::new("p1", None);
        assert!(portfolio.is_empty());
        portfolio.add_asset(eth("a", dec!(1))).unwrap();
        portfolio.add_source("evm");
        assert!(!portfolio.is_empty());

        portfolio.clear();
        assert!(portfolio.is_empty());
        assert_eq!(portfolio.sources().count(), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut portfolio = Portfolio::new("p1", Some("user-7".to_string()));
        let mut asset = eth("a", dec!(2));
        asset.update_price(PriceInfo::new(dec!(3000), "USD").unwrap());
        portfolio.add_asset(asset).unwrap();
        portfolio.add_source("evm");

        let snapshot = portfolio.to_snapshot("USD").unwrap();
        assert_eq!(snapshot.total_value.value, dec!(6000));
        assert_eq!(snapshot.assets[0].value, Some(dec!(6000)));

        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: PortfolioSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Portfolio::from_snapshot(parsed).unwrap();

        assert_eq!(restored.id(), "p1");
        assert_eq!(restored.user_id(), Some("user-7"));
        assert_eq!(restored.asset_count(), 1);
        assert_eq!(restored.last_updated(), portfolio.last_updated());
        assert!(restored.has_source("evm"));
    }

    #[test]
    fn test_reconcile_is_idempotent_on_healthy_portfolio() {
        let mut portfolio = Portfolio::new("p1", None);
        portfolio.add_asset(eth("a", dec!(1))).unwrap();
        portfolio.add_asset(sol("b", dec!(2))).unwrap();

        portfolio.reconcile().unwrap();
        assert_eq!(portfolio.asset_count(), 2);
        portfolio.reconcile().unwrap();
        assert_eq!(portfolio.asset_count(), 2);
    }
}
