//! Reconciliation engine: same-asset detection and merging
//!
//! Providers overlap: the same wallet queried through two providers yields
//! the same holding twice. Reconciliation groups assets by [`AssetKey`] and
//! reduces each group with a deterministic merge rule so the portfolio ends
//! up with at most one asset per key and conserved balances.

use crate::asset::{Asset, Balance};
use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

/// Index key identifying one logical asset across providers
///
/// Shape: `<chain|"unknown">:<UPPER symbol>:<lower contract|"native">`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetKey(String);

impl AssetKey {
    /// Compute the key for an asset
    pub fn of(asset: &Asset) -> Self {
        let chain = asset
            .chain
            .as_ref()
            .map(|c| c.as_str())
            .unwrap_or("unknown");
        let contract = asset
            .contract_address
            .as_deref()
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or_else(|| "native".to_string());
        Self(format!(
            "{}:{}:{}",
            chain,
            asset.symbol.to_ascii_uppercase(),
            contract
        ))
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Same-asset predicate
///
/// Two assets are the same holding iff their chain tags are equal and
/// either both carry the same contract address (compared case-insensitively)
/// or neither carries one and their symbols match. An asset with a contract
/// address never matches one without: a provider that omits the contract for
/// a well-known token stays separate by design.
pub fn same_asset(a: &Asset, b: &Asset) -> bool {
    if a.chain != b.chain {
        return false;
    }
    match (&a.contract_address, &b.contract_address) {
        (Some(ca), Some(cb)) => ca.eq_ignore_ascii_case(cb),
        (None, None) => a.symbol == b.symbol,
        _ => false,
    }
}

/// Merge two equivalent assets into one
///
/// The side with the lower source-type precedence rank wins identity and
/// descriptive fields (ties go to `a`); balances are summed and re-formatted
/// to the preferred side's decimals; the most recently fetched price is
/// kept; `merged_from` accumulates the losing side's provider label.
pub fn merge(a: &Asset, b: &Asset) -> Result<Asset> {
    if !same_asset(a, b) {
        return Err(DomainError::DifferentAssetsMerged {
            left: a.id.clone(),
            right: b.id.clone(),
        });
    }

    let (preferred, other) = if b.metadata.precedence_rank() < a.metadata.precedence_rank() {
        (b, a)
    } else {
        (a, b)
    };

    let balance = Balance::new(
        a.balance.amount + b.balance.amount,
        preferred.balance.decimals,
    )?;

    let price = match (&a.price, &b.price) {
        (Some(pa), Some(pb)) => Some(if pb.fetched_at > pa.fetched_at {
            pb.clone()
        } else {
            pa.clone()
        }),
        (Some(pa), None) => Some(pa.clone()),
        (None, Some(pb)) => Some(pb.clone()),
        (None, None) => None,
    };

    let mut metadata = preferred.metadata.clone();
    metadata.merged_from = a
        .metadata
        .merged_from
        .iter()
        .chain(b.metadata.merged_from.iter())
        .cloned()
        .chain(other.metadata.provider.clone())
        .collect();
    if metadata.account.is_none() {
        metadata.account = other.metadata.account.clone();
    }
    for (key, value) in &other.metadata.extra {
        metadata
            .extra
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }

    Ok(Asset {
        id: preferred.id.clone(),
        symbol: preferred.symbol.clone(),
        name: preferred.name.clone().or_else(|| other.name.clone()),
        asset_type: preferred.asset_type,
        chain: preferred.chain.clone().or_else(|| other.chain.clone()),
        balance,
        price,
        contract_address: preferred
            .contract_address
            .clone()
            .or_else(|| other.contract_address.clone())
            .map(|c| c.to_ascii_lowercase()),
        image_url: preferred
            .image_url
            .clone()
            .or_else(|| other.image_url.clone()),
        metadata,
    })
}

/// Reconcile a list of assets into at most one asset per key
///
/// Groups by [`AssetKey`] and reduces each group with [`merge`]; output
/// order follows first appearance of each key. Idempotent: reconciling an
/// already-reconciled list is a no-op.
pub fn reconcile(assets: Vec<Asset>) -> Result<Vec<Asset>> {
    let mut order: Vec<AssetKey> = Vec::with_capacity(assets.len());
    let mut groups: HashMap<AssetKey, Asset> = HashMap::with_capacity(assets.len());

    for asset in assets {
        let key = asset.asset_key();
        match groups.entry(key) {
            Entry::Occupied(mut slot) => {
                let merged = merge(slot.get(), &asset)?;
                slot.insert(merged);
            }
            Entry::Vacant(slot) => {
                order.push(slot.key().clone());
                slot.insert(asset);
            }
        }
    }

    Ok(order.into_iter().filter_map(|k| groups.remove(&k)).collect())
}
