//! Address registry: canonical store of tracked addresses per chain
//!
//! Validates address formats per chain family, normalizes EVM addresses to
//! lower case, and maps wallet-reported chain ids to chain tags during
//! discovery. Backed by the [`AddressRepository`] port.

use crate::error::{AggregatorError, Result};
use crate::ports::AddressRepository;
use chrono::{DateTime, Utc};
use event_bus::EventBus;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use types::{Chain, DomainError, DomainEvent, EventType};

static EVM_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex")
});
static SOLANA_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("static regex")
});
static BITCOIN_P2PKH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^1[a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("static regex")
});
static BITCOIN_P2SH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^3[a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("static regex")
});
static BITCOIN_BECH32: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^bc1[a-z0-9]{11,71}$").expect("static regex")
});

/// How an address entered the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSource {
    /// Entered by the user
    Manual,
    /// Reported by a connected wallet
    Wallet,
    /// Found by on-chain discovery
    Discovered,
}

/// One tracked address: identity is the (chain, normalized address) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressEntry {
    /// Chain the address belongs to
    pub chain: Chain,
    /// Normalized address (EVM lower-cased, others preserved)
    pub address: String,
    /// Optional display label
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub label: Option<String>,
    /// Free-form tags
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub tags: BTreeSet<String>,
    /// How the address entered the registry
    pub source: AddressSource,
    /// When the address was added
    pub added_at: DateTime<Utc>,
}

/// Mutable metadata carried by an address entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressMetadata {
    /// Optional display label
    pub label: Option<String>,
    /// Free-form tags
    pub tags: BTreeSet<String>,
}

impl AddressMetadata {
    /// Metadata with just a label
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            tags: BTreeSet::new(),
        }
    }
}

/// A wallet connection as reported by the host, input to discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConnection {
    /// Wallet name (used as the discovery label)
    pub wallet: String,
    /// Accounts the wallet exposes
    pub accounts: Vec<WalletAccount>,
}

/// One account exposed by a connected wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    /// Numeric chain id as wallets report it
    pub chain_id: u64,
    /// Account address
    pub address: String,
}

/// Validate an address against its chain's format
///
/// EVM chains require `0x` + 40 hex digits; Solana requires 32-44 base58
/// characters; Bitcoin accepts P2PKH, P2SH, and Bech32 forms; chains the
/// core has no rules for accept any non-empty string under 100 characters.
pub fn validate_address(chain: &Chain, address: &str) -> bool {
    if chain.is_evm() {
        return EVM_ADDRESS.is_match(address);
    }
    match chain {
        Chain::Solana => SOLANA_ADDRESS.is_match(address),
        Chain::Bitcoin => {
            BITCOIN_P2PKH.is_match(address)
                || BITCOIN_P2SH.is_match(address)
                || BITCOIN_BECH32.is_match(address)
        }
        _ => !address.is_empty() && address.len() < 100,
    }
}

/// Normalize an address for storage and comparison
///
/// EVM addresses are lower-cased; Solana and Bitcoin addresses are
/// case-significant and preserved as-is.
pub fn normalize_address(chain: &Chain, address: &str) -> String {
    if chain.is_evm() {
        address.to_ascii_lowercase()
    } else {
        address.to_string()
    }
}

/// Canonical store of tracked addresses
pub struct AddressRegistry {
    repository: Arc<dyn AddressRepository>,
    bus: Option<Arc<EventBus>>,
}

impl AddressRegistry {
    /// Create a registry over the given repository
    pub fn new(repository: Arc<dyn AddressRepository>) -> Self {
        Self {
            repository,
            bus: None,
        }
    }

    /// Attach an event bus; without one, publication is a no-op
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validate an address for a chain without storing it
    pub fn validate_address(&self, chain: &Chain, address: &str) -> bool {
        validate_address(chain, address)
    }

    /// Add an address after validation and normalization
    pub async fn add_address(
        &self,
        chain: Chain,
        address: &str,
        metadata: Option<AddressMetadata>,
    ) -> Result<AddressEntry> {
        self.add_with_source(chain, address, metadata, AddressSource::Manual)
            .await
    }

    /// Remove an address; reports whether anything was removed
    pub async fn remove_address(&self, chain: &Chain, address: &str) -> Result<bool> {
        let normalized = normalize_address(chain, address);
        let removed = self.repository.remove(chain, &normalized).await?;
        if removed {
            self.emit(
                DomainEvent::new(
                    EventType::AddressRemoved,
                    serde_json::json!({ "chain": chain.as_str(), "address": normalized }),
                ),
            )
            .await;
        }
        Ok(removed)
    }

    /// Replace the label and tags of an existing entry
    pub async fn update_metadata(
        &self,
        chain: &Chain,
        address: &str,
        metadata: AddressMetadata,
    ) -> Result<AddressEntry> {
        let normalized = normalize_address(chain, address);
        let mut entry = self
            .repository
            .find_by_chain(chain)
            .await?
            .into_iter()
            .find(|e| e.address == normalized)
            .ok_or_else(|| {
                AggregatorError::Configuration(format!(
                    "No tracked address {} on chain {}",
                    normalized, chain
                ))
            })?;

        entry.label = metadata.label;
        entry.tags = metadata.tags;
        self.repository.update(entry.clone()).await?;

        self.emit(
            DomainEvent::new(
                EventType::AddressMetadataUpdated,
                serde_json::json!({
                    "chain": chain.as_str(),
                    "address": normalized,
                    "label": entry.label,
                }),
            ),
        )
        .await;
        Ok(entry)
    }

    /// All tracked addresses, optionally filtered by chain
    pub async fn get_addresses(&self, chain: Option<&Chain>) -> Result<Vec<AddressEntry>> {
        match chain {
            Some(chain) => self.repository.find_by_chain(chain).await,
            None => self.repository.find_all().await,
        }
    }

    /// Entries carrying the given label
    pub async fn get_by_label(&self, label: &str) -> Result<Vec<AddressEntry>> {
        self.repository.find_by_label(label).await
    }

    /// Register every valid account a wallet connection exposes
    ///
    /// Invalid accounts are skipped with a warning rather than failing the
    /// whole discovery. Returns the entries actually added.
    pub async fn discover_addresses(
        &self,
        connection: &WalletConnection,
    ) -> Result<Vec<AddressEntry>> {
        let mut added = Vec::new();
        for account in &connection.accounts {
            let chain = Chain::from_chain_id(account.chain_id);
            match self
                .add_with_source(
                    chain.clone(),
                    &account.address,
                    Some(AddressMetadata::labeled(connection.wallet.clone())),
                    AddressSource::Wallet,
                )
                .await
            {
                Ok(entry) => added.push(entry),
                Err(error) => {
                    tracing::warn!(
                        wallet = %connection.wallet,
                        chain = %chain,
                        address = %account.address,
                        %error,
                        "Skipping invalid wallet account"
                    );
                }
            }
        }
        Ok(added)
    }

    async fn add_with_source(
        &self,
        chain: Chain,
        address: &str,
        metadata: Option<AddressMetadata>,
        source: AddressSource,
    ) -> Result<AddressEntry> {
        if !validate_address(&chain, address) {
            return Err(DomainError::InvalidAddress {
                chain: chain.as_str().to_string(),
                address: address.to_string(),
            }
            .into());
        }

        let metadata = metadata.unwrap_or_default();
        let entry = AddressEntry {
            address: normalize_address(&chain, address),
            chain,
            label: metadata.label,
            tags: metadata.tags,
            source,
            added_at: Utc::now(),
        };
        self.repository.save(entry.clone()).await?;

        self.emit(
            DomainEvent::new(
                EventType::AddressAdded,
                serde_json::json!({
                    "chain": entry.chain.as_str(),
                    "address": entry.address,
                    "source": entry.source,
                }),
            ),
        )
        .await;
        Ok(entry)
    }

    async fn emit(&self, event: DomainEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAddressRepository;

    fn registry() -> AddressRegistry {
        AddressRegistry::new(Arc::new(InMemoryAddressRepository::new()))
    }

    const VITALIK: &str = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";

    #[test]
    fn test_evm_validation_and_normalization() {
        assert!(validate_address(&Chain::Ethereum, VITALIK));
        assert!(!validate_address(&Chain::Ethereum, "0x1234"));
        assert!(!validate_address(&Chain::Polygon, "d8dA6BF26964aF9D7eEd9e03E53415D37aA96045"));

        assert_eq!(
            normalize_address(&Chain::Ethereum, VITALIK),
            VITALIK.to_ascii_lowercase()
        );
    }

    #[test]
    fn test_solana_validation_preserves_case() {
        let address = "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK";
        assert!(validate_address(&Chain::Solana, address));
        assert_eq!(normalize_address(&Chain::Solana, address), address);
        // 0 and O are not in the base58 alphabet
        assert!(!validate_address(&Chain::Solana, "0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl"));
    }

    #[test]
    fn test_bitcoin_address_forms() {
        assert!(validate_address(&Chain::Bitcoin, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        assert!(validate_address(&Chain::Bitcoin, "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"));
        assert!(validate_address(
            &Chain::Bitcoin,
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        ));
        assert!(!validate_address(&Chain::Bitcoin, "2NEWaddress"));
    }

    #[test]
    fn test_unknown_chain_accepts_short_nonempty() {
        let cosmos = Chain::Other("cosmos".to_string());
        assert!(validate_address(&cosmos, "cosmos1vlthgax23ca9syk7xgaz347xmf4nunefu3cg9a"));
        assert!(!validate_address(&cosmos, ""));
        assert!(!validate_address(&cosmos, &"x".repeat(100)));
    }

    #[tokio::test]
    async fn test_add_and_get_addresses() {
        let registry = registry();
        registry
            .add_address(Chain::Ethereum, VITALIK, Some(AddressMetadata::labeled("main")))
            .await
            .unwrap();
        registry
            .add_address(
                Chain::Solana,
                "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK",
                None,
            )
            .await
            .unwrap();

        let all = registry.get_addresses(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let eth = registry.get_addresses(Some(&Chain::Ethereum)).await.unwrap();
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].address, VITALIK.to_ascii_lowercase());
        assert_eq!(eth[0].source, AddressSource::Manual);

        let labeled = registry.get_by_label("main").await.unwrap();
        assert_eq!(labeled.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let registry = registry();
        let result = registry.add_address(Chain::Ethereum, "not-an-address", None).await;
        assert!(matches!(
            result,
            Err(AggregatorError::Domain(DomainError::InvalidAddress { .. }))
        ));
    }

    #[tokio::test]
    async fn test_remove_address() {
        let registry = registry();
        registry
            .add_address(Chain::Ethereum, VITALIK, None)
            .await
            .unwrap();

        // Removal accepts any casing thanks to normalization.
        assert!(registry
            .remove_address(&Chain::Ethereum, &VITALIK.to_ascii_uppercase().replace("0X", "0x"))
            .await
            .unwrap());
        assert!(!registry.remove_address(&Chain::Ethereum, VITALIK).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let registry = registry();
        registry
            .add_address(Chain::Ethereum, VITALIK, None)
            .await
            .unwrap();

        let mut tags = BTreeSet::new();
        tags.insert("cold".to_string());
        let updated = registry
            .update_metadata(
                &Chain::Ethereum,
                VITALIK,
                AddressMetadata {
                    label: Some("vault".to_string()),
                    tags,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.label.as_deref(), Some("vault"));
        assert!(updated.tags.contains("cold"));

        let missing = registry
            .update_metadata(&Chain::Bitcoin, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", AddressMetadata::default())
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_discover_addresses_maps_chain_ids() {
        let registry = registry();
        let connection = WalletConnection {
            wallet: "metamask".to_string(),
            accounts: vec![
                WalletAccount {
                    chain_id: 1,
                    address: VITALIK.to_string(),
                },
                WalletAccount {
                    chain_id: 137,
                    address: VITALIK.to_string(),
                },
                WalletAccount {
                    chain_id: 1,
                    address: "garbage".to_string(),
                },
            ],
        };

        let added = registry.discover_addresses(&connection).await.unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].chain, Chain::Ethereum);
        assert_eq!(added[1].chain, Chain::Polygon);
        assert!(added.iter().all(|e| e.source == AddressSource::Wallet));
        assert!(added.iter().all(|e| e.label.as_deref() == Some("metamask")));
    }
}
