//! Aggregation service: the end-to-end portfolio pipeline
//!
//! One call runs cache lookup, parallel provider fan-out with per-provider
//! failure isolation, serial reduction into the portfolio aggregate, a
//! defense-in-depth reconciliation pass, best-effort price enrichment,
//! persistence, and the full event lifecycle. Provider and valuator
//! failures never abort the pipeline; persistence failures and domain
//! invariant violations do, after `PortfolioAggregationFailed` is emitted.

use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use crate::ports::{AssetProvider, PortfolioRepository, ProviderKind, Valuator, BROKERAGE_SENTINEL};
use chrono::Utc;
use event_bus::{EventBus, EventHandler, Subscription};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use types::{
    AddOutcome, Asset, Chain, DomainEvent, EventType, Portfolio, EVM_CHAINS,
};

/// Input to [`AggregationService::aggregate_portfolio`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationParams {
    /// Addresses to aggregate, keyed by chain
    pub addresses: HashMap<Chain, Vec<String>>,
    /// Providers to query; `None` means every registered provider
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sources: Option<Vec<String>>,
    /// User the portfolio belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    /// Skip the cache short-circuit and force a fresh fan-out
    #[serde(default)]
    pub force_refresh: bool,
}

impl AggregationParams {
    /// Params for one chain's address list
    pub fn for_chain(chain: Chain, addresses: Vec<String>) -> Self {
        Self {
            addresses: HashMap::from([(chain, addresses)]),
            ..Default::default()
        }
    }

    /// Add another chain's addresses
    pub fn with_chain(mut self, chain: Chain, addresses: Vec<String>) -> Self {
        self.addresses.insert(chain, addresses);
        self
    }

    /// Restrict the fan-out to the given providers
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Bind the portfolio to a user
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Skip the cache short-circuit
    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// End-to-end portfolio aggregation pipeline
pub struct AggregationService {
    providers: RwLock<HashMap<String, Arc<dyn AssetProvider>>>,
    repository: Arc<dyn PortfolioRepository>,
    valuator: Arc<dyn Valuator>,
    bus: Option<Arc<EventBus>>,
    config: AggregatorConfig,
}

impl AggregationService {
    /// Create a service over the injected ports
    pub fn new(
        repository: Arc<dyn PortfolioRepository>,
        valuator: Arc<dyn Valuator>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            repository,
            valuator,
            bus: None,
            config,
        }
    }

    /// Attach an event bus; without one, publication is a no-op
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register a provider under its source id
    pub async fn register_provider(&self, provider: Arc<dyn AssetProvider>) {
        self.providers
            .write()
            .await
            .insert(provider.source().to_string(), provider);
    }

    /// Run the aggregation pipeline for an address set
    pub async fn aggregate_portfolio(&self, params: AggregationParams) -> Result<Portfolio> {
        let portfolio_id = match &params.user_id {
            Some(user_id) => format!("portfolio_{}", user_id),
            None => format!("portfolio_{}", Utc::now().timestamp_millis()),
        };

        // Strict-TTL cache short-circuit, the only synchronous early exit.
        if !params.force_refresh {
            if let Some(cached) = self.repository.find_by_id(&portfolio_id).await? {
                let age = Utc::now().signed_duration_since(cached.last_updated());
                if age.num_milliseconds() >= 0
                    && (age.num_milliseconds() as u128) < self.config.cache_ttl().as_millis()
                {
                    tracing::debug!(
                        portfolio_id = %portfolio_id,
                        age_ms = age.num_milliseconds(),
                        "Returning cached portfolio"
                    );
                    return Ok(cached);
                }
            }
        }

        self.emit(
            DomainEvent::new(
                EventType::PortfolioAggregationStarted,
                serde_json::json!({
                    "sources": params.sources,
                    "addresses": params.addresses,
                }),
            )
            .with_aggregate_id(portfolio_id.clone()),
        )
        .await;

        let started = Instant::now();
        match self.run_pipeline(&portfolio_id, &params).await {
            Ok(portfolio) => {
                self.emit(
                    DomainEvent::new(
                        EventType::PortfolioAggregationCompleted,
                        serde_json::json!({
                            "totalValue": portfolio.get_total_value(&self.config.base_currency),
                            "currency": self.config.base_currency,
                            "assetCount": portfolio.asset_count(),
                            "durationMs": started.elapsed().as_millis() as u64,
                        }),
                    )
                    .with_aggregate_id(portfolio_id),
                )
                .await;
                Ok(portfolio)
            }
            Err(error) => {
                self.emit(
                    DomainEvent::new(
                        EventType::PortfolioAggregationFailed,
                        serde_json::json!({ "error": error.to_string() }),
                    )
                    .with_aggregate_id(portfolio_id),
                )
                .await;
                Err(error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        portfolio_id: &str,
        params: &AggregationParams,
    ) -> Result<Portfolio> {
        let mut portfolio = Portfolio::new(portfolio_id, params.user_id.clone());

        let targets = self.target_providers(params).await;
        let fetches = targets.iter().map(|(id, provider, addresses)| {
            let id = id.clone();
            let provider = provider.clone();
            let addresses = addresses.clone();
            async move {
                let outcome = self.fetch_from_provider(&id, provider, &addresses).await;
                (id, outcome)
            }
        });
        let outcomes = join_all(fetches).await;

        // Serial reduction: each provider's assets land atomically relative
        // to its peers, merging on insert.
        for (provider_id, outcome) in outcomes {
            match outcome {
                Ok(assets) => {
                    for asset in assets {
                        let summary = serde_json::json!({
                            "assetId": asset.id,
                            "symbol": asset.symbol,
                            "provider": provider_id,
                        });
                        match portfolio.add_asset(asset)? {
                            AddOutcome::Inserted => {
                                self.emit(
                                    DomainEvent::new(EventType::AssetAddedToPortfolio, summary)
                                        .with_aggregate_id(portfolio_id),
                                )
                                .await;
                            }
                            AddOutcome::Merged => {
                                self.emit(
                                    DomainEvent::new(EventType::AssetMerged, summary)
                                        .with_aggregate_id(portfolio_id),
                                )
                                .await;
                            }
                        }
                    }
                    portfolio.add_source(provider_id);
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %provider_id,
                        %error,
                        "Provider failed during aggregation; continuing with partial data"
                    );
                    self.emit(
                        DomainEvent::new(
                            EventType::IntegrationSourceFailed,
                            serde_json::json!({
                                "source": provider_id,
                                "error": error.to_string(),
                            }),
                        )
                        .with_aggregate_id(portfolio_id),
                    )
                    .await;
                }
            }
        }

        // Defense-in-depth in case two providers produced duplicates that
        // bypassed the per-insert merge.
        self.emit(
            DomainEvent::new(EventType::PortfolioReconciliationStarted, serde_json::json!({}))
                .with_aggregate_id(portfolio_id),
        )
        .await;
        portfolio.reconcile()?;
        self.emit(
            DomainEvent::new(
                EventType::PortfolioReconciliationCompleted,
                serde_json::json!({ "assetCount": portfolio.asset_count() }),
            )
            .with_aggregate_id(portfolio_id),
        )
        .await;

        self.enrich_prices(&mut portfolio, portfolio_id).await;

        self.repository.save(&portfolio).await?;

        Ok(portfolio)
    }

    /// Resolve the providers to query and their relevant address subsets
    async fn target_providers(
        &self,
        params: &AggregationParams,
    ) -> Vec<(String, Arc<dyn AssetProvider>, Vec<String>)> {
        let providers = self.providers.read().await;
        let requested: Vec<String> = match &params.sources {
            Some(sources) => sources.clone(),
            None => providers.keys().cloned().collect(),
        };

        let mut targets = Vec::new();
        for id in requested {
            let Some(provider) = providers.get(&id) else {
                tracing::warn!(provider = %id, "Skipping unknown provider id");
                continue;
            };
            let relevant = relevant_addresses(provider.kind(), &params.addresses);
            if relevant.is_empty() {
                tracing::debug!(provider = %id, "No relevant addresses; skipping provider");
                continue;
            }
            targets.push((id, provider.clone(), relevant));
        }
        targets
    }

    /// Connect if needed, fetch, and map one provider's holdings
    async fn fetch_from_provider(
        &self,
        provider_id: &str,
        provider: Arc<dyn AssetProvider>,
        addresses: &[String],
    ) -> Result<Vec<Asset>> {
        if !provider.is_connected() {
            provider.connect().await?;
            self.emit(DomainEvent::new(
                EventType::IntegrationSourceConnected,
                serde_json::json!({ "source": provider_id }),
            ))
            .await;
        }

        let raw = provider.fetch_assets(addresses).await?;
        self.emit(DomainEvent::new(
            EventType::IntegrationSourceDataFetched,
            serde_json::json!({ "source": provider_id, "count": raw.len() }),
        ))
        .await;

        raw.into_iter()
            .map(|r| r.into_asset(provider_id).map_err(AggregatorError::from))
            .collect()
    }

    /// Best-effort price enrichment: valuator failures are logged, never fatal
    async fn enrich_prices(&self, portfolio: &mut Portfolio, portfolio_id: &str) {
        let symbols: Vec<String> = portfolio.symbols().into_iter().collect();
        if symbols.is_empty() {
            return;
        }

        let prices = match self
            .valuator
            .get_batch_prices(&symbols, &self.config.base_currency)
            .await
        {
            Ok(prices) => prices,
            Err(error) => {
                tracing::warn!(%error, "Price enrichment failed; continuing without prices");
                return;
            }
        };

        for (symbol, price) in prices {
            let updated = portfolio.update_prices_for_symbol(&symbol, &price);
            if !updated.is_empty() {
                self.emit(
                    DomainEvent::new(
                        EventType::AssetPriceUpdated,
                        serde_json::json!({
                            "symbol": symbol,
                            "price": price.value,
                            "currency": price.currency,
                            "assetIds": updated,
                        }),
                    )
                    .with_aggregate_id(portfolio_id),
                )
                .await;
            }
        }
    }

    /// Force-refresh an existing portfolio from its own asset attribution
    ///
    /// Rebuilds the chain-to-addresses map from each asset's recorded
    /// account and re-runs the pipeline against the portfolio's sources.
    pub async fn refresh_portfolio(&self, id: &str) -> Result<Portfolio> {
        let existing = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| AggregatorError::PortfolioNotFound(id.to_string()))?;

        let mut addresses: HashMap<Chain, Vec<String>> = HashMap::new();
        for asset in existing.assets() {
            if let (Some(chain), Some(account)) =
                (asset.chain.clone(), asset.metadata.account.clone())
            {
                let entry = addresses.entry(chain).or_default();
                if !entry.contains(&account) {
                    entry.push(account);
                }
            }
        }

        let params = AggregationParams {
            addresses,
            sources: Some(existing.sources().map(str::to_string).collect()),
            user_id: existing.user_id().map(str::to_string),
            force_refresh: true,
        };
        self.aggregate_portfolio(params).await
    }

    /// Load a portfolio by id, if present
    pub async fn get_portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
        self.repository.find_by_id(id).await
    }

    /// Subscribe to one event type; inert handle when no bus is attached
    pub async fn on(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        match &self.bus {
            Some(bus) => bus.subscribe(event_type, handler).await,
            None => Subscription::disabled(),
        }
    }

    /// Detach a previously registered handler; idempotent
    pub async fn off(&self, subscription: &Subscription) {
        if let Some(bus) = &self.bus {
            bus.unsubscribe(subscription).await;
        }
    }

    async fn emit(&self, event: DomainEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(&event).await;
        }
    }
}

/// Address subset a provider kind is responsible for, duplicates removed
fn relevant_addresses(kind: ProviderKind, addresses: &HashMap<Chain, Vec<String>>) -> Vec<String> {
    const SOLANA_CHAINS: [Chain; 1] = [Chain::Solana];

    let chains: &[Chain] = match kind {
        ProviderKind::Evm => &EVM_CHAINS,
        ProviderKind::Solana => &SOLANA_CHAINS,
        // Brokerage accounts are not address-based; a single sentinel
        // account stands in for the whole relevant set.
        ProviderKind::Brokerage => return vec![BROKERAGE_SENTINEL.to_string()],
    };

    let mut relevant: Vec<String> = Vec::new();
    for chain in chains {
        if let Some(list) = addresses.get(chain) {
            for address in list {
                if !relevant.contains(address) {
                    relevant.push(address.clone());
                }
            }
        }
    }
    relevant
}
