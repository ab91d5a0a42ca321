//! Sync orchestrator: protected provider health cycles
//!
//! Owns one circuit breaker and one rate limiter per registered provider
//! and runs periodic protected health calls against them: admission check,
//! cooperative rate-limit wait, then a breaker-wrapped connect-and-fetch
//! against a canary address set. Per-provider failures are recorded in the
//! settled result, never cancel peers, and feed the provider metrics.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use crate::ports::{AssetProvider, ProviderKind, BROKERAGE_SENTINEL};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use event_bus::EventBus;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use types::{DomainEvent, EventType};

/// Protection pair owned per provider
struct ProviderGuard {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
}

/// Outcome of one sync cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Providers whose health call succeeded
    pub successful: Vec<String>,
    /// Providers whose health call failed or was refused
    pub failed: Vec<String>,
    /// Failure reason per failed provider
    pub errors: HashMap<String, String>,
    /// Wall-clock duration of the whole cycle in milliseconds
    pub total_duration_ms: u64,
    /// When the cycle finished
    pub timestamp: DateTime<Utc>,
}

/// Rolling per-provider sync statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSyncMetrics {
    /// Health calls attempted
    pub attempts: u64,
    /// Health calls that succeeded
    pub successes: u64,
    /// Health calls that failed or were refused
    pub failures: u64,
    /// Rolling average response time in milliseconds
    pub avg_response_ms: f64,
    /// Last successful health call
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last failed health call
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ProviderSyncMetrics {
    fn record(&mut self, success: bool, elapsed_ms: f64) {
        self.attempts += 1;
        if success {
            self.successes += 1;
            self.last_success_at = Some(Utc::now());
        } else {
            self.failures += 1;
            self.last_failure_at = Some(Utc::now());
        }
        let n = self.attempts as f64;
        self.avg_response_ms += (elapsed_ms - self.avg_response_ms) / n;
    }
}

/// Snapshot of orchestrator-wide metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetrics {
    /// Per-provider statistics
    pub providers: HashMap<String, ProviderSyncMetrics>,
    /// Completed sync cycles
    pub total_cycles: u64,
    /// Rolling average cycle duration in milliseconds
    pub avg_cycle_duration_ms: f64,
    /// When the last cycle completed
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// When the next scheduled cycle is due, if scheduling is active
    pub next_scheduled_at: Option<DateTime<Utc>>,
}

/// Cancellation handle for a scheduled sync loop
pub struct ScheduledSync {
    handle: JoinHandle<()>,
}

impl ScheduledSync {
    /// Stop the loop; in-flight cycles are not interrupted mid-call
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Whether the loop is still running
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Schedules and runs protected provider health calls
pub struct SyncOrchestrator {
    providers: RwLock<HashMap<String, Arc<dyn AssetProvider>>>,
    guards: RwLock<HashMap<String, ProviderGuard>>,
    canaries: RwLock<HashMap<String, Vec<String>>>,
    config: AggregatorConfig,
    bus: Option<Arc<EventBus>>,

    sync_in_flight: AtomicBool,
    metrics: DashMap<String, ProviderSyncMetrics>,
    breaker_states: DashMap<String, CircuitState>,
    total_cycles: AtomicU64,
    cycle_stats: Mutex<CycleStats>,
}

#[derive(Default)]
struct CycleStats {
    avg_duration_ms: f64,
    last_cycle_at: Option<DateTime<Utc>>,
    next_scheduled_at: Option<DateTime<Utc>>,
}

impl SyncOrchestrator {
    /// Create an orchestrator with the given defaults
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            guards: RwLock::new(HashMap::new()),
            canaries: RwLock::new(HashMap::new()),
            config,
            bus: None,
            sync_in_flight: AtomicBool::new(false),
            metrics: DashMap::new(),
            breaker_states: DashMap::new(),
            total_cycles: AtomicU64::new(0),
            cycle_stats: Mutex::new(CycleStats::default()),
        }
    }

    /// Attach an event bus; without one, publication is a no-op
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register a provider, creating its breaker and limiter
    pub async fn register_provider(&self, provider: Arc<dyn AssetProvider>) {
        let id = provider.source().to_string();
        let canary = match provider.kind() {
            ProviderKind::Brokerage => vec![BROKERAGE_SENTINEL.to_string()],
            _ => Vec::new(),
        };
        self.guards.write().await.insert(
            id.clone(),
            ProviderGuard {
                breaker: Arc::new(CircuitBreaker::new(
                    id.clone(),
                    self.config.circuit_breaker.clone(),
                )),
                limiter: Arc::new(RateLimiter::new(
                    self.config.rate_limit,
                    self.config.rate_limit_strategy,
                )),
            },
        );
        self.canaries.write().await.insert(id.clone(), canary);
        self.breaker_states.insert(id.clone(), CircuitState::Closed);
        self.providers.write().await.insert(id, provider);
    }

    /// Registered provider identifiers
    pub async fn provider_ids(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }

    /// Set the canary addresses used by a provider's health call
    pub async fn set_canary_addresses(&self, provider: &str, addresses: Vec<String>) {
        self.canaries
            .write()
            .await
            .insert(provider.to_string(), addresses);
    }

    /// Run one sync cycle over the given providers
    ///
    /// Only one cycle may be in flight per orchestrator; a concurrent call
    /// fails with [`AggregatorError::SyncInProgress`].
    pub async fn orchestrate_sync(&self, providers: &[String]) -> Result<SyncResult> {
        self.run_cycle(providers, false).await
    }

    async fn run_cycle(&self, providers: &[String], scheduled: bool) -> Result<SyncResult> {
        if self
            .sync_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AggregatorError::SyncInProgress);
        }

        let result = self.run_cycle_inner(providers, scheduled).await;
        self.sync_in_flight.store(false, Ordering::Release);
        result
    }

    async fn run_cycle_inner(&self, providers: &[String], scheduled: bool) -> Result<SyncResult> {
        let started = Instant::now();
        self.emit(DomainEvent::new(
            EventType::SyncCycleStarted,
            serde_json::json!({ "providers": providers, "scheduled": scheduled }),
        ))
        .await;

        let tasks = providers.iter().map(|id| {
            let id = id.clone();
            async move {
                let outcome = self.protected_health_call(&id).await;
                (id, outcome)
            }
        });
        let outcomes = join_all(tasks).await;

        let mut result = SyncResult {
            successful: Vec::new(),
            failed: Vec::new(),
            errors: HashMap::new(),
            total_duration_ms: 0,
            timestamp: Utc::now(),
        };
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(()) => result.successful.push(provider),
                Err(error) => {
                    tracing::warn!(provider = %provider, %error, "Sync health call failed");
                    self.emit(
                        DomainEvent::new(
                            EventType::SyncSourceFailed,
                            serde_json::json!({ "source": provider, "error": error.to_string() }),
                        ),
                    )
                    .await;
                    result.errors.insert(provider.clone(), error.to_string());
                    result.failed.push(provider);
                }
            }
        }
        result.total_duration_ms = started.elapsed().as_millis() as u64;
        result.timestamp = Utc::now();

        let cycles = self.total_cycles.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut stats = self.cycle_stats.lock().await;
            stats.avg_duration_ms +=
                (result.total_duration_ms as f64 - stats.avg_duration_ms) / cycles as f64;
            stats.last_cycle_at = Some(result.timestamp);
        }

        self.emit(
            DomainEvent::new(
                EventType::SyncCycleCompleted,
                serde_json::to_value(&result).unwrap_or_default(),
            ),
        )
        .await;
        Ok(result)
    }

    /// One protected health call: admission, rate-limit wait, breaker-
    /// wrapped connect-and-canary-fetch, metrics and breaker-event updates
    async fn protected_health_call(&self, provider_id: &str) -> Result<()> {
        let (provider, breaker, limiter) = {
            let providers = self.providers.read().await;
            let guards = self.guards.read().await;
            let provider = providers
                .get(provider_id)
                .ok_or_else(|| AggregatorError::UnknownProvider(provider_id.to_string()))?
                .clone();
            let guard = guards
                .get(provider_id)
                .ok_or_else(|| AggregatorError::UnknownProvider(provider_id.to_string()))?;
            (provider, guard.breaker.clone(), guard.limiter.clone())
        };
        let canary = self
            .canaries
            .read()
            .await
            .get(provider_id)
            .cloned()
            .unwrap_or_default();

        let admission_state = breaker.state().await;
        self.note_breaker_state(provider_id, admission_state).await;
        if admission_state.is_open() {
            let error = AggregatorError::CircuitOpen {
                provider: provider_id.to_string(),
            };
            self.record_outcome(provider_id, false, 0.0);
            return Err(error);
        }

        limiter.wait_for_slot().await;

        let started = Instant::now();
        let call = breaker
            .execute(|| async {
                if !provider.is_connected() {
                    provider.connect().await?;
                }
                provider.fetch_assets(&canary).await?;
                Ok(())
            })
            .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;

        self.record_outcome(provider_id, call.is_ok(), elapsed_ms);
        let state_after = breaker.state().await;
        self.note_breaker_state(provider_id, state_after).await;
        call
    }

    fn record_outcome(&self, provider: &str, success: bool, elapsed_ms: f64) {
        self.metrics
            .entry(provider.to_string())
            .or_default()
            .record(success, elapsed_ms);
    }

    /// Emit a breaker event when the observed state differs from the last
    /// one this orchestrator saw for the provider
    async fn note_breaker_state(&self, provider: &str, observed: CircuitState) {
        let changed = {
            let mut last = self
                .breaker_states
                .entry(provider.to_string())
                .or_insert(CircuitState::Closed);
            if *last == observed {
                false
            } else {
                *last = observed;
                true
            }
        };
        if !changed {
            return;
        }
        let event_type = match observed {
            CircuitState::Open => EventType::CircuitBreakerOpened,
            CircuitState::Closed => EventType::CircuitBreakerClosed,
            CircuitState::HalfOpen => EventType::CircuitBreakerHalfOpen,
        };
        self.emit(DomainEvent::new(
            event_type,
            serde_json::json!({ "provider": provider }),
        ))
        .await;
    }

    /// Run `orchestrate_sync` over all providers at a fixed period
    ///
    /// Returns a cancellation handle; the loop skips a tick when a cycle
    /// is already in flight.
    pub fn schedule_sync_cycle(self: Arc<Self>, interval: Duration) -> ScheduledSync {
        let orchestrator = self;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; skip it
            // so the first cycle runs one period from now.
            ticker.tick().await;
            loop {
                {
                    let mut stats = orchestrator.cycle_stats.lock().await;
                    stats.next_scheduled_at = Some(
                        Utc::now()
                            + chrono::Duration::from_std(interval)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                }
                ticker.tick().await;
                let providers = orchestrator.provider_ids().await;
                match orchestrator.run_cycle(&providers, true).await {
                    Ok(result) => {
                        tracing::debug!(
                            successful = result.successful.len(),
                            failed = result.failed.len(),
                            "Scheduled sync cycle completed"
                        );
                    }
                    Err(AggregatorError::SyncInProgress) => {
                        tracing::debug!("Skipping scheduled sync: cycle already in flight");
                    }
                    Err(error) => {
                        tracing::warn!(%error, "Scheduled sync cycle failed");
                    }
                }
            }
        });
        ScheduledSync { handle }
    }

    /// Reset a provider's breaker and run a single protected health call
    pub async fn retry_failed_provider(&self, provider: &str) -> Result<()> {
        let breaker = {
            let guards = self.guards.read().await;
            guards
                .get(provider)
                .ok_or_else(|| AggregatorError::UnknownProvider(provider.to_string()))?
                .breaker
                .clone()
        };
        breaker.reset().await;
        self.protected_health_call(provider).await
    }

    /// Hot-swap a provider's rate-limit configuration
    pub async fn configure_rate_limit(&self, provider: &str, config: RateLimitConfig) -> Result<()> {
        let guards = self.guards.read().await;
        let guard = guards
            .get(provider)
            .ok_or_else(|| AggregatorError::UnknownProvider(provider.to_string()))?;
        guard.limiter.update_config(config).await;
        Ok(())
    }

    /// Replace a provider's circuit breaker with freshly configured state
    pub async fn configure_circuit_breaker(
        &self,
        provider: &str,
        config: CircuitBreakerConfig,
    ) -> Result<()> {
        let mut guards = self.guards.write().await;
        let guard = guards
            .get_mut(provider)
            .ok_or_else(|| AggregatorError::UnknownProvider(provider.to_string()))?;
        guard.breaker = Arc::new(CircuitBreaker::new(provider, config));
        Ok(())
    }

    /// Current breaker state for a provider
    pub async fn get_circuit_state(&self, provider: &str) -> Result<CircuitState> {
        let breaker = {
            let guards = self.guards.read().await;
            guards
                .get(provider)
                .ok_or_else(|| AggregatorError::UnknownProvider(provider.to_string()))?
                .breaker
                .clone()
        };
        Ok(breaker.state().await)
    }

    /// Snapshot of per-provider and cycle metrics
    pub async fn get_sync_metrics(&self) -> SyncMetrics {
        let stats = self.cycle_stats.lock().await;
        SyncMetrics {
            providers: self
                .metrics
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            total_cycles: self.total_cycles.load(Ordering::Relaxed),
            avg_cycle_duration_ms: stats.avg_duration_ms,
            last_cycle_at: stats.last_cycle_at,
            next_scheduled_at: stats.next_scheduled_at,
        }
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
    use crate::test_utils::MockProvider;
    use event_bus::test_utils::EventRecorder;
    use event_bus::EventBus;

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_millis(50),
                half_open_retries: 1,
            },
            rate_limit: RateLimitConfig::per_minute(60_000),
            ..AggregatorConfig::default()
        }
    }

    async fn orchestrator_with(
        providers: Vec<Arc<MockProvider>>,
    ) -> (Arc<SyncOrchestrator>, Arc<EventBus>, Arc<EventRecorder>) {
        let bus = Arc::new(EventBus::new());
        let recorder = Arc::new(EventRecorder::new());
        bus.subscribe_all(recorder.clone()).await;

        let orchestrator = Arc::new(SyncOrchestrator::new(config()).with_event_bus(bus.clone()));
        for provider in providers {
            orchestrator.register_provider(provider).await;
        }
        (orchestrator, bus, recorder)
    }

    #[tokio::test]
    async fn test_sync_cycle_all_healthy() {
        let evm = Arc::new(MockProvider::evm());
        let solana = Arc::new(MockProvider::solana());
        let (orchestrator, _bus, recorder) =
            orchestrator_with(vec![evm.clone(), solana.clone()]).await;

        let result = orchestrator
            .orchestrate_sync(&["evm".to_string(), "solana".to_string()])
            .await
            .unwrap();

        assert_eq!(result.successful.len(), 2);
        assert!(result.failed.is_empty());
        assert_eq!(recorder.count_of(EventType::SyncCycleStarted), 1);
        assert_eq!(recorder.count_of(EventType::SyncCycleCompleted), 1);

        let metrics = orchestrator.get_sync_metrics().await;
        assert_eq!(metrics.total_cycles, 1);
        assert_eq!(metrics.providers["evm"].successes, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_recorded_not_propagated() {
        let evm = Arc::new(MockProvider::evm());
        let solana = Arc::new(MockProvider::solana());
        solana.fail_fetches("rpc unreachable");
        let (orchestrator, _bus, recorder) = orchestrator_with(vec![evm, solana]).await;

        let result = orchestrator
            .orchestrate_sync(&["evm".to_string(), "solana".to_string()])
            .await
            .unwrap();

        assert_eq!(result.successful, vec!["evm".to_string()]);
        assert_eq!(result.failed, vec!["solana".to_string()]);
        assert!(result.errors["solana"].contains("rpc unreachable"));
        assert_eq!(recorder.count_of(EventType::SyncSourceFailed), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_refuses() {
        let solana = Arc::new(MockProvider::solana());
        solana.fail_fetches("down");
        let (orchestrator, _bus, recorder) = orchestrator_with(vec![solana.clone()]).await;
        let providers = vec!["solana".to_string()];

        // failure_threshold = 2: two failing cycles open the breaker.
        orchestrator.orchestrate_sync(&providers).await.unwrap();
        orchestrator.orchestrate_sync(&providers).await.unwrap();
        assert_eq!(
            orchestrator.get_circuit_state("solana").await.unwrap(),
            CircuitState::Open
        );
        assert_eq!(recorder.count_of(EventType::CircuitBreakerOpened), 1);

        // Next cycle is refused without touching the provider.
        let calls_before = solana.fetch_count();
        let result = orchestrator.orchestrate_sync(&providers).await.unwrap();
        assert_eq!(result.failed, providers);
        assert!(result.errors["solana"].contains("Circuit breaker open"));
        assert_eq!(solana.fetch_count(), calls_before);
    }

    #[tokio::test]
    async fn test_breaker_recovers_through_half_open() {
        let solana = Arc::new(MockProvider::solana());
        solana.fail_fetches("down");
        let (orchestrator, _bus, recorder) = orchestrator_with(vec![solana.clone()]).await;
        let providers = vec!["solana".to_string()];

        orchestrator.orchestrate_sync(&providers).await.unwrap();
        orchestrator.orchestrate_sync(&providers).await.unwrap();
        assert_eq!(
            orchestrator.get_circuit_state("solana").await.unwrap(),
            CircuitState::Open
        );

        solana.heal();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let result = orchestrator.orchestrate_sync(&providers).await.unwrap();
        assert_eq!(result.successful, providers);
        assert_eq!(
            orchestrator.get_circuit_state("solana").await.unwrap(),
            CircuitState::Closed
        );
        assert_eq!(recorder.count_of(EventType::CircuitBreakerHalfOpen), 1);
        assert_eq!(recorder.count_of(EventType::CircuitBreakerClosed), 1);
    }

    #[tokio::test]
    async fn test_retry_failed_provider_resets_breaker() {
        let solana = Arc::new(MockProvider::solana());
        solana.fail_fetches("down");
        let (orchestrator, _bus, _recorder) = orchestrator_with(vec![solana.clone()]).await;
        let providers = vec!["solana".to_string()];

        orchestrator.orchestrate_sync(&providers).await.unwrap();
        orchestrator.orchestrate_sync(&providers).await.unwrap();
        assert_eq!(
            orchestrator.get_circuit_state("solana").await.unwrap(),
            CircuitState::Open
        );

        solana.heal();
        orchestrator.retry_failed_provider("solana").await.unwrap();
        assert_eq!(
            orchestrator.get_circuit_state("solana").await.unwrap(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_configure_rate_limit_and_unknown_provider() {
        let evm = Arc::new(MockProvider::evm());
        let (orchestrator, _bus, _recorder) = orchestrator_with(vec![evm]).await;

        orchestrator
            .configure_rate_limit("evm", RateLimitConfig::per_minute(10))
            .await
            .unwrap();
        assert!(matches!(
            orchestrator
                .configure_rate_limit("nope", RateLimitConfig::per_minute(10))
                .await,
            Err(AggregatorError::UnknownProvider(_))
        ));
        assert!(matches!(
            orchestrator.get_circuit_state("nope").await,
            Err(AggregatorError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_sync_runs_and_cancels() {
        let evm = Arc::new(MockProvider::evm());
        let (orchestrator, _bus, _recorder) = orchestrator_with(vec![evm.clone()]).await;

        let schedule = orchestrator.clone().schedule_sync_cycle(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(schedule.is_active());
        schedule.cancel();

        let metrics = orchestrator.get_sync_metrics().await;
        assert!(metrics.total_cycles >= 2);
        assert!(metrics.next_scheduled_at.is_some());
        assert!(evm.fetch_count() >= 2);
    }

    #[tokio::test]
    async fn test_unknown_provider_in_cycle_is_a_per_provider_failure() {
        let evm = Arc::new(MockProvider::evm());
        let (orchestrator, _bus, _recorder) = orchestrator_with(vec![evm]).await;

        let result = orchestrator
            .orchestrate_sync(&["evm".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(result.successful, vec!["evm".to_string()]);
        assert_eq!(result.failed, vec!["ghost".to_string()]);
    }
}
