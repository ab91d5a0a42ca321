//! Domain events published during aggregation
//!
//! Every event carries a unique id, its type tag, an occurrence timestamp,
//! an optional aggregate id, and a type-specific JSON payload. Events are
//! immutable once constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Event-type tags, grouped by the component that emits them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Portfolio lifecycle
    PortfolioAggregationStarted,
    PortfolioAggregationCompleted,
    PortfolioAggregationFailed,
    PortfolioReconciliationStarted,
    PortfolioReconciliationCompleted,

    // Asset mutations
    AssetAddedToPortfolio,
    AssetMerged,
    AssetPriceUpdated,

    // Provider activity
    IntegrationSourceConnected,
    IntegrationSourceFailed,
    IntegrationSourceDataFetched,

    // Address registry
    AddressAdded,
    AddressRemoved,
    AddressMetadataUpdated,

    // Sync orchestration
    SyncCycleStarted,
    SyncCycleCompleted,
    SyncSourceFailed,

    // Circuit breaker transitions
    CircuitBreakerOpened,
    CircuitBreakerClosed,
    CircuitBreakerHalfOpen,
}

impl EventType {
    /// The wire tag for this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PortfolioAggregationStarted => "PortfolioAggregationStarted",
            EventType::PortfolioAggregationCompleted => "PortfolioAggregationCompleted",
            EventType::PortfolioAggregationFailed => "PortfolioAggregationFailed",
            EventType::PortfolioReconciliationStarted => "PortfolioReconciliationStarted",
            EventType::PortfolioReconciliationCompleted => "PortfolioReconciliationCompleted",
            EventType::AssetAddedToPortfolio => "AssetAddedToPortfolio",
            EventType::AssetMerged => "AssetMerged",
            EventType::AssetPriceUpdated => "AssetPriceUpdated",
            EventType::IntegrationSourceConnected => "IntegrationSourceConnected",
            EventType::IntegrationSourceFailed => "IntegrationSourceFailed",
            EventType::IntegrationSourceDataFetched => "IntegrationSourceDataFetched",
            EventType::AddressAdded => "AddressAdded",
            EventType::AddressRemoved => "AddressRemoved",
            EventType::AddressMetadataUpdated => "AddressMetadataUpdated",
            EventType::SyncCycleStarted => "SyncCycleStarted",
            EventType::SyncCycleCompleted => "SyncCycleCompleted",
            EventType::SyncSourceFailed => "SyncSourceFailed",
            EventType::CircuitBreakerOpened => "CircuitBreakerOpened",
            EventType::CircuitBreakerClosed => "CircuitBreakerClosed",
            EventType::CircuitBreakerHalfOpen => "CircuitBreakerHalfOpen",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable domain event record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Unique event id
    pub id: Uuid,
    /// Type tag
    pub event_type: EventType,
    /// When the event occurred
    pub occurred_at: DateTime<Utc>,
    /// Aggregate the event belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub aggregate_id: Option<String>,
    /// Type-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DomainEvent {
    /// Create an event stamped with the current time
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            occurred_at: Utc::now(),
            aggregate_id: None,
            payload,
        }
    }

    /// Bind the event to an aggregate
    pub fn with_aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_construction() {
        let event = DomainEvent::new(
            EventType::AssetMerged,
            json!({ "symbol": "ETH", "mergedFrom": "solana" }),
        )
        .with_aggregate_id("portfolio_1");

        assert_eq!(event.event_type, EventType::AssetMerged);
        assert_eq!(event.aggregate_id.as_deref(), Some("portfolio_1"));
        assert_eq!(event.payload["symbol"], "ETH");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = DomainEvent::new(EventType::SyncCycleStarted, json!({}));
        let b = DomainEvent::new(EventType::SyncCycleStarted, json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_event_type_tags() {
        assert_eq!(
            EventType::PortfolioAggregationCompleted.as_str(),
            "PortfolioAggregationCompleted"
        );
        let json = serde_json::to_string(&EventType::CircuitBreakerHalfOpen).unwrap();
        assert_eq!(json, "\"CircuitBreakerHalfOpen\"");
    }
}
