//! # Folio Event Bus - In-Process Domain Event Fan-Out
//!
//! Publish/subscribe distribution of [`DomainEvent`]s inside a single
//! process. Handlers subscribe to one event type or to everything; publish
//! dispatches sequentially in subscription order and never lets one
//! handler's failure interrupt its siblings.
//!
//! The bus is an optional collaborator: components hold an
//! `Option<Arc<EventBus>>` and skip publication entirely when the host
//! supplies none, without any change in semantics.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use types::{DomainEvent, EventType};

pub mod test_utils;

/// Result type alias for handler outcomes
pub type Result<T> = std::result::Result<T, BusError>;

/// Error surfaced by an event handler
///
/// Handler failures are logged by the bus and never propagate to the
/// publisher or to sibling handlers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// Handler-specific failure
    #[error("Handler failed: {0}")]
    HandlerFailed(String),
}

impl BusError {
    /// Create a handler failure
    pub fn handler_failed(msg: impl Into<String>) -> Self {
        BusError::HandlerFailed(msg.into())
    }
}

/// A subscriber to domain events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event; failures are logged, never propagated
    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// Adapter turning a closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&DomainEvent) -> Result<()> + Send + Sync,
{
    async fn handle(&self, event: &DomainEvent) -> Result<()> {
        (self.0)(event)
    }
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&DomainEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handle returned by subscription, used to unsubscribe
///
/// Unsubscribing is idempotent: detaching a handle that is already gone is
/// a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    scope: SubscriptionScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionScope {
    Typed(EventType),
    Global,
    Disabled,
}

impl Subscription {
    /// A handle that was never attached (bus disabled); unsubscribing it is
    /// a no-op
    pub fn disabled() -> Self {
        Self {
            id: 0,
            scope: SubscriptionScope::Disabled,
        }
    }

    /// Whether this handle refers to a live registration
    pub fn is_active(&self) -> bool {
        !matches!(self.scope, SubscriptionScope::Disabled)
    }
}

struct Registration {
    id: u64,
    handler: Arc<dyn EventHandler>,
}

/// In-process publish/subscribe bus for domain events
pub struct EventBus {
    typed: RwLock<HashMap<EventType, Vec<Registration>>>,
    global: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            typed: RwLock::new(HashMap::new()),
            global: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a handler to one event type
    pub async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.typed
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(Registration { id, handler });
        Subscription {
            id,
            scope: SubscriptionScope::Typed(event_type),
        }
    }

    /// Subscribe a handler to every event type
    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.global.write().await.push(Registration { id, handler });
        Subscription {
            id,
            scope: SubscriptionScope::Global,
        }
    }

    /// Detach a previously registered handler; idempotent
    pub async fn unsubscribe(&self, subscription: &Subscription) {
        match subscription.scope {
            SubscriptionScope::Typed(event_type) => {
                if let Some(registrations) = self.typed.write().await.get_mut(&event_type) {
                    registrations.retain(|r| r.id != subscription.id);
                }
            }
            SubscriptionScope::Global => {
                self.global
                    .write()
                    .await
                    .retain(|r| r.id != subscription.id);
            }
            SubscriptionScope::Disabled => {}
        }
    }

    /// Remove every handler registered for one event type
    pub async fn unsubscribe_type(&self, event_type: EventType) {
        self.typed.write().await.remove(&event_type);
    }

    /// Publish an event to typed subscribers, then global subscribers
    ///
    /// Dispatch is sequential in subscription order. A failing handler is
    /// logged and publication continues with its siblings.
    pub async fn publish(&self, event: &DomainEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let typed = self.typed.read().await;
            let global = self.global.read().await;
            typed
                .get(&event.event_type)
                .into_iter()
                .flatten()
                .chain(global.iter())
                .map(|r| Arc::clone(&r.handler))
                .collect()
        };

        for handler in handlers {
            if let Err(error) = handler.handle(event).await {
                tracing::warn!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    %error,
                    "Event handler failed"
                );
            }
        }
    }

    /// Number of handlers that would see the given event type
    pub async fn handler_count(&self, event_type: EventType) -> usize {
        let typed = self.typed.read().await;
        let global = self.global.read().await;
        typed.get(&event_type).map(|v| v.len()).unwrap_or(0) + global.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::EventRecorder;
    use serde_json::json;

    fn event(event_type: EventType) -> DomainEvent {
        DomainEvent::new(event_type, json!({}))
    }

    #[tokio::test]
    async fn test_typed_subscription_receives_matching_events() {
        let bus = EventBus::new();
        let recorder = Arc::new(EventRecorder::new());
        bus.subscribe(EventType::AssetMerged, recorder.clone())
            .await;

        bus.publish(&event(EventType::AssetMerged)).await;
        bus.publish(&event(EventType::SyncCycleStarted)).await;

        assert_eq!(recorder.count(), 1);
        assert_eq!(recorder.events()[0].event_type, EventType::AssetMerged);
    }

    #[tokio::test]
    async fn test_global_subscription_receives_everything() {
        let bus = EventBus::new();
        let recorder = Arc::new(EventRecorder::new());
        bus.subscribe_all(recorder.clone()).await;

        bus.publish(&event(EventType::AssetMerged)).await;
        bus.publish(&event(EventType::SyncCycleStarted)).await;

        assert_eq!(recorder.count(), 2);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_interrupt_siblings() {
        let bus = EventBus::new();
        let failing = handler_fn(|_| Err(BusError::handler_failed("boom")));
        let recorder = Arc::new(EventRecorder::new());

        bus.subscribe(EventType::AssetMerged, failing).await;
        bus.subscribe(EventType::AssetMerged, recorder.clone())
            .await;

        bus.publish(&event(EventType::AssetMerged)).await;
        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let recorder = Arc::new(EventRecorder::new());
        let subscription = bus
            .subscribe(EventType::AssetMerged, recorder.clone())
            .await;

        bus.unsubscribe(&subscription).await;
        bus.unsubscribe(&subscription).await;

        bus.publish(&event(EventType::AssetMerged)).await;
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_type_clears_typed_handlers_only() {
        let bus = EventBus::new();
        let typed = Arc::new(EventRecorder::new());
        let global = Arc::new(EventRecorder::new());
        bus.subscribe(EventType::AssetMerged, typed.clone()).await;
        bus.subscribe_all(global.clone()).await;

        bus.unsubscribe_type(EventType::AssetMerged).await;
        bus.publish(&event(EventType::AssetMerged)).await;

        assert_eq!(typed.count(), 0);
        assert_eq!(global.count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_order_typed_before_global() {
        let bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_typed = order.clone();
        bus.subscribe(
            EventType::AssetMerged,
            handler_fn(move |_| {
                order_typed.lock().unwrap().push("typed");
                Ok(())
            }),
        )
        .await;

        let order_global = order.clone();
        bus.subscribe_all(handler_fn(move |_| {
            order_global.lock().unwrap().push("global");
            Ok(())
        }))
        .await;

        bus.publish(&event(EventType::AssetMerged)).await;
        assert_eq!(*order.lock().unwrap(), vec!["typed", "global"]);
    }

    #[tokio::test]
    async fn test_disabled_subscription_is_inert() {
        let bus = EventBus::new();
        let handle = Subscription::disabled();
        assert!(!handle.is_active());
        bus.unsubscribe(&handle).await;
    }

    #[tokio::test]
    async fn test_handler_count() {
        let bus = EventBus::new();
        assert_eq!(bus.handler_count(EventType::AssetMerged).await, 0);

        bus.subscribe(EventType::AssetMerged, Arc::new(EventRecorder::new()))
            .await;
        bus.subscribe_all(Arc::new(EventRecorder::new())).await;

        assert_eq!(bus.handler_count(EventType::AssetMerged).await, 2);
        assert_eq!(bus.handler_count(EventType::SyncCycleStarted).await, 1);
    }
}
