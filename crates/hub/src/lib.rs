//! # Clusterbus Hub
//!
//! Routes already-decoded events from the dispatcher's subscriber side
//! to whichever local propagator is interested, keyed by
//! `(EventDomain, domain_id)` alias — e.g. routing `bgtask_updated`
//! events for task `t-1` to the one SSE connection watching `t-1`.

pub mod propagators;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use clusterbus_events::{Event, EventDomain, UserEvent};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Object-safe view of an [`Event`] instance, used wherever the hub
/// and its propagators need to route or forward an event without
/// knowing its concrete type at compile time.
pub trait RoutedEvent: Debug + Send + Sync + 'static {
    fn event_domain(&self) -> EventDomain;
    fn domain_id(&self) -> Option<String>;
    fn user_event(&self) -> Option<UserEvent>;
    fn as_any(&self) -> &dyn Any;
}

impl<E: Event> RoutedEvent for E {
    fn event_domain(&self) -> EventDomain {
        E::event_domain()
    }

    fn domain_id(&self) -> Option<String> {
        Event::domain_id(self)
    }

    fn user_event(&self) -> Option<UserEvent> {
        Event::user_event(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A sink an [`EventHub`] can hand routed events to. `receive`-style
/// methods (replaying a cached/terminal event before going live) are
/// intentionally not part of this interface — each propagator kind in
/// [`propagators`] exposes its own, since the preamble differs per
/// kind.
#[async_trait]
pub trait EventPropagator: Send + Sync {
    fn id(&self) -> Uuid;
    async fn propagate_event(&self, event: Arc<dyn RoutedEvent>);
    async fn close(&self);
}

struct PropagatorInfo {
    propagator: Arc<dyn EventPropagator>,
    aliases: Vec<(EventDomain, String)>,
}

/// Registry mapping `(EventDomain, domain_id)` aliases to the set of
/// local propagators interested in that alias, plus the reverse
/// propagator-id -> aliases map needed to clean up on unregister.
#[derive(Default)]
pub struct EventHub {
    propagators: RwLock<HashMap<Uuid, PropagatorInfo>>,
    key_alias: RwLock<HashMap<(EventDomain, String), HashSet<Uuid>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `propagator` under every `(domain, id)` pair in
    /// `aliases`. A propagator with no aliases is registered but will
    /// never receive anything from [`EventHub::propagate`].
    pub async fn register_event_propagator(
        &self,
        propagator: Arc<dyn EventPropagator>,
        aliases: Vec<(EventDomain, String)>,
    ) {
        let propagator_id = propagator.id();
        {
            let mut key_alias = self.key_alias.write().await;
            for alias in &aliases {
                key_alias.entry(alias.clone()).or_default().insert(propagator_id);
            }
        }
        let mut propagators = self.propagators.write().await;
        propagators.insert(propagator_id, PropagatorInfo { propagator, aliases });
    }

    /// Removes a propagator and every alias entry pointing at it.
    /// Returns `Err` if `propagator_id` was never registered.
    pub async fn unregister_event_propagator(&self, propagator_id: Uuid) -> Result<(), clusterbus_common::Error> {
        let mut propagators = self.propagators.write().await;
        let info = propagators
            .remove(&propagator_id)
            .ok_or_else(|| clusterbus_common::Error::Internal(anyhow::anyhow!("propagator {propagator_id} not registered")))?;

        let mut key_alias = self.key_alias.write().await;
        for alias in &info.aliases {
            if let Some(set) = key_alias.get_mut(alias) {
                set.remove(&propagator_id);
                if set.is_empty() {
                    key_alias.remove(alias);
                }
            }
        }
        Ok(())
    }

    /// Hands `event` to every propagator aliased to
    /// `(event.event_domain(), event.domain_id())`. Events with no
    /// domain id are process-scoped triggers and are never routed
    /// here.
    pub async fn propagate(&self, event: Arc<dyn RoutedEvent>) {
        let Some(domain_id) = event.domain_id() else {
            return;
        };
        let alias = (event.event_domain(), domain_id);
        let ids = {
            let key_alias = self.key_alias.read().await;
            match key_alias.get(&alias) {
                Some(set) => set.clone(),
                None => return,
            }
        };
        let propagators = self.propagators.read().await;
        for id in ids {
            if let Some(info) = propagators.get(&id) {
                info.propagator.propagate_event(event.clone()).await;
            }
        }
    }

    /// Closes every propagator registered under `(alias_domain, alias_id)`.
    pub async fn close_by_alias(&self, alias_domain: EventDomain, alias_id: &str) {
        let alias = (alias_domain, alias_id.to_owned());
        let ids = {
            let key_alias = self.key_alias.read().await;
            match key_alias.get(&alias) {
                Some(set) => set.clone(),
                None => {
                    debug!(domain = %alias_domain, alias_id, "no propagator registered for alias");
                    return;
                }
            }
        };
        let propagators = self.propagators.read().await;
        for id in ids {
            if let Some(info) = propagators.get(&id) {
                info.propagator.close().await;
            }
        }
    }

    /// Closes every registered propagator, regardless of alias.
    pub async fn shutdown(&self) {
        let propagators = self.propagators.read().await;
        for info in propagators.values() {
            info.propagator.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterbus_events::DeliveryPattern;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Debug)]
    struct TestEvent {
        domain_id: Option<String>,
    }

    impl Event for TestEvent {
        fn event_name() -> &'static str {
            "test_event"
        }
        fn event_domain() -> EventDomain {
            EventDomain::Session
        }
        fn delivery_pattern() -> DeliveryPattern {
            DeliveryPattern::Broadcast
        }
        fn domain_id(&self) -> Option<String> {
            self.domain_id.clone()
        }
        fn serialize(&self) -> Result<clusterbus_events::EventArgs, clusterbus_common::Error> {
            Ok(clusterbus_events::EventArgs::new())
        }
        fn deserialize(_args: &clusterbus_events::EventArgs) -> Result<Self, clusterbus_common::Error> {
            Ok(Self { domain_id: None })
        }
    }

    struct RecordingPropagator {
        id: Uuid,
        received: Mutex<Vec<String>>,
        closed: AtomicUsize,
    }

    impl RecordingPropagator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                received: Mutex::new(Vec::new()),
                closed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EventPropagator for RecordingPropagator {
        fn id(&self) -> Uuid {
            self.id
        }

        async fn propagate_event(&self, event: Arc<dyn RoutedEvent>) {
            self.received.lock().await.push(format!("{event:?}"));
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn routes_events_only_to_the_matching_alias() {
        let hub = EventHub::new();
        let propagator = RecordingPropagator::new();
        hub.register_event_propagator(
            propagator.clone(),
            vec![(EventDomain::Session, "session-1".to_owned())],
        )
        .await;

        hub.propagate(Arc::new(TestEvent { domain_id: Some("session-1".to_owned()) })).await;
        hub.propagate(Arc::new(TestEvent { domain_id: Some("session-2".to_owned()) })).await;

        assert_eq!(propagator.received.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn events_without_a_domain_id_are_never_routed() {
        let hub = EventHub::new();
        let propagator = RecordingPropagator::new();
        hub.register_event_propagator(
            propagator.clone(),
            vec![(EventDomain::Session, "session-1".to_owned())],
        )
        .await;

        hub.propagate(Arc::new(TestEvent { domain_id: None })).await;
        assert!(propagator.received.lock().await.is_empty());
    }

    #[tokio::test]
    async fn close_by_alias_closes_every_propagator_under_it() {
        let hub = EventHub::new();
        let propagator = RecordingPropagator::new();
        hub.register_event_propagator(
            propagator.clone(),
            vec![(EventDomain::Session, "session-1".to_owned())],
        )
        .await;

        hub.close_by_alias(EventDomain::Session, "session-1").await;
        assert_eq!(propagator.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_removes_the_alias_mapping() {
        let hub = EventHub::new();
        let propagator = RecordingPropagator::new();
        hub.register_event_propagator(
            propagator.clone(),
            vec![(EventDomain::Session, "session-1".to_owned())],
        )
        .await;

        hub.unregister_event_propagator(propagator.id()).await.unwrap();
        hub.propagate(Arc::new(TestEvent { domain_id: Some("session-1".to_owned()) })).await;
        assert!(propagator.received.lock().await.is_empty());
    }
}
