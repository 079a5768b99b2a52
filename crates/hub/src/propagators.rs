//! The three propagator kinds. Each wraps the same queue-plus-closed-flag
//! core; what differs is the preamble run before the first live `recv`:
//! [`BypassPropagator`] has none, [`WithCachePropagator`] replays a
//! cached event and then keeps going, [`BgtaskPropagator`] replays the
//! last terminal event and stops there if it finds one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{EventPropagator, RoutedEvent};

struct PropagatorQueue {
    id: Uuid,
    tx: mpsc::UnboundedSender<Arc<dyn RoutedEvent>>,
    rx: Mutex<mpsc::UnboundedReceiver<Arc<dyn RoutedEvent>>>,
    closed: AtomicBool,
    closed_notify: Notify,
}

impl PropagatorQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4(),
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
        }
    }

    /// Waits for the next event, or `None` as soon as `close` is
    /// called, whichever happens first.
    async fn recv(&self) -> Option<Arc<dyn RoutedEvent>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed_notify.notified() => None,
            event = async { self.rx.lock().await.recv().await } => event,
        }
    }

    fn push(&self, event: Arc<dyn RoutedEvent>) {
        let _ = self.tx.send(event);
    }

    fn mark_closed(&self) -> bool {
        let was_open = !self.closed.swap(true, Ordering::AcqRel);
        self.closed_notify.notify_one();
        was_open
    }
}

/// Fetches the cached replay event for a [`WithCachePropagator`]'s
/// cache id, if one has been stored.
#[async_trait]
pub trait EventFetcher: Send + Sync {
    async fn fetch_cached_event(&self, cache_id: &str) -> Option<Arc<dyn RoutedEvent>>;
}

/// Fetches the last terminal event for a background task, used by
/// [`BgtaskPropagator`] to replay a task that finished before the
/// subscriber connected.
#[async_trait]
pub trait BgtaskLastDoneEventFetcher: Send + Sync {
    async fn fetch_last_finished_event(&self, task_id: Uuid) -> Option<Arc<dyn RoutedEvent>>;
}

/// Plain queue-backed propagator with no replay preamble.
pub struct BypassPropagator {
    queue: PropagatorQueue,
}

impl BypassPropagator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { queue: PropagatorQueue::new() })
    }

    /// Waits for the next propagated event. Returns `None` once closed
    /// and drained.
    pub async fn recv(&self) -> Option<Arc<dyn RoutedEvent>> {
        self.queue.recv().await
    }
}

#[async_trait]
impl EventPropagator for BypassPropagator {
    fn id(&self) -> Uuid {
        self.queue.id
    }

    async fn propagate_event(&self, event: Arc<dyn RoutedEvent>) {
        self.queue.push(event);
    }

    async fn close(&self) {
        self.queue.mark_closed();
    }
}

/// Replays the cached event for `cache_id` before forwarding whatever
/// arrives live afterward.
pub struct WithCachePropagator<F: EventFetcher> {
    queue: PropagatorQueue,
    fetcher: F,
    cache_id: String,
    cache_checked: AtomicBool,
}

impl<F: EventFetcher> WithCachePropagator<F> {
    pub fn new(fetcher: F, cache_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            queue: PropagatorQueue::new(),
            fetcher,
            cache_id: cache_id.into(),
            cache_checked: AtomicBool::new(false),
        })
    }

    /// First call replays the cached event (if any); every call after
    /// that, and every call when there was no cached event, waits on
    /// the live queue.
    pub async fn recv(&self) -> Option<Arc<dyn RoutedEvent>> {
        if !self.cache_checked.swap(true, Ordering::AcqRel) {
            if let Some(cached) = self.fetcher.fetch_cached_event(&self.cache_id).await {
                return Some(cached);
            }
        }
        self.queue.recv().await
    }
}

#[async_trait]
impl<F: EventFetcher> EventPropagator for WithCachePropagator<F> {
    fn id(&self) -> Uuid {
        self.queue.id
    }

    async fn propagate_event(&self, event: Arc<dyn RoutedEvent>) {
        self.queue.push(event);
    }

    async fn close(&self) {
        self.queue.mark_closed();
    }
}

/// Replays the last terminal event for `task_id`, if the task already
/// finished, and stops there — a finished task emits no further
/// events. Otherwise forwards whatever arrives live.
pub struct BgtaskPropagator<F: BgtaskLastDoneEventFetcher> {
    queue: PropagatorQueue,
    fetcher: F,
    task_id: Uuid,
    checked: AtomicBool,
    already_terminal: AtomicBool,
}

impl<F: BgtaskLastDoneEventFetcher> BgtaskPropagator<F> {
    pub fn new(fetcher: F, task_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            queue: PropagatorQueue::new(),
            fetcher,
            task_id,
            checked: AtomicBool::new(false),
            already_terminal: AtomicBool::new(false),
        })
    }

    pub async fn recv(&self) -> Option<Arc<dyn RoutedEvent>> {
        if !self.checked.swap(true, Ordering::AcqRel) {
            if let Some(last_event) = self.fetcher.fetch_last_finished_event(self.task_id).await {
                self.already_terminal.store(true, Ordering::Release);
                return Some(last_event);
            }
        }
        if self.already_terminal.load(Ordering::Acquire) {
            return None;
        }
        self.queue.recv().await
    }
}

#[async_trait]
impl<F: BgtaskLastDoneEventFetcher> EventPropagator for BgtaskPropagator<F> {
    fn id(&self) -> Uuid {
        self.queue.id
    }

    async fn propagate_event(&self, event: Arc<dyn RoutedEvent>) {
        self.queue.push(event);
    }

    async fn close(&self) {
        self.queue.mark_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterbus_events::{DeliveryPattern, Event, EventArgs, EventDomain};

    #[derive(Debug)]
    struct StubEvent;

    impl Event for StubEvent {
        fn event_name() -> &'static str {
            "stub"
        }
        fn event_domain() -> EventDomain {
            EventDomain::Session
        }
        fn delivery_pattern() -> DeliveryPattern {
            DeliveryPattern::Broadcast
        }
        fn domain_id(&self) -> Option<String> {
            None
        }
        fn serialize(&self) -> Result<EventArgs, clusterbus_common::Error> {
            Ok(EventArgs::new())
        }
        fn deserialize(_args: &EventArgs) -> Result<Self, clusterbus_common::Error> {
            Ok(StubEvent)
        }
    }

    struct NeverCached;

    #[async_trait]
    impl EventFetcher for NeverCached {
        async fn fetch_cached_event(&self, _cache_id: &str) -> Option<Arc<dyn RoutedEvent>> {
            None
        }
    }

    struct AlwaysCached;

    #[async_trait]
    impl EventFetcher for AlwaysCached {
        async fn fetch_cached_event(&self, _cache_id: &str) -> Option<Arc<dyn RoutedEvent>> {
            Some(Arc::new(StubEvent))
        }
    }

    struct AlwaysTerminal;

    #[async_trait]
    impl BgtaskLastDoneEventFetcher for AlwaysTerminal {
        async fn fetch_last_finished_event(&self, _task_id: Uuid) -> Option<Arc<dyn RoutedEvent>> {
            Some(Arc::new(StubEvent))
        }
    }

    struct NeverTerminal;

    #[async_trait]
    impl BgtaskLastDoneEventFetcher for NeverTerminal {
        async fn fetch_last_finished_event(&self, _task_id: Uuid) -> Option<Arc<dyn RoutedEvent>> {
            None
        }
    }

    #[tokio::test]
    async fn bypass_propagator_forwards_pushed_events() {
        let propagator = BypassPropagator::new();
        propagator.propagate_event(Arc::new(StubEvent)).await;
        assert!(propagator.recv().await.is_some());
    }

    #[tokio::test]
    async fn with_cache_propagator_falls_through_to_live_queue_when_nothing_cached() {
        let propagator = WithCachePropagator::new(NeverCached, "bgtask.t-1");
        propagator.propagate_event(Arc::new(StubEvent)).await;
        assert!(propagator.recv().await.is_some());
    }

    #[tokio::test]
    async fn with_cache_propagator_replays_cached_event_then_keeps_going() {
        let propagator = WithCachePropagator::new(AlwaysCached, "bgtask.t-1");
        propagator.propagate_event(Arc::new(StubEvent)).await;
        assert!(propagator.recv().await.is_some()); // cached
        assert!(propagator.recv().await.is_some()); // live, queued earlier
    }

    #[tokio::test]
    async fn bgtask_propagator_stops_after_replaying_a_terminal_event() {
        let task_id = Uuid::new_v4();
        let propagator = BgtaskPropagator::new(AlwaysTerminal, task_id);
        assert!(propagator.recv().await.is_some());
        assert!(propagator.recv().await.is_none());
    }

    #[tokio::test]
    async fn bgtask_propagator_falls_through_to_live_queue_when_still_running() {
        let task_id = Uuid::new_v4();
        let propagator = BgtaskPropagator::new(NeverTerminal, task_id);
        propagator.propagate_event(Arc::new(StubEvent)).await;
        assert!(propagator.recv().await.is_some());
    }
}
