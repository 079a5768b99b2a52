//! Event-name keyed handler registries, with snapshot-copy-before-iterate
//! dispatch: a handler registered mid-dispatch never sees the message
//! already in flight, and dispatch never holds the registry lock while
//! handlers run.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use clusterbus_common::Result;
use clusterbus_events::{Event, EventArgs};
use clusterbus_mq::{MQMessage, RedisQueueHandle};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, warn};

/// Observes dispatch outcomes, one call per handler invocation.
/// Mirrors the `EventObserver`/`NopEventObserver` pair the Python
/// event dispatcher injects into `_handle` so a metrics backend can be
/// plugged in without the registry knowing about `prometheus` at all.
pub trait EventObserver: Send + Sync {
    fn observe_event_success(&self, event_name: &str, duration: Duration);
    fn observe_event_failure(&self, event_name: &str, duration: Duration);
}

/// No-op observer used when the binary wiring this crate doesn't care
/// about dispatch metrics.
#[derive(Debug, Default)]
pub struct NopEventObserver;

impl EventObserver for NopEventObserver {
    fn observe_event_success(&self, _event_name: &str, _duration: Duration) {}
    fn observe_event_failure(&self, _event_name: &str, _duration: Duration) {}
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type RawHandler = Arc<dyn Fn(EventArgs) -> BoxFuture + Send + Sync>;

/// Opaque handle returned by registration, usable to later remove that
/// one handler without disturbing the others registered for the same
/// event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

struct Entry {
    token: HandlerToken,
    handler: RawHandler,
}

#[derive(Default)]
struct Registries {
    consumers: HashMap<&'static str, Vec<Entry>>,
    subscribers: HashMap<&'static str, Vec<Entry>>,
}

enum RegistrySide {
    Consumer,
    Subscriber,
}

/// Routes decoded wire events by name to every handler registered for
/// that name. One dispatcher instance drives both the anycast
/// (consumer-group) read loop and the broadcast read loop, each
/// against its own registry.
#[derive(Clone)]
pub struct EventDispatcher {
    registries: Arc<RwLock<Registries>>,
    next_token: Arc<AtomicU64>,
    observer: Arc<dyn EventObserver>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::with_observer(Arc::new(NopEventObserver))
    }

    pub fn with_observer(observer: Arc<dyn EventObserver>) -> Self {
        Self {
            registries: Arc::new(RwLock::new(Registries::default())),
            next_token: Arc::new(AtomicU64::new(1)),
            observer,
        }
    }

    /// Registers a handler for the anycast (consumer-group) side of
    /// `E`. Only one process in the group will actually receive any
    /// given message, but any number of handlers can be registered
    /// for it within this process.
    pub async fn register_consumer<E, F>(&self, handler: F) -> HandlerToken
    where
        E: Event,
        F: Fn(E) -> BoxFuture + Send + Sync + 'static,
    {
        self.register::<E, F>(handler, RegistrySide::Consumer).await
    }

    /// Registers a handler for the broadcast side of `E`: every
    /// process with a registration observes every message.
    pub async fn register_subscriber<E, F>(&self, handler: F) -> HandlerToken
    where
        E: Event,
        F: Fn(E) -> BoxFuture + Send + Sync + 'static,
    {
        self.register::<E, F>(handler, RegistrySide::Subscriber).await
    }

    async fn register<E, F>(&self, handler: F, side: RegistrySide) -> HandlerToken
    where
        E: Event,
        F: Fn(E) -> BoxFuture + Send + Sync + 'static,
    {
        let token = HandlerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let decode_and_call: RawHandler = Arc::new(move |args: EventArgs| match E::deserialize(&args) {
            Ok(event) => handler(event),
            Err(e) => Box::pin(async move { Err(e) }) as BoxFuture,
        });

        let mut registries = self.registries.write().await;
        let table = match side {
            RegistrySide::Consumer => &mut registries.consumers,
            RegistrySide::Subscriber => &mut registries.subscribers,
        };
        table.entry(E::event_name()).or_default().push(Entry {
            token,
            handler: decode_and_call,
        });
        token
    }

    /// Removes a previously registered handler for `E`, if it's still
    /// present in either registry.
    pub async fn unregister<E: Event>(&self, token: HandlerToken) {
        let mut registries = self.registries.write().await;
        if let Some(entries) = registries.consumers.get_mut(E::event_name()) {
            entries.retain(|e| e.token != token);
        }
        if let Some(entries) = registries.subscribers.get_mut(E::event_name()) {
            entries.retain(|e| e.token != token);
        }
    }

    /// Drives the anycast read loop until the channel closes. Each
    /// message is decoded once, handed to a snapshot of the consumer
    /// handlers registered for its name, and acked only after every
    /// handler invocation has returned.
    pub async fn run_consumer_loop(&self, handle: RedisQueueHandle, mut rx: mpsc::UnboundedReceiver<MQMessage>) {
        while let Some(msg) = rx.recv().await {
            let Some((name, args)) = decode_message(&msg) else {
                warn!(msg_id = %msg.msg_id, "dropping anycast message with no decodable name/args");
                let _ = handle.ack(&msg.msg_id).await;
                continue;
            };
            let snapshot = self.snapshot(&name, RegistrySide::Consumer).await;
            run_handlers(&name, args, snapshot, &*self.observer).await;
            if let Err(e) = handle.ack(&msg.msg_id).await {
                error!(msg_id = %msg.msg_id, error = %e, "failed to ack processed message");
            }
        }
    }

    /// Drives the broadcast read loop until the channel closes. No
    /// acking occurs on this side — every subscriber reads every
    /// message off the stream independently.
    pub async fn run_subscriber_loop(&self, mut rx: mpsc::UnboundedReceiver<MQMessage>) {
        while let Some(msg) = rx.recv().await {
            let Some((name, args)) = decode_message(&msg) else {
                warn!(msg_id = %msg.msg_id, "dropping broadcast message with no decodable name/args");
                continue;
            };
            let snapshot = self.snapshot(&name, RegistrySide::Subscriber).await;
            run_handlers(&name, args, snapshot, &*self.observer).await;
        }
    }

    async fn snapshot(&self, name: &str, side: RegistrySide) -> Vec<RawHandler> {
        let registries = self.registries.read().await;
        let table = match side {
            RegistrySide::Consumer => &registries.consumers,
            RegistrySide::Subscriber => &registries.subscribers,
        };
        table
            .get(name)
            .map(|entries| entries.iter().map(|e| e.handler.clone()).collect())
            .unwrap_or_default()
    }
}

fn decode_message(msg: &MQMessage) -> Option<(String, EventArgs)> {
    let name = std::str::from_utf8(msg.payload.get("name")?).ok()?.to_owned();
    let args = EventArgs::decode(msg.payload.get("args")?).ok()?;
    Some((name, args))
}

async fn run_handlers(name: &str, args: EventArgs, handlers: Vec<RawHandler>, observer: &dyn EventObserver) {
    if handlers.is_empty() {
        return;
    }
    debug!(event = name, handler_count = handlers.len(), "dispatching event");
    let mut join_set = tokio::task::JoinSet::new();
    for handler in handlers {
        let args = args.clone();
        join_set.spawn(async move {
            let start = Instant::now();
            let result = handler(args).await;
            (result, start.elapsed())
        });
    }
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((Err(e), duration)) => {
                observer.observe_event_failure(name, duration);
                warn!(event = name, error = %e, "event handler returned an error");
            }
            Err(join_err) => warn!(event = name, error = %join_err, "event handler panicked"),
            Ok((Ok(()), duration)) => observer.observe_event_success(name, duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterbus_common::Error;
    use clusterbus_events::{DeliveryPattern, EventDomain};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct PingEvent;

    impl Event for PingEvent {
        fn event_name() -> &'static str {
            "ping"
        }
        fn event_domain() -> EventDomain {
            EventDomain::Log
        }
        fn delivery_pattern() -> DeliveryPattern {
            DeliveryPattern::Anycast
        }
        fn domain_id(&self) -> Option<String> {
            None
        }
        fn serialize(&self) -> std::result::Result<EventArgs, Error> {
            Ok(EventArgs::new())
        }
        fn deserialize(_args: &EventArgs) -> std::result::Result<Self, Error> {
            Ok(PingEvent)
        }
    }

    #[tokio::test]
    async fn snapshot_includes_handlers_registered_before_dispatch() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_handler = calls.clone();
        dispatcher
            .register_consumer::<PingEvent, _>(move |_event| {
                let calls = calls_for_handler.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .await;

        let snapshot = dispatcher.snapshot("ping", RegistrySide::Consumer).await;
        assert_eq!(snapshot.len(), 1);
        run_handlers("ping", EventArgs::new(), snapshot, &NopEventObserver).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_removes_only_the_matching_token() {
        let dispatcher = EventDispatcher::new();
        let token_a = dispatcher.register_consumer::<PingEvent, _>(|_| Box::pin(async { Ok(()) })).await;
        let _token_b = dispatcher.register_consumer::<PingEvent, _>(|_| Box::pin(async { Ok(()) })).await;

        dispatcher.unregister::<PingEvent>(token_a).await;
        let snapshot = dispatcher.snapshot("ping", RegistrySide::Consumer).await;
        assert_eq!(snapshot.len(), 1);
    }
}
