/*!
 * Clusterbus node agent.
 *
 * Wires the StreamStore-backed Redis connection to the anycast/broadcast
 * message queue, the event dispatcher's two read loops, the background
 * task manager, and the local event hub that fans terminal/progress
 * bgtask events out to whichever propagator is watching that task.
 *
 * ## Architecture
 *
 * ```text
 * RedisQueue::split()
 *     ├──> RedisQueueHandle (send/ack, cloned into producer + dispatcher)
 *     ├──> consume_rx  ──> EventDispatcher::run_consumer_loop  (anycast)
 *     └──> subscribe_rx ──> EventDispatcher::run_subscriber_loop (broadcast)
 *                                 │
 *                                 └──> bgtask_events subscribers ──> EventHub
 * ```
 *
 * ## Configuration
 *
 * See `clusterbus_config::NodeConfig::from_env` for the full list of
 * environment variables.
 */

mod adapters;
mod health;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clusterbus_bgtask::BgtaskManager;
use clusterbus_config::NodeConfig;
use clusterbus_dispatcher::{EventDispatcher, EventProducer};
use clusterbus_events::{
    BgtaskCancelledEvent, BgtaskDoneEvent, BgtaskFailedEvent, BgtaskPartialSuccessEvent,
    BgtaskUpdatedEvent,
};
use clusterbus_hub::EventHub;
use clusterbus_mq::{RedisMqArgs, RedisQueue};
use clusterbus_streamstore::RedisStreamStore;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("failed to load node configuration")?;

    if std::env::var("ENVIRONMENT").as_deref() == Ok("production") {
        clusterbus_common::init_tracing_json();
    } else {
        clusterbus_common::init_tracing();
    }

    info!(
        redis_host = %config.redis_host,
        stream_key = %config.stream_key,
        consumer_group = %config.consumer_group,
        process_index = config.process_index,
        "starting clusterbus-agentd"
    );

    let store = RedisStreamStore::connect(&config.redis_url())
        .await
        .context("failed to connect StreamStore")?;

    let mut mq_args = RedisMqArgs::new(config.stream_key.clone(), config.consumer_group.clone());
    mq_args.node_id = config.node_id.clone();
    mq_args.autoclaim_idle_timeout_ms = config.autoclaim_idle_timeout_ms;

    let queue = RedisQueue::connect(&config.redis_url(), mq_args)
        .await
        .context("failed to connect message queue")?;
    let (handle, consume_rx, subscribe_rx) = queue.split();

    let producer = EventProducer::new(handle.clone());
    let dispatcher = EventDispatcher::with_observer(metrics::PrometheusEventObserver::arc());

    let hub = Arc::new(EventHub::new());
    register_bgtask_forwarding(&dispatcher, hub.clone()).await;

    let consumer_loop = {
        let dispatcher = dispatcher.clone();
        let handle = handle.clone();
        tokio::spawn(async move { dispatcher.run_consumer_loop(handle, consume_rx).await })
    };
    let subscriber_loop = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run_subscriber_loop(subscribe_rx).await })
    };

    let bgtask_manager = Arc::new(BgtaskManager::with_observer(
        store,
        producer,
        metrics::PrometheusBgtaskObserver::arc(),
    ));
    // Exercised by anything registering a `BgtaskPropagator` for a
    // watched task id; kept constructible here so the wiring compiles
    // without a caller yet, the way a library-shaped binary often has
    // unused-by-main but load-bearing-for-callers plumbing.
    let _bgtask_event_fetcher = adapters::BgtaskEventFetcher::new(bgtask_manager.clone());

    let service_state = health::ServiceState::new();
    let health_router = health::router(service_state.clone());
    let health_listener = tokio::net::TcpListener::bind(&config.health_bind_addr)
        .await
        .with_context(|| format!("failed to bind health server to {}", config.health_bind_addr))?;
    info!(addr = %config.health_bind_addr, "health server listening");
    let health_server = tokio::spawn(async move {
        let _ = axum::serve(health_listener, health_router).await;
    });

    service_state.mark_ready();
    info!("clusterbus-agentd ready");

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received, closing queue and draining bgtasks");

    handle.close();
    bgtask_manager.shutdown().await;
    hub.shutdown().await;
    consumer_loop.abort();
    subscriber_loop.abort();
    health_server.abort();

    info!("clusterbus-agentd stopped");
    Ok(())
}

/// Registers a broadcast subscriber per bgtask event type that
/// forwards into the local `EventHub` under the task's alias, so any
/// propagator registered for that task id sees progress/terminal
/// events as they're dispatched.
async fn register_bgtask_forwarding(dispatcher: &EventDispatcher, hub: Arc<EventHub>) {
    let h = hub.clone();
    dispatcher
        .register_subscriber::<BgtaskUpdatedEvent, _>(move |event| {
            let hub = h.clone();
            Box::pin(async move {
                hub.propagate(Arc::new(event)).await;
                Ok(())
            })
        })
        .await;

    let h = hub.clone();
    dispatcher
        .register_subscriber::<BgtaskDoneEvent, _>(move |event| {
            let hub = h.clone();
            Box::pin(async move {
                hub.propagate(Arc::new(event)).await;
                Ok(())
            })
        })
        .await;

    let h = hub.clone();
    dispatcher
        .register_subscriber::<BgtaskCancelledEvent, _>(move |event| {
            let hub = h.clone();
            Box::pin(async move {
                hub.propagate(Arc::new(event)).await;
                Ok(())
            })
        })
        .await;

    let h = hub.clone();
    dispatcher
        .register_subscriber::<BgtaskFailedEvent, _>(move |event| {
            let hub = h.clone();
            Box::pin(async move {
                hub.propagate(Arc::new(event)).await;
                Ok(())
            })
        })
        .await;

    dispatcher
        .register_subscriber::<BgtaskPartialSuccessEvent, _>(move |event| {
            let hub = hub.clone();
            Box::pin(async move {
                hub.propagate(Arc::new(event)).await;
                Ok(())
            })
        })
        .await;
}
