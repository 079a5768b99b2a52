//! Collapses bursts of events into fewer handler invocations.
//!
//! Progress-style events (e.g. `bgtask_updated`) arrive far more often
//! than any UI needs to render them. `coalesce` wraps a handler so
//! that `batch_size` consecutive calls collapse into a single
//! invocation carrying only the most recent event, with a `window`
//! safety-net flush so a trailing partial batch is never stranded. For
//! `K` calls into the wrapped closure, the inner handler runs
//! `ceil(K / batch_size)` times.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use clusterbus_common::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct Batch<E> {
    latest: Option<E>,
    pending: usize,
    gate: Option<JoinHandle<()>>,
}

/// Returns a closure with the same shape as a raw handler
/// (`Fn(E) -> BoxFuture`), suitable for passing straight into
/// `EventDispatcher::register_consumer`/`register_subscriber`.
pub fn coalesce<E, F>(batch_size: usize, window: Duration, handler: F) -> impl Fn(E) -> BoxFuture + Clone
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> BoxFuture + Send + Sync + 'static,
{
    assert!(batch_size >= 1, "coalescing batch size must be at least 1");
    let handler = Arc::new(handler);
    let batch = Arc::new(Mutex::new(Batch {
        latest: None,
        pending: 0,
        gate: None,
    }));

    move |event: E| {
        let handler = handler.clone();
        let batch = batch.clone();
        Box::pin(async move {
            let flush_now = {
                let mut state = batch.lock().await;
                state.latest = Some(event);
                state.pending += 1;
                if state.pending >= batch_size {
                    if let Some(gate) = state.gate.take() {
                        gate.abort();
                    }
                    true
                } else {
                    if let Some(gate) = state.gate.take() {
                        gate.abort();
                    }
                    let batch = batch.clone();
                    let handler = handler.clone();
                    state.gate = Some(tokio::spawn(async move {
                        tokio::time::sleep(window).await;
                        flush(&batch, &handler).await;
                    }));
                    false
                }
            };
            if flush_now {
                flush(&batch, &handler).await;
            }
            Ok(())
        }) as BoxFuture
    }
}

async fn flush<E, F>(batch: &Arc<Mutex<Batch<E>>>, handler: &Arc<F>)
where
    E: Clone + Send + Sync + 'static,
    F: Fn(E) -> BoxFuture + Send + Sync + 'static,
{
    let event = {
        let mut state = batch.lock().await;
        state.pending = 0;
        state.gate = None;
        state.latest.take()
    };
    if let Some(event) = event {
        if let Err(e) = handler(event).await {
            warn!(error = %e, "coalesced handler invocation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn collapses_a_full_batch_immediately() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let last_seen = Arc::new(Mutex::new(0));
        let inv = invocations.clone();
        let seen = last_seen.clone();
        let wrapped = coalesce(3, Duration::from_secs(30), move |value: i32| {
            let inv = inv.clone();
            let seen = seen.clone();
            Box::pin(async move {
                inv.fetch_add(1, Ordering::SeqCst);
                *seen.lock().await = value;
                Ok(())
            }) as BoxFuture
        });

        wrapped(1).await.unwrap();
        wrapped(2).await.unwrap();
        wrapped(3).await.unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(*last_seen.lock().await, 3);
    }

    #[tokio::test]
    async fn flushes_a_trailing_partial_batch_after_the_window() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let inv = invocations.clone();
        let wrapped = coalesce(10, Duration::from_millis(20), move |_value: i32| {
            let inv = inv.clone();
            Box::pin(async move {
                inv.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as BoxFuture
        });

        wrapped(1).await.unwrap();
        wrapped(2).await.unwrap();
        assert_eq!(invocations.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sub_threshold_events_reset_the_window_off_the_latest_one() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let inv = invocations.clone();
        let wrapped = coalesce(10, Duration::from_millis(50), move |_value: i32| {
            let inv = inv.clone();
            Box::pin(async move {
                inv.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }) as BoxFuture
        });

        // Three events spaced well under the window: a timer that
        // fired off the first event's deadline would flush mid-stream;
        // one that resets per-event won't flush until 50ms after #3.
        wrapped(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        wrapped(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        wrapped(3).await.unwrap();
        assert_eq!(invocations.load(Ordering::SeqCst), 0, "60ms since #1 but only 30ms since #3");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
