//! # Clusterbus Bgtask
//!
//! Runs long-lived unit-of-work closures as tracked background tasks:
//! a Redis-backed progress record with a 24-hour TTL, a broadcast
//! event on every progress update, and exactly one broadcast terminal
//! event (`Done`/`Cancelled`/`Failed`/`PartialSuccess`) per task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use clusterbus_common::{Error, Result};
use clusterbus_dispatcher::EventProducer;
use clusterbus_events::{
    BgtaskAlreadyDoneEvent, BgtaskCancelledEvent, BgtaskDoneEvent, BgtaskFailedEvent,
    BgtaskPartialSuccessEvent, BgtaskUpdatedEvent, TaskStatus,
};
use clusterbus_streamstore::RedisStreamStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// How long a finished task's progress record survives in Redis before
/// `fetch_last_finished_event` can no longer see it.
pub const MAX_BGTASK_ARCHIVE_PERIOD_SECS: i64 = 86_400;

fn tracker_key(task_id: Uuid) -> String {
    format!("bgtask.{task_id}")
}

#[derive(Debug, Clone)]
struct BgTaskInfo {
    status: TaskStatus,
    msg: String,
    started_at: String,
    last_update: String,
    current: String,
    total: String,
}

impl BgTaskInfo {
    fn started(msg: &str) -> Self {
        let now = now_secs();
        Self {
            status: TaskStatus::Started,
            msg: msg.to_owned(),
            started_at: now.clone(),
            last_update: now,
            current: "0".to_owned(),
            total: "0".to_owned(),
        }
    }

    fn finished(status: TaskStatus, msg: &str) -> Self {
        Self {
            status,
            msg: msg.to_owned(),
            started_at: "0".to_owned(),
            last_update: now_secs(),
            current: "0".to_owned(),
            total: "0".to_owned(),
        }
    }

    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status", self.status.as_str().to_owned()),
            ("msg", self.msg.clone()),
            ("started_at", self.started_at.clone()),
            ("last_update", self.last_update.clone()),
            ("current", self.current.clone()),
            ("total", self.total.clone()),
        ]
    }

    fn from_map(mut map: HashMap<String, String>) -> Result<Self> {
        let status = TaskStatus::from_str(map.get("status").map(String::as_str).unwrap_or(""))?;
        Ok(Self {
            status,
            msg: map.remove("msg").unwrap_or_default(),
            started_at: map.remove("started_at").unwrap_or_default(),
            last_update: map.remove("last_update").unwrap_or_default(),
            current: map.remove("current").unwrap_or_else(|| "0".to_owned()),
            total: map.remove("total").unwrap_or_else(|| "0".to_owned()),
        })
    }
}

fn now_secs() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64().to_string())
        .unwrap_or_else(|_| "0".to_owned())
}

/// Handed to a background task closure so it can publish progress
/// without knowing about Redis or the event producer directly.
pub struct ProgressReporter {
    store: RedisStreamStore,
    producer: EventProducer,
    task_id: Uuid,
    pub current_progress: f64,
    pub total_progress: f64,
}

impl ProgressReporter {
    fn new(store: RedisStreamStore, producer: EventProducer, task_id: Uuid) -> Self {
        Self {
            store,
            producer,
            task_id,
            current_progress: 0.0,
            total_progress: 0.0,
        }
    }

    /// Advances `current_progress` by `increment`, persists the new
    /// state with a refreshed TTL, and broadcasts `bgtask_updated`.
    pub async fn update(&mut self, increment: f64, message: Option<String>) -> Result<()> {
        self.current_progress += increment;
        let current = self.current_progress;
        let total = self.total_progress;

        self.store
            .kv_hset_with_ttl(
                &tracker_key(self.task_id),
                &[
                    ("current", current.to_string()),
                    ("total", total.to_string()),
                    ("msg", message.clone().unwrap_or_default()),
                    ("last_update", now_secs()),
                ],
                MAX_BGTASK_ARCHIVE_PERIOD_SECS,
            )
            .await?;

        self.producer
            .produce(&BgtaskUpdatedEvent {
                task_id: self.task_id,
                current_progress: current,
                total_progress: total,
                message,
            })
            .await?;
        Ok(())
    }
}

/// Outcome a background task closure reports back to the manager. Not
/// every closure fails by returning `Err` — `PartialSuccess` lets it
/// report a batch of per-item errors while still completing.
pub enum BgtaskResult {
    Done(Option<String>),
    PartialSuccess {
        message: Option<String>,
        errors: Vec<String>,
    },
}

impl BgtaskResult {
    pub fn done() -> Self {
        BgtaskResult::Done(None)
    }

    pub fn done_with_message(message: impl Into<String>) -> Self {
        BgtaskResult::Done(Some(message.into()))
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type BackgroundTask = Box<dyn FnOnce(ProgressReporter) -> BoxFuture<Result<BgtaskResult>> + Send>;

/// Observes task lifecycle for metrics export. `clusterbus-agentd`
/// wires this to its Prometheus registry; tests and simple callers can
/// use [`NopBgtaskObserver`].
pub trait BgtaskObserver: Send + Sync {
    fn observe_started(&self, task_name: &str);
    fn observe_done(&self, task_name: &str, status: TaskStatus, duration: std::time::Duration);
}

#[derive(Default)]
pub struct NopBgtaskObserver;

impl BgtaskObserver for NopBgtaskObserver {
    fn observe_started(&self, _task_name: &str) {}
    fn observe_done(&self, _task_name: &str, _status: TaskStatus, _duration: std::time::Duration) {}
}

struct OngoingTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Tracks and drives background tasks: starts them, persists their
/// progress, and guarantees exactly one terminal broadcast event per
/// task id.
pub struct BgtaskManager {
    store: RedisStreamStore,
    producer: EventProducer,
    observer: Arc<dyn BgtaskObserver>,
    ongoing: Arc<Mutex<Vec<OngoingTask>>>,
}

impl BgtaskManager {
    pub fn new(store: RedisStreamStore, producer: EventProducer) -> Self {
        Self::with_observer(store, producer, Arc::new(NopBgtaskObserver))
    }

    pub fn with_observer(
        store: RedisStreamStore,
        producer: EventProducer,
        observer: Arc<dyn BgtaskObserver>,
    ) -> Self {
        Self {
            store,
            producer,
            observer,
            ongoing: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Looks up the persisted record for `task_id` and, if the task
    /// has already reached a terminal status, returns a
    /// [`BgtaskAlreadyDoneEvent`] replaying it. Returns `Ok(None)` for
    /// a task that is still running. Returns
    /// [`Error::BgtaskNotFound`] if the record is missing or expired.
    pub async fn fetch_last_finished_event(&self, task_id: Uuid) -> Result<Option<BgtaskAlreadyDoneEvent>> {
        let mut store = self.store.clone();
        let map = store
            .kv_hgetall(&tracker_key(task_id))
            .await?
            .ok_or_else(|| Error::BgtaskNotFound(task_id.to_string()))?;
        let info = BgTaskInfo::from_map(map)?;
        if !info.status.is_terminal() {
            return Ok(None);
        }
        Ok(Some(BgtaskAlreadyDoneEvent {
            task_id,
            task_status: info.status,
            message: if info.msg.is_empty() { None } else { Some(info.msg) },
            current: info.current,
            total: info.total,
        }))
    }

    /// Starts `func` as a tracked background task and returns its id
    /// immediately; the task itself runs on its own tokio task.
    pub async fn start<F, Fut>(&self, task_name: impl Into<String>, func: F) -> Result<Uuid>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<BgtaskResult>> + Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let task_name = task_name.into();
        self.update_status(task_id, &BgTaskInfo::started("")).await?;

        let cancel = CancellationToken::new();
        let reporter = ProgressReporter::new(self.store.clone(), self.producer.clone(), task_id);
        let func: BackgroundTask = Box::new(move |reporter| Box::pin(func(reporter)));

        let handle = tokio::spawn(run_wrapper(
            self.store.clone(),
            self.producer.clone(),
            self.observer.clone(),
            task_id,
            task_name,
            cancel.clone(),
            reporter,
            func,
        ));

        let mut ongoing = self.ongoing.lock().await;
        ongoing.retain(|t| !t.handle.is_finished());
        ongoing.push(OngoingTask { handle, cancel });
        Ok(task_id)
    }

    async fn update_status(&self, task_id: Uuid, info: &BgTaskInfo) -> Result<()> {
        let mut store = self.store.clone();
        store
            .kv_hset_with_ttl(&tracker_key(task_id), &info.to_fields(), MAX_BGTASK_ARCHIVE_PERIOD_SECS)
            .await
    }

    /// Requests cancellation of every task still running and waits for
    /// them to wind down. Idempotent.
    pub async fn shutdown(&self) {
        info!("cancelling remaining background tasks");
        let mut ongoing = self.ongoing.lock().await;
        for task in ongoing.drain(..) {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_wrapper(
    store: RedisStreamStore,
    producer: EventProducer,
    observer: Arc<dyn BgtaskObserver>,
    task_id: Uuid,
    task_name: String,
    cancel: CancellationToken,
    reporter: ProgressReporter,
    func: BackgroundTask,
) {
    observer.observe_started(&task_name);
    let start = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = func(reporter) => Some(result),
    };

    let (status, msg_for_status) = match &outcome {
        None => (TaskStatus::Cancelled, String::new()),
        Some(Ok(BgtaskResult::Done(msg))) => (TaskStatus::Done, msg.clone().unwrap_or_default()),
        Some(Ok(BgtaskResult::PartialSuccess { message, .. })) => {
            (TaskStatus::Done, message.clone().unwrap_or_default())
        }
        Some(Err(e)) => (TaskStatus::Failed, e.to_string()),
    };
    observer.observe_done(&task_name, status, start.elapsed());

    let mut store_for_status = store.clone();
    if let Err(e) = store_for_status
        .kv_hset_with_ttl(
            &tracker_key(task_id),
            &BgTaskInfo::finished(status, &msg_for_status).to_fields(),
            MAX_BGTASK_ARCHIVE_PERIOD_SECS,
        )
        .await
    {
        warn!(%task_id, error = %e, "failed to persist terminal bgtask status");
    }

    let produce_result = match outcome {
        None => producer.produce(&BgtaskCancelledEvent { task_id, message: None }).await,
        Some(Ok(BgtaskResult::Done(message))) => {
            producer.produce(&BgtaskDoneEvent { task_id, message }).await
        }
        Some(Ok(BgtaskResult::PartialSuccess { message, errors })) => {
            producer
                .produce(&BgtaskPartialSuccessEvent { task_id, message, errors })
                .await
        }
        Some(Err(e)) => {
            producer
                .produce(&BgtaskFailedEvent { task_id, message: Some(e.to_string()) })
                .await
        }
    };
    if let Err(e) = produce_result {
        warn!(%task_id, error = %e, "failed to produce bgtask terminal event");
    }

    info!(%task_id, task = %task_name, status = status.as_str(), "background task finished");
}
