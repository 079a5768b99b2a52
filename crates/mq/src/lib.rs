//! # Clusterbus MQ
//!
//! Two logical queues layered over a single `StreamStore` stream: an
//! anycast queue (consumer-group load-balanced) and a broadcast queue
//! (every subscriber reads every message from `$`). Owns the three
//! concurrent reader tasks the spec calls for — reader loop, autoclaim
//! loop, broadcast reader loop — and the retry-by-republish policy for
//! reclaimed pending entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clusterbus_common::consumer_id::generate_consumer_id;
use clusterbus_common::retry::{LogThrottle, MAX_RETRIES, RECONNECT_POLL_INTERVAL};
use clusterbus_common::{Error, Result};
use clusterbus_streamstore::{DEFAULT_STREAM_MAXLEN, RedisStreamStore, StreamEntry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const AUTOCLAIM_INTERVAL: Duration = Duration::from_secs(60);
const AUTOCLAIM_IDLE_TIMEOUT_MS: usize = 300_000;
const AUTOCLAIM_COUNT: usize = 64;
const READ_BLOCK_MS: usize = 1_000;

/// One message pulled off the anycast or broadcast channel, carrying
/// its in-band retry counter.
#[derive(Debug, Clone)]
pub struct MQMessage {
    pub msg_id: String,
    pub payload: HashMap<String, Vec<u8>>,
    pub retry_count: u32,
}

impl MQMessage {
    fn from_entry(entry: StreamEntry) -> Self {
        let retry_count = entry
            .field("_retry_count")
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let payload = entry.fields.into_iter().collect();
        Self {
            msg_id: entry.id,
            payload,
            retry_count,
        }
    }

    /// True if this message may still be republished after a reclaim.
    pub fn should_retry(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }

    fn to_fields(&self) -> Vec<(&str, Vec<u8>)> {
        let mut fields: Vec<(&str, Vec<u8>)> = self
            .payload
            .iter()
            .filter(|(k, _)| k.as_str() != "_retry_count")
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        fields.push(("_retry_count", (self.retry_count + 1).to_string().into_bytes()));
        fields
    }
}

/// Construction arguments for a [`RedisQueue`].
pub struct RedisMqArgs {
    pub stream_key: String,
    pub group_name: String,
    pub node_id: Option<String>,
    pub autoclaim_idle_timeout_ms: usize,
}

impl RedisMqArgs {
    pub fn new(stream_key: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            group_name: group_name.into(),
            node_id: None,
            autoclaim_idle_timeout_ms: AUTOCLAIM_IDLE_TIMEOUT_MS,
        }
    }
}

struct Shared {
    stream_key: String,
    group_name: String,
    consumer_id: String,
    closed: AtomicBool,
}

/// A running anycast+broadcast queue over one stream. Dropping this
/// does not stop the background tasks — call [`RedisQueue::close`]
/// for a clean shutdown.
pub struct RedisQueue {
    shared: Arc<Shared>,
    send_store: RedisStreamStore,
    consume_rx: mpsc::UnboundedReceiver<MQMessage>,
    subscribe_rx: mpsc::UnboundedReceiver<MQMessage>,
    reader_task: JoinHandle<()>,
    autoclaim_task: JoinHandle<()>,
    broadcast_task: JoinHandle<()>,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, args: RedisMqArgs) -> Result<Self> {
        let store = RedisStreamStore::connect(redis_url).await?;
        let consumer_id = generate_consumer_id(args.node_id.as_deref());
        let shared = Arc::new(Shared {
            stream_key: args.stream_key,
            group_name: args.group_name,
            consumer_id,
            closed: AtomicBool::new(false),
        });

        {
            let mut store = store.clone();
            store.create_group(&shared.stream_key, &shared.group_name).await?;
        }

        let (consume_tx, consume_rx) = mpsc::unbounded_channel();
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_messages_loop(
            shared.clone(),
            store.clone(),
            consume_tx,
        ));
        let autoclaim_task = tokio::spawn(autoclaim_loop(
            shared.clone(),
            store.clone(),
            args.autoclaim_idle_timeout_ms,
        ));
        let broadcast_task = tokio::spawn(read_broadcast_loop(
            shared.clone(),
            store.clone(),
            subscribe_tx,
        ));

        Ok(Self {
            shared,
            send_store: store,
            consume_rx,
            subscribe_rx,
            reader_task,
            autoclaim_task,
            broadcast_task,
        })
    }

    pub fn consumer_id(&self) -> &str {
        &self.shared.consumer_id
    }

    /// Appends `fields` to the anycast stream with `MAXLEN ~ 128`.
    pub async fn anycast(&mut self, fields: &[(&str, Vec<u8>)]) -> Result<String> {
        self.ensure_open()?;
        self.send_store
            .append(&self.shared.stream_key, fields, DEFAULT_STREAM_MAXLEN)
            .await
    }

    /// Appends `fields` to the same stream; broadcast subscribers read
    /// it independently via `XREAD` rather than a consumer group.
    pub async fn broadcast(&mut self, fields: &[(&str, Vec<u8>)]) -> Result<String> {
        self.ensure_open()?;
        self.send_store
            .append(&self.shared.stream_key, fields, DEFAULT_STREAM_MAXLEN)
            .await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(Error::Internal(anyhow::anyhow!("queue is closed")))
        } else {
            Ok(())
        }
    }

    /// Waits for the next anycast message. Callers must call
    /// [`RedisQueue::ack`] once every consumer handler for the
    /// message-id has completed.
    pub async fn recv_consume(&mut self) -> Option<MQMessage> {
        self.consume_rx.recv().await
    }

    /// Waits for the next broadcast message.
    pub async fn recv_broadcast(&mut self) -> Option<MQMessage> {
        self.subscribe_rx.recv().await
    }

    pub async fn ack(&mut self, msg_id: &str) -> Result<()> {
        self.send_store
            .ack(&self.shared.stream_key, &self.shared.group_name, &[msg_id.to_owned()])
            .await
    }

    /// Stops all three background tasks and marks the queue closed.
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader_task.abort();
        self.autoclaim_task.abort();
        self.broadcast_task.abort();
        info!(stream = %self.shared.stream_key, "message queue closed");
    }

    /// Splits this queue into a cloneable send/ack handle and the two
    /// receive channels, so a consumer can read the anycast and
    /// broadcast streams from separate tasks without fighting over a
    /// single `&mut self`.
    pub fn split(self) -> (RedisQueueHandle, mpsc::UnboundedReceiver<MQMessage>, mpsc::UnboundedReceiver<MQMessage>) {
        let handle = RedisQueueHandle {
            shared: self.shared,
            store: self.send_store,
            tasks: vec![
                Arc::new(self.reader_task),
                Arc::new(self.autoclaim_task),
                Arc::new(self.broadcast_task),
            ],
        };
        (handle, self.consume_rx, self.subscribe_rx)
    }
}

/// The send/ack half of a [`RedisQueue`] after [`RedisQueue::split`].
/// Cheaply cloneable — every clone shares the same underlying
/// connection and closed-flag.
#[derive(Clone)]
pub struct RedisQueueHandle {
    shared: Arc<Shared>,
    store: RedisStreamStore,
    tasks: Vec<Arc<JoinHandle<()>>>,
}

impl RedisQueueHandle {
    pub fn consumer_id(&self) -> &str {
        &self.shared.consumer_id
    }

    pub async fn anycast(&self, fields: &[(&str, Vec<u8>)]) -> Result<String> {
        self.ensure_open()?;
        let mut store = self.store.clone();
        store.append(&self.shared.stream_key, fields, DEFAULT_STREAM_MAXLEN).await
    }

    pub async fn broadcast(&self, fields: &[(&str, Vec<u8>)]) -> Result<String> {
        self.ensure_open()?;
        let mut store = self.store.clone();
        store.append(&self.shared.stream_key, fields, DEFAULT_STREAM_MAXLEN).await
    }

    pub async fn ack(&self, msg_id: &str) -> Result<()> {
        let mut store = self.store.clone();
        store
            .ack(&self.shared.stream_key, &self.shared.group_name, &[msg_id.to_owned()])
            .await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(Error::Internal(anyhow::anyhow!("queue is closed")))
        } else {
            Ok(())
        }
    }

    /// Stops the background reader tasks. Idempotent; safe to call
    /// from any clone.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for task in &self.tasks {
            task.abort();
        }
        info!(stream = %self.shared.stream_key, "message queue closed");
    }
}

async fn read_messages_loop(
    shared: Arc<Shared>,
    mut store: RedisStreamStore,
    tx: mpsc::UnboundedSender<MQMessage>,
) {
    debug!(stream = %shared.stream_key, "starting anycast reader loop");
    let throttle = LogThrottle::default_10s();
    let mut elapsed_ms: i64 = 0;
    while !shared.closed.load(Ordering::Acquire) {
        match store
            .read_group(
                &shared.stream_key,
                &shared.group_name,
                &shared.consumer_id,
                READ_BLOCK_MS,
                1,
            )
            .await
        {
            Ok(entries) => {
                for entry in entries {
                    if tx.send(MQMessage::from_entry(entry)).is_err() {
                        return;
                    }
                }
            }
            Err(Error::NoGroup(_)) => {
                warn!(stream = %shared.stream_key, "consumer group missing, recreating");
                let _ = store.create_group(&shared.stream_key, &shared.group_name).await;
            }
            Err(e) if e.is_transient() => {
                elapsed_ms += RECONNECT_POLL_INTERVAL.as_millis() as i64;
                if throttle.should_emit(elapsed_ms) {
                    warn!(stream = %shared.stream_key, error = %e, "transient error reading messages, retrying");
                }
                tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
            }
            Err(e) => {
                error!(stream = %shared.stream_key, error = %e, "fatal error reading messages, stopping reader loop");
                return;
            }
        }
    }
}

async fn autoclaim_loop(shared: Arc<Shared>, mut store: RedisStreamStore, idle_timeout_ms: usize) {
    debug!(stream = %shared.stream_key, "starting autoclaim loop");
    let mut start_id = "0-0".to_owned();
    while !shared.closed.load(Ordering::Acquire) {
        match store
            .autoclaim(
                &shared.stream_key,
                &shared.group_name,
                &shared.consumer_id,
                idle_timeout_ms,
                &start_id,
                AUTOCLAIM_COUNT,
            )
            .await
        {
            Ok((next_start_id, entries)) => {
                if entries.is_empty() {
                    tokio::time::sleep(AUTOCLAIM_INTERVAL).await;
                    continue;
                }
                start_id = next_start_id;
                for entry in entries {
                    let msg = MQMessage::from_entry(entry);
                    if msg.should_retry() {
                        republish_with_incremented_retry(&shared, &mut store, &msg).await;
                    } else {
                        warn!(
                            stream = %shared.stream_key,
                            msg_id = %msg.msg_id,
                            "dropping message after exceeding max retries"
                        );
                        let _ = store
                            .ack(&shared.stream_key, &shared.group_name, &[msg.msg_id.clone()])
                            .await;
                    }
                }
            }
            Err(Error::NoGroup(_)) => {
                let _ = store.create_group(&shared.stream_key, &shared.group_name).await;
            }
            Err(e) if e.is_transient() => {
                tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
            }
            Err(e) => {
                error!(stream = %shared.stream_key, error = %e, "fatal error in autoclaim loop, stopping");
                return;
            }
        }
    }
}

async fn republish_with_incremented_retry(
    shared: &Arc<Shared>,
    store: &mut RedisStreamStore,
    msg: &MQMessage,
) {
    let fields = msg.to_fields();
    if let Err(e) = store.append(&shared.stream_key, &fields, DEFAULT_STREAM_MAXLEN).await {
        error!(stream = %shared.stream_key, error = %e, "failed to republish reclaimed message");
        return;
    }
    let _ = store
        .ack(&shared.stream_key, &shared.group_name, &[msg.msg_id.clone()])
        .await;
}

async fn read_broadcast_loop(
    shared: Arc<Shared>,
    mut store: RedisStreamStore,
    tx: mpsc::UnboundedSender<MQMessage>,
) {
    debug!(stream = %shared.stream_key, "starting broadcast reader loop");
    let mut last_id = "$".to_owned();
    while !shared.closed.load(Ordering::Acquire) {
        match store.read_stream(&shared.stream_key, &last_id, READ_BLOCK_MS, 1).await {
            Ok(entries) => {
                for entry in entries {
                    last_id = entry.id.clone();
                    if tx.send(MQMessage::from_entry(entry)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                tokio::time::sleep(RECONNECT_POLL_INTERVAL).await;
            }
            Err(e) => {
                error!(stream = %shared.stream_key, error = %e, "fatal error in broadcast reader loop, stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterbus_streamstore::StreamEntry;

    fn entry(id: &str, fields: Vec<(&str, Vec<u8>)>) -> StreamEntry {
        StreamEntry {
            id: id.to_owned(),
            fields: fields.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
        }
    }

    #[test]
    fn retry_count_defaults_to_zero() {
        let msg = MQMessage::from_entry(entry("1-0", vec![("name", b"x".to_vec())]));
        assert_eq!(msg.retry_count, 0);
        assert!(msg.should_retry());
    }

    #[test]
    fn retry_count_is_parsed_from_payload() {
        let msg = MQMessage::from_entry(entry(
            "1-0",
            vec![("name", b"x".to_vec()), ("_retry_count", b"3".to_vec())],
        ));
        assert_eq!(msg.retry_count, 3);
        assert!(!msg.should_retry());
    }

    #[test]
    fn to_fields_increments_retry_count_and_drops_old_one() {
        let msg = MQMessage::from_entry(entry(
            "1-0",
            vec![("name", b"x".to_vec()), ("_retry_count", b"1".to_vec())],
        ));
        let fields = msg.to_fields();
        let retry_field = fields.iter().find(|(k, _)| *k == "_retry_count").unwrap();
        assert_eq!(retry_field.1, b"2".to_vec());
        assert_eq!(fields.iter().filter(|(k, _)| *k == "_retry_count").count(), 1);
    }
}
