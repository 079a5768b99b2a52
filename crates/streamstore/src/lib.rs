//! # Clusterbus StreamStore
//!
//! Thin wrapper over a Redis-compatible stream engine, exposing just
//! the primitives the message queue and bgtask layers need:
//! append/read-group/read-stream/ack/autoclaim/trim for streams, and
//! hset/hgetall/expire for the bgtask key-value side. Every call
//! reclassifies its `redis::RedisError` into `clusterbus_common::Error`
//! so upstream retry ladders never have to match on raw Redis error
//! strings themselves.

use std::collections::HashMap;

use clusterbus_common::Error;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

/// One stream entry as returned by a read/autoclaim call: an opaque,
/// monotonic-within-stream id plus its ordered field/value pairs.
/// Values are kept as raw bytes because the `args` field carries
/// msgpack, not UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, Vec<u8>)>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// Default approximate cap applied to every stream this crate writes
/// to, per the external-interface contract: `MAXLEN ~ 128`.
pub const DEFAULT_STREAM_MAXLEN: usize = 128;

#[derive(Clone)]
pub struct RedisStreamStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStreamStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url).map_err(Error::from_redis)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(Error::from_redis)?;
        info!(redis_url, "connected to stream store");
        Ok(Self { conn })
    }

    /// `XADD key MAXLEN ~ maxlen * field value …`. Returns the
    /// server-assigned message id.
    pub async fn append(
        &mut self,
        stream: &str,
        fields: &[(&str, Vec<u8>)],
        maxlen_approx: usize,
    ) -> Result<String, Error> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("MAXLEN").arg("~").arg(maxlen_approx).arg("*");
        for (key, value) in fields {
            cmd.arg(*key).arg(value.as_slice());
        }
        let id: String = cmd.query_async(&mut self.conn).await.map_err(Error::from_redis)?;
        Ok(id)
    }

    /// `XGROUP CREATE key group $ MKSTREAM`. `BUSYGROUP` (the group
    /// already exists) is swallowed, matching the protocol-error
    /// policy in the error handling design.
    pub async fn create_group(&mut self, stream: &str, group: &str) -> Result<(), Error> {
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(_) => {
                info!(stream, group, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream, group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(Error::from_redis(e)),
        }
    }

    /// `XREADGROUP GROUP g c BLOCK ms COUNT count STREAMS key >`.
    pub async fn read_group(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: usize,
        count: usize,
    ) -> Result<Vec<StreamEntry>, Error> {
        let response: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(Error::from_redis)?;

        Ok(parse_stream_reply(response))
    }

    /// `XREAD BLOCK ms STREAMS key last_id`. Used for broadcast reads,
    /// where `last_id` is `$` on first call and then the id of the
    /// last message seen.
    pub async fn read_stream(
        &mut self,
        stream: &str,
        last_id: &str,
        block_ms: usize,
        count: usize,
    ) -> Result<Vec<StreamEntry>, Error> {
        let response: redis::Value = redis::cmd("XREAD")
            .arg("BLOCK")
            .arg(block_ms)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg(last_id)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::from_redis)?;

        Ok(parse_stream_reply(response))
    }

    /// `XACK key group id…`.
    pub async fn ack(&mut self, stream: &str, group: &str, ids: &[String]) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id);
        }
        let _acked: usize = cmd.query_async(&mut self.conn).await.map_err(Error::from_redis)?;
        Ok(())
    }

    /// `XAUTOCLAIM key group consumer min-idle start-id COUNT count`.
    /// Returns the next rolling start id plus the reclaimed entries.
    pub async fn autoclaim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: usize,
        start_id: &str,
        count: usize,
    ) -> Result<(String, Vec<StreamEntry>), Error> {
        let response: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(start_id)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::from_redis)?;

        // XAUTOCLAIM replies Array([next-start-id, Array([entries...]), Array([deleted-ids...])]).
        if let redis::Value::Array(parts) = response {
            let next_start_id = match parts.first() {
                Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                _ => start_id.to_owned(),
            };
            let entries = match parts.get(1) {
                Some(value) => parse_message_list(value),
                None => Vec::new(),
            };
            Ok((next_start_id, entries))
        } else {
            warn!(stream, "unexpected XAUTOCLAIM reply shape");
            Ok((start_id.to_owned(), Vec::new()))
        }
    }

    /// `XTRIM key MAXLEN ~ maxlen`.
    pub async fn trim(&mut self, stream: &str, maxlen_approx: usize) -> Result<(), Error> {
        let _trimmed: usize = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen_approx)
            .query_async(&mut self.conn)
            .await
            .map_err(Error::from_redis)?;
        Ok(())
    }

    /// `HSET key field value …` followed by `EXPIRE key ttl`, issued
    /// as a pipeline so the TTL refresh can never be observed
    /// separately from the write it protects.
    pub async fn kv_hset_with_ttl(
        &mut self,
        key: &str,
        fields: &[(&str, String)],
        ttl_secs: i64,
    ) -> Result<(), Error> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        {
            let mut hset = pipe.cmd("HSET");
            hset.arg(key);
            for (field, value) in fields {
                hset.arg(*field).arg(value);
            }
        }
        pipe.cmd("EXPIRE").arg(key).arg(ttl_secs);
        pipe.query_async::<()>(&mut self.conn).await.map_err(Error::from_redis)?;
        Ok(())
    }

    /// `HGETALL key`. `None` when the key doesn't exist (expired or
    /// never written) — callers surface this as "not found".
    pub async fn kv_hgetall(&mut self, key: &str) -> Result<Option<HashMap<String, String>>, Error> {
        let map: HashMap<String, String> =
            self.conn.hgetall(key).await.map_err(Error::from_redis)?;
        if map.is_empty() {
            Ok(None)
        } else {
            Ok(Some(map))
        }
    }
}

fn parse_stream_reply(response: redis::Value) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    if let redis::Value::Array(streams) = response {
        for stream_data in &streams {
            if let redis::Value::Array(stream_parts) = stream_data {
                if stream_parts.len() < 2 {
                    continue;
                }
                entries.extend(parse_message_list(&stream_parts[1]));
            }
        }
    }
    entries
}

fn parse_message_list(value: &redis::Value) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    if let redis::Value::Array(messages) = value {
        for message in messages {
            if let redis::Value::Array(entry_parts) = message {
                if entry_parts.len() < 2 {
                    continue;
                }
                let id = match &entry_parts[0] {
                    redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                    _ => continue,
                };
                let mut fields = Vec::new();
                if let redis::Value::Array(field_data) = &entry_parts[1] {
                    for chunk in field_data.chunks(2) {
                        if let [redis::Value::BulkString(k), redis::Value::BulkString(v)] = chunk {
                            fields.push((String::from_utf8_lossy(k).into_owned(), v.clone()));
                        }
                    }
                }
                entries.push(StreamEntry { id, fields });
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_entry_field_lookup() {
        let entry = StreamEntry {
            id: "1-0".to_owned(),
            fields: vec![
                ("name".to_owned(), b"bgtask_updated".to_vec()),
                ("args".to_owned(), vec![0x90]),
            ],
        };
        assert_eq!(entry.field("name"), Some(b"bgtask_updated".as_slice()));
        assert_eq!(entry.field("missing"), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis; set TEST_REDIS_URL.
    async fn connects_and_round_trips_an_append() {
        let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let mut store = RedisStreamStore::connect(&url).await.unwrap();
        let id = store
            .append("clusterbus:test", &[("name", b"ping".to_vec())], DEFAULT_STREAM_MAXLEN)
            .await
            .unwrap();
        assert!(!id.is_empty());
    }
}
