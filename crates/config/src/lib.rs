//! # Clusterbus Config
//!
//! Loads the node process' configuration from environment variables
//! (optionally via a `.env` file). A flat struct with typed accessors,
//! not a `serde::Deserialize`-from-file blob — there is no file-based
//! config format anywhere else in this workspace, so none is
//! introduced here either.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use clusterbus_common::consumer_id::PROCESS_INDEX_VAR;

/// Node-wide configuration for the event/bgtask control-plane process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Redis connection settings.
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,

    /// Single stream hosting all event traffic; anycast vs broadcast
    /// is decided by which read call is used against it, not by a
    /// separate key.
    pub stream_key: String,

    /// Consumer-group name shared by every process in this node's
    /// anycast cohort.
    pub consumer_group: String,

    /// Cluster-assigned node identifier folded into the derived
    /// consumer id. Falls back to the local FQDN when unset.
    pub node_id: Option<String>,

    /// How often the autoclaim loop sweeps for idle pending entries.
    pub autoclaim_interval: Duration,

    /// Minimum idle time before a pending entry is eligible for
    /// autoclaim.
    pub autoclaim_idle_timeout_ms: usize,

    /// Sleep between transient-error retries in the reader/autoclaim
    /// loops.
    pub reconnect_poll_interval: Duration,

    /// Approximate `MAXLEN` applied on every `XADD`/`XTRIM`.
    pub queue_maxlen: usize,

    /// TTL, in seconds, applied to a bgtask's tracker hash once it
    /// reaches a terminal state.
    pub bgtask_archive_ttl_secs: i64,

    /// This process' worker-slot index, folded into the derived
    /// consumer id so sibling processes on the same host don't
    /// collide.
    pub process_index: u32,

    /// Bind address for the `/healthz`, `/readyz`, `/metrics` server.
    pub health_bind_addr: String,
}

impl NodeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Required:
    /// - `REDIS_HOST`
    /// - `REDIS_PORT`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let redis_host = env::var("REDIS_HOST").context("REDIS_HOST not set")?;
        let redis_port = env::var("REDIS_PORT")
            .context("REDIS_PORT not set")?
            .parse::<u16>()
            .context("REDIS_PORT must be a valid port number")?;
        let redis_password = env::var("REDIS_PASSWORD").ok();

        let stream_key = env::var("STREAM_KEY").unwrap_or_else(|_| "clusterbus:events".to_string());
        let consumer_group =
            env::var("CONSUMER_GROUP").unwrap_or_else(|_| "clusterbus".to_string());
        let node_id = env::var("NODE_ID").ok();

        let autoclaim_interval_secs = env::var("AUTOCLAIM_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("AUTOCLAIM_INTERVAL_SECS must be a valid number")?;

        let autoclaim_idle_timeout_ms = env::var("AUTOCLAIM_IDLE_TIMEOUT_MS")
            .unwrap_or_else(|_| "300000".to_string())
            .parse::<usize>()
            .context("AUTOCLAIM_IDLE_TIMEOUT_MS must be a valid number")?;

        let reconnect_poll_interval_ms = env::var("RECONNECT_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("RECONNECT_POLL_INTERVAL_MS must be a valid number")?;

        let queue_maxlen = env::var("QUEUE_MAXLEN")
            .unwrap_or_else(|_| "128".to_string())
            .parse::<usize>()
            .context("QUEUE_MAXLEN must be a valid number")?;

        let bgtask_archive_ttl_secs = env::var("BGTASK_ARCHIVE_TTL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse::<i64>()
            .context("BGTASK_ARCHIVE_TTL_SECS must be a valid number")?;

        let process_index = env::var(PROCESS_INDEX_VAR)
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u32>()
            .context("CLUSTERBUS_PROCESS_INDEX must be a valid number")?;

        let health_bind_addr =
            env::var("HEALTH_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Ok(Self {
            redis_host,
            redis_port,
            redis_password,
            stream_key,
            consumer_group,
            node_id,
            autoclaim_interval: Duration::from_secs(autoclaim_interval_secs),
            autoclaim_idle_timeout_ms,
            reconnect_poll_interval: Duration::from_millis(reconnect_poll_interval_ms),
            queue_maxlen,
            bgtask_archive_ttl_secs,
            process_index,
            health_bind_addr,
        })
    }

    /// Redis connection URL built from `redis_host`/`redis_port`/`redis_password`.
    pub fn redis_url(&self) -> String {
        if let Some(password) = &self.redis_password {
            format!("redis://:{}@{}:{}", password, self.redis_host, self.redis_port)
        } else {
            format!("redis://{}:{}", self.redis_host, self.redis_port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeConfig {
        NodeConfig {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            stream_key: "clusterbus:events".to_string(),
            consumer_group: "clusterbus".to_string(),
            node_id: None,
            autoclaim_interval: Duration::from_secs(60),
            autoclaim_idle_timeout_ms: 300_000,
            reconnect_poll_interval: Duration::from_millis(300),
            queue_maxlen: 128,
            bgtask_archive_ttl_secs: 86_400,
            process_index: 0,
            health_bind_addr: "0.0.0.0:8080".to_string(),
        }
    }

    #[test]
    fn redis_url_without_password() {
        let config = sample();
        assert_eq!(config.redis_url(), "redis://localhost:6379");
    }

    #[test]
    fn redis_url_with_password() {
        let mut config = sample();
        config.redis_password = Some("secret".to_string());
        assert_eq!(config.redis_url(), "redis://:secret@localhost:6379");
    }
}
