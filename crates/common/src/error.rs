//! Error types shared across the cluster-bus crates.
//!
//! One flat enum per process boundary, mirroring how the rest of the
//! workspace distinguishes "this is expected and the caller should
//! retry" from "this is a bug or a wire-format violation".

use thiserror::Error;

/// Errors that can occur while talking to the backing Redis deployment
/// or decoding what comes back from it.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection dropped, timed out, or the server said READONLY /
    /// NOREPLICAS. Callers in the stream/queue loops treat this as
    /// transient and retry after a backoff.
    #[error("transient redis error: {0}")]
    Transient(#[from] redis::RedisError),

    /// The consumer group for a stream is missing (NOGROUP). Distinct
    /// from `Transient` because the caller should self-heal by
    /// recreating the group rather than just sleeping and retrying.
    #[error("consumer group missing: {0}")]
    NoGroup(String),

    /// A wire payload was structurally invalid (missing fields, wrong
    /// type) or failed msgpack decoding.
    #[error("decode error: {0}")]
    Decode(String),

    /// A hard Redis failure that retrying will not fix (bad auth, a
    /// key holding the wrong type, …). Callers in the stream/queue
    /// loops stop instead of spinning on a 300ms backoff forever.
    #[error("fatal redis error: {0}")]
    Fatal(redis::RedisError),

    /// An event handler panicked or returned an error while processing
    /// a delivered message.
    #[error("handler error: {0}")]
    Handler(String),

    /// The requested background task record does not exist or has
    /// expired from the tracker TTL window.
    #[error("background task not found: {0}")]
    BgtaskNotFound(String),

    /// Anything else, wrapped so call sites can still use `?`.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies a raw `redis::RedisError` the way the stream-store
    /// read/write loops need to: NOGROUP gets its own branch so the
    /// caller can recreate the group, a hard failure (bad auth, wrong
    /// key type) is fatal, everything else is transient.
    pub fn from_redis(err: redis::RedisError) -> Self {
        let msg = err.to_string();
        if msg.contains("NOGROUP") {
            return Error::NoGroup(msg);
        }
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed
            | redis::ErrorKind::TypeError
            | redis::ErrorKind::InvalidClientConfig => Error::Fatal(err),
            _ => Error::Transient(err),
        }
    }

    /// True for errors the retry ladder should sleep-and-retry on
    /// rather than surface to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_nogroup_distinctly() {
        let raw = redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "NOGROUP No such key or consumer group",
        ));
        let classified = Error::from_redis(raw);
        assert!(matches!(classified, Error::NoGroup(_)));
        assert!(!classified.is_transient());
    }

    #[test]
    fn classifies_other_errors_as_transient() {
        let raw = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
        let classified = Error::from_redis(raw);
        assert!(classified.is_transient());
    }

    #[test]
    fn classifies_auth_failure_as_fatal() {
        let raw = redis::RedisError::from((redis::ErrorKind::AuthenticationFailed, "NOAUTH"));
        let classified = Error::from_redis(raw);
        assert!(matches!(classified, Error::Fatal(_)));
        assert!(!classified.is_transient());
    }
}
