//! Retry-ladder helpers shared by the stream-store and message-queue
//! loops: a fixed reconnect backoff plus a log-rate limiter so a
//! persistently down Redis doesn't flood stdout.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Default sleep between transient-error retries.
pub const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Maximum number of times a reclaimed message is republished before
/// it is acked and dropped as a poison message.
pub const MAX_RETRIES: u32 = 3;

/// Throttles a recurring warning to at most once per `window`.
///
/// Each loop (autoclaim, read, broadcast-read) owns one of these so a
/// long outage logs "still retrying" once every ten seconds instead of
/// once per failed read.
pub struct LogThrottle {
    window: Duration,
    last_emitted_ms: AtomicI64,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted_ms: AtomicI64::new(i64::MIN),
        }
    }

    pub fn default_10s() -> Self {
        Self::new(Duration::from_secs(10))
    }

    /// Returns true if the caller should emit the log line now, and
    /// records that a line was just emitted.
    pub fn should_emit(&self, now_ms: i64) -> bool {
        let last = self.last_emitted_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) >= self.window.as_millis() as i64 {
            self.last_emitted_ms.store(now_ms, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_on_first_call_then_suppresses() {
        let throttle = LogThrottle::new(Duration::from_secs(10));
        assert!(throttle.should_emit(1_000));
        assert!(!throttle.should_emit(1_500));
        assert!(!throttle.should_emit(10_999));
        assert!(throttle.should_emit(11_001));
    }
}
