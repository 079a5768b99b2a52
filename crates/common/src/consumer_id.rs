//! Deterministic consumer identity derivation.
//!
//! Kept as a pure function (no global state) so it can be unit tested
//! and so each process wires its own node id / binary path in rather
//! than reaching into ambient globals.

use sha1::{Digest, Sha1};

/// Name of the environment variable the hosting runtime uses to tell a
/// worker process its slot index within a process group. Falls back to
/// `0` when unset, which is also correct for single-process deployments.
pub const PROCESS_INDEX_VAR: &str = "CLUSTERBUS_PROCESS_INDEX";

/// Derives a consumer id stable across restarts of the same process
/// slot but distinct across different slots/hosts/binaries, as
/// `sha1(node_id) : sha1(binary_path) : process_index`.
///
/// `node_id` should be a stable cluster-assigned identifier; pass
/// `None` to fall back to the local FQDN.
pub fn generate_consumer_id(node_id: Option<&str>) -> String {
    let host_component = match node_id {
        Some(id) => id.to_owned(),
        None => hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_owned()),
    };
    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned());
    let process_index = current_process_index();

    format!(
        "{}:{}:{}",
        sha1_hex(&host_component),
        sha1_hex(&binary_path),
        process_index
    )
}

/// Reads the current process' worker-slot index, defaulting to 0.
pub fn current_process_index() -> u32 {
    std::env::var(PROCESS_INDEX_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_for_same_inputs() {
        let a = generate_consumer_id(Some("node-a"));
        let b = generate_consumer_id(Some("node-a"));
        assert_eq!(a, b);
    }

    #[test]
    fn differs_across_node_ids() {
        let a = generate_consumer_id(Some("node-a"));
        let b = generate_consumer_id(Some("node-b"));
        assert_ne!(a, b);
    }

    #[test]
    fn has_three_colon_separated_components() {
        let id = generate_consumer_id(Some("node-a"));
        assert_eq!(id.split(':').count(), 3);
    }

    #[test]
    fn process_index_defaults_to_zero() {
        // SAFETY: test runs single-threaded w.r.t. this env var and
        // restores it before returning.
        unsafe {
            std::env::remove_var(PROCESS_INDEX_VAR);
        }
        assert_eq!(current_process_index(), 0);
    }
}
