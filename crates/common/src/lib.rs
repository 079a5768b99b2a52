//! # Clusterbus Common
//!
//! Shared utilities used by every crate in the cluster-bus workspace:
//! error types, structured logging setup, and the pure consumer-id /
//! backoff helpers that the stream-store and message-queue layers
//! build on.

pub mod consumer_id;
pub mod error;
pub mod logging;
pub mod retry;

pub use consumer_id::generate_consumer_id;
pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_json};
