//! # Clusterbus Dispatcher
//!
//! The event-name-keyed handler registries plus the two read loops
//! (anycast consumer, broadcast subscriber) that decode wire messages
//! and fan them out. Also home to `EventProducer`, the thin encode
//! wrapper over [`clusterbus_mq::RedisQueueHandle`], and the
//! coalescing combinator used to collapse bursts of identical events
//! into fewer handler invocations.

pub mod coalesce;
pub mod producer;
pub mod registry;

pub use coalesce::coalesce;
pub use producer::EventProducer;
pub use registry::{EventDispatcher, EventObserver, HandlerToken, NopEventObserver};
