//! Encodes an [`Event`] to its wire shape and appends it to the
//! correct side of the queue for its delivery pattern.

use clusterbus_common::Result;
use clusterbus_events::{DeliveryPattern, Event};
use clusterbus_mq::RedisQueueHandle;
use tracing::debug;

/// Wraps a [`RedisQueueHandle`] with the `{name, args}` wire encoding.
/// Cheap to clone — every clone shares the same underlying connection.
#[derive(Clone)]
pub struct EventProducer {
    handle: RedisQueueHandle,
}

impl EventProducer {
    pub fn new(handle: RedisQueueHandle) -> Self {
        Self { handle }
    }

    /// Serializes `event` and appends it to the stream, routing to the
    /// consumer-group side or the broadcast side based on
    /// `E::delivery_pattern()`. Returns the server-assigned message id.
    pub async fn produce<E: Event>(&self, event: &E) -> Result<String> {
        let args = event.serialize()?;
        let encoded = args.encode()?;
        let fields: [(&str, Vec<u8>); 2] = [
            ("name", E::event_name().as_bytes().to_vec()),
            ("args", encoded),
        ];
        let id = match E::delivery_pattern() {
            DeliveryPattern::Anycast => self.handle.anycast(&fields).await?,
            DeliveryPattern::Broadcast => self.handle.broadcast(&fields).await?,
        };
        debug!(event = E::event_name(), msg_id = %id, "produced event");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    // `EventProducer` is a thin encode-then-append wrapper; its
    // behavior is exercised end-to-end by the workspace integration
    // tests against a real Redis, since `RedisQueueHandle` has no
    // meaningful in-memory fake.
}
