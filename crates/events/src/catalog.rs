//! Startup-time duplicate-registration guard for broadcast events.
//!
//! Broadcast event names must be globally unique because every
//! subscriber across the cluster decodes by name; two event classes
//! sharing a name would silently corrupt each other's payloads. This
//! used to be enforced at class-definition time; here it is an
//! explicit call made once during process startup, returning an error
//! instead of panicking so the caller can decide how to fail.

use std::collections::HashMap;

use clusterbus_common::Error;

use crate::event::Event;
use crate::types::DeliveryPattern;

#[derive(Debug, Default)]
pub struct BroadcastEventCatalog {
    registered: HashMap<&'static str, &'static str>,
}

impl BroadcastEventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` by its `event_name()`. Only broadcast events are
    /// tracked here — anycast events are load-balanced within a group
    /// and don't need global name uniqueness enforced at this layer.
    pub fn register<E: Event>(&mut self) -> Result<(), Error> {
        if E::delivery_pattern() != DeliveryPattern::Broadcast {
            return Ok(());
        }
        let name = E::event_name();
        if let Some(existing) = self.registered.get(name) {
            return Err(Error::Internal(anyhow::anyhow!(
                "event {name} is already registered (type: {existing})"
            )));
        }
        self.registered.insert(name, std::any::type_name::<E>());
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgtask_events::{BgtaskDoneEvent, BgtaskUpdatedEvent};

    #[test]
    fn rejects_duplicate_registration() {
        let mut catalog = BroadcastEventCatalog::new();
        catalog.register::<BgtaskUpdatedEvent>().unwrap();
        let err = catalog.register::<BgtaskUpdatedEvent>();
        assert!(err.is_err());
    }

    #[test]
    fn distinct_names_both_succeed() {
        let mut catalog = BroadcastEventCatalog::new();
        catalog.register::<BgtaskUpdatedEvent>().unwrap();
        catalog.register::<BgtaskDoneEvent>().unwrap();
        assert!(catalog.is_registered("bgtask_updated"));
        assert!(catalog.is_registered("bgtask_done"));
    }
}
