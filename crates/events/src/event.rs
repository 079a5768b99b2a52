//! The `Event` trait every wire event implements.

use std::fmt::Debug;

use clusterbus_common::Error;

use crate::codec::EventArgs;
use crate::types::{DeliveryPattern, EventDomain, UserEvent};

/// A typed event that can cross the wire as `{name, source, args}`.
///
/// `event_name`/`event_domain`/`delivery_pattern` are associated
/// functions rather than methods because they describe the *class* of
/// event, not a particular instance — mirroring the classmethods on
/// the event this trait is modeled after. `Self: Sized` lets the
/// catalog and dispatcher call them generically without needing a
/// trait object.
pub trait Event: Debug + Send + Sync + 'static {
    fn event_name() -> &'static str
    where
        Self: Sized;

    fn event_domain() -> EventDomain
    where
        Self: Sized;

    fn delivery_pattern() -> DeliveryPattern
    where
        Self: Sized;

    /// Routing key for the `EventHub`. `None` means the event is
    /// process-scoped and is never fanned out to subscribers.
    fn domain_id(&self) -> Option<String>;

    /// Client-facing projection, if this event class exposes one.
    fn user_event(&self) -> Option<UserEvent> {
        None
    }

    fn serialize(&self) -> Result<EventArgs, Error>;

    fn deserialize(args: &EventArgs) -> Result<Self, Error>
    where
        Self: Sized;
}
