//! Event domain/delivery-pattern enums shared by every event class.

use std::fmt;

/// Logical namespace an event belongs to; used by `EventHub` routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDomain {
    Bgtask,
    Image,
    Kernel,
    ModelServing,
    ModelRoute,
    Schedule,
    IdleCheck,
    Session,
    Agent,
    Vfolder,
    Volume,
    Log,
    Workflow,
}

impl EventDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDomain::Bgtask => "bgtask",
            EventDomain::Image => "image",
            EventDomain::Kernel => "kernel",
            EventDomain::ModelServing => "model_serving",
            EventDomain::ModelRoute => "model_route",
            EventDomain::Schedule => "schedule",
            EventDomain::IdleCheck => "idle_check",
            EventDomain::Session => "session",
            EventDomain::Agent => "agent",
            EventDomain::Vfolder => "vfolder",
            EventDomain::Volume => "volume",
            EventDomain::Log => "log",
            EventDomain::Workflow => "workflow",
        }
    }
}

impl fmt::Display for EventDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event is load-balanced across one consumer group
/// (`Anycast`) or delivered to every subscriber (`Broadcast`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryPattern {
    Anycast,
    Broadcast,
}

/// Domains that support a `WithCache` propagator lookup. Kept as its
/// own small enum (rather than reusing `EventDomain`) because only a
/// subset of domains expose a "fetch the last cached event" hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCacheDomain {
    Bgtask,
}

impl EventCacheDomain {
    pub fn cache_id(&self, id: &str) -> String {
        let domain = match self {
            EventCacheDomain::Bgtask => "bgtask",
        };
        format!("{domain}.{id}")
    }
}

/// Client-facing projection of an event, for subsystems (outside this
/// crate's scope) that need to forward a trimmed-down view to an
/// end-user session. Most events have no such projection.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEvent {
    pub event_name: &'static str,
    pub summary: String,
}
