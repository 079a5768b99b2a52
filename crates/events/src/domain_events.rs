//! Representative non-bgtask events.
//!
//! The event payloads themselves are in scope even though the domain
//! object models behind them (sessions, agents, kernels, vfolders)
//! are not; these are deliberately thin, carrying only the identifiers
//! and facts a handler needs to react, not full domain snapshots.

use clusterbus_common::Error;

use crate::codec::EventArgs;
use crate::event::Event;
use crate::types::{DeliveryPattern, EventDomain};

/// Process-scoped trigger telling every manager in the group "try a
/// scheduling pass now". `domain_id()` is `None`: this is a lifecycle
/// nudge, not something a subscriber routes on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DoScheduleEvent;

impl Event for DoScheduleEvent {
    fn event_name() -> &'static str {
        "do_schedule"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Schedule
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Anycast
    }

    fn domain_id(&self) -> Option<String> {
        None
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        Ok(EventArgs::new())
    }

    fn deserialize(_args: &EventArgs) -> Result<Self, Error> {
        Ok(Self)
    }
}

/// Same shape as `DoScheduleEvent`: a process-scoped nudge for the
/// idle-checker loop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdleCheckTriggeredEvent;

impl Event for IdleCheckTriggeredEvent {
    fn event_name() -> &'static str {
        "idle_check_triggered"
    }

    fn event_domain() -> EventDomain {
        EventDomain::IdleCheck
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Anycast
    }

    fn domain_id(&self) -> Option<String> {
        None
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        Ok(EventArgs::new())
    }

    fn deserialize(_args: &EventArgs) -> Result<Self, Error> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentStartedEvent {
    pub agent_id: String,
    pub region: String,
}

impl Event for AgentStartedEvent {
    fn event_name() -> &'static str {
        "agent_started"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Agent
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        Some(self.agent_id.clone())
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        let mut args = EventArgs::new();
        args.push_str(self.agent_id.clone()).push_str(self.region.clone());
        Ok(args)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        Ok(Self {
            agent_id: args.require_str(0, "agent_id")?,
            region: args.require_str(1, "region")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelStartedEvent {
    pub kernel_id: String,
    pub session_id: String,
}

impl Event for KernelStartedEvent {
    fn event_name() -> &'static str {
        "kernel_started"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Kernel
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        Some(self.kernel_id.clone())
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        let mut args = EventArgs::new();
        args.push_str(self.kernel_id.clone()).push_str(self.session_id.clone());
        Ok(args)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        Ok(Self {
            kernel_id: args.require_str(0, "kernel_id")?,
            session_id: args.require_str(1, "session_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEnqueuedEvent {
    pub session_id: String,
    pub creation_id: Option<String>,
}

impl Event for SessionEnqueuedEvent {
    fn event_name() -> &'static str {
        "session_enqueued"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Session
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        let mut args = EventArgs::new();
        args.push_str(self.session_id.clone())
            .push_opt_str(self.creation_id.clone());
        Ok(args)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        Ok(Self {
            session_id: args.require_str(0, "session_id")?,
            creation_id: args.opt_str(1, "creation_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VfolderDeletedEvent {
    pub vfolder_id: String,
}

impl Event for VfolderDeletedEvent {
    fn event_name() -> &'static str {
        "vfolder_deleted"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Vfolder
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        Some(self.vfolder_id.clone())
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        let mut args = EventArgs::new();
        args.push_str(self.vfolder_id.clone());
        Ok(args)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        Ok(Self {
            vfolder_id: args.require_str(0, "vfolder_id")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_schedule_has_no_domain_id() {
        assert_eq!(DoScheduleEvent.domain_id(), None);
        assert_eq!(DoScheduleEvent::delivery_pattern(), DeliveryPattern::Anycast);
    }

    #[test]
    fn agent_started_round_trips() {
        let original = AgentStartedEvent {
            agent_id: "agent-1".to_owned(),
            region: "us-east".to_owned(),
        };
        let decoded = AgentStartedEvent::deserialize(&original.serialize().unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn session_enqueued_round_trips_without_creation_id() {
        let original = SessionEnqueuedEvent {
            session_id: "sess-1".to_owned(),
            creation_id: None,
        };
        let decoded = SessionEnqueuedEvent::deserialize(&original.serialize().unwrap()).unwrap();
        assert_eq!(original, decoded);
    }
}
