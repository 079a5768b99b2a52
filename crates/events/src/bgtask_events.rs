//! Background-task lifecycle events: one `Updated` progress event plus
//! the closed set of terminal events `{Done, Cancelled, Failed,
//! PartialSuccess}`, plus the wire-inert `AlreadyDone` replay event.
//!
//! All bgtask events are broadcast: every manager process in the
//! cluster needs to observe them so whichever process is holding the
//! subscriber for a given task id can hand the event to its local
//! `EventHub`.

use clusterbus_common::Error;
use uuid::Uuid;

use crate::codec::EventArgs;
use crate::event::Event;
use crate::types::{DeliveryPattern, EventDomain};

/// Persisted/terminal status of a background task. Distinct from the
/// *event name* a terminal transition is reported under — see
/// `BgtaskPartialSuccessEvent` for the one case where the two diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Started,
    Done,
    Cancelled,
    Failed,
    PartialSuccess,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Started => "started",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
            TaskStatus::PartialSuccess => "partial_success",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "started" => Ok(TaskStatus::Started),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "failed" => Ok(TaskStatus::Failed),
            "partial_success" => Ok(TaskStatus::PartialSuccess),
            other => Err(Error::Decode(format!("unknown bgtask status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Started)
    }
}

/// Common accessors shared by every bgtask event, parallel to the
/// per-instance methods `BaseBgtaskEvent` adds on top of `Event`.
pub trait BgtaskEvent: Event {
    fn task_id(&self) -> Uuid;
    fn status(&self) -> TaskStatus;
}

fn domain_id_of(task_id: Uuid) -> Option<String> {
    Some(task_id.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgtaskUpdatedEvent {
    pub task_id: Uuid,
    pub current_progress: f64,
    pub total_progress: f64,
    pub message: Option<String>,
}

impl Event for BgtaskUpdatedEvent {
    fn event_name() -> &'static str {
        "bgtask_updated"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Bgtask
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        domain_id_of(self.task_id)
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        let mut args = EventArgs::new();
        args.push_str(self.task_id.to_string())
            .push_f64(self.current_progress)
            .push_f64(self.total_progress)
            .push_opt_str(self.message.clone());
        Ok(args)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        let task_id = parse_task_id(args)?;
        Ok(Self {
            task_id,
            current_progress: args.f64_or(1, 0.0),
            total_progress: args.f64_or(2, 0.0),
            message: args.opt_str(3, "message")?,
        })
    }
}

impl BgtaskEvent for BgtaskUpdatedEvent {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::Started
    }
}

/// Shared serialize/deserialize shape for the "done with an optional
/// message" family (`Done`, `Cancelled`, `Failed`).
fn serialize_done_shaped(task_id: Uuid, message: &Option<String>) -> Result<EventArgs, Error> {
    let mut args = EventArgs::new();
    args.push_str(task_id.to_string()).push_opt_str(message.clone());
    Ok(args)
}

fn deserialize_done_shaped(args: &EventArgs) -> Result<(Uuid, Option<String>), Error> {
    let task_id = parse_task_id(args)?;
    let message = args.opt_str(1, "message")?;
    Ok((task_id, message))
}

fn parse_task_id(args: &EventArgs) -> Result<Uuid, Error> {
    let raw = args.require_str(0, "task_id")?;
    Uuid::parse_str(&raw).map_err(|e| Error::Decode(format!("invalid task_id: {e}")))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgtaskDoneEvent {
    pub task_id: Uuid,
    pub message: Option<String>,
}

impl Event for BgtaskDoneEvent {
    fn event_name() -> &'static str {
        "bgtask_done"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Bgtask
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        domain_id_of(self.task_id)
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        serialize_done_shaped(self.task_id, &self.message)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        let (task_id, message) = deserialize_done_shaped(args)?;
        Ok(Self { task_id, message })
    }
}

impl BgtaskEvent for BgtaskDoneEvent {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::Done
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgtaskCancelledEvent {
    pub task_id: Uuid,
    pub message: Option<String>,
}

impl Event for BgtaskCancelledEvent {
    fn event_name() -> &'static str {
        "bgtask_cancelled"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Bgtask
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        domain_id_of(self.task_id)
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        serialize_done_shaped(self.task_id, &self.message)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        let (task_id, message) = deserialize_done_shaped(args)?;
        Ok(Self { task_id, message })
    }
}

impl BgtaskEvent for BgtaskCancelledEvent {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgtaskFailedEvent {
    pub task_id: Uuid,
    pub message: Option<String>,
}

impl Event for BgtaskFailedEvent {
    fn event_name() -> &'static str {
        "bgtask_failed"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Bgtask
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        domain_id_of(self.task_id)
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        serialize_done_shaped(self.task_id, &self.message)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        let (task_id, message) = deserialize_done_shaped(args)?;
        Ok(Self { task_id, message })
    }
}

impl BgtaskEvent for BgtaskFailedEvent {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::Failed
    }
}

/// Terminal event for a task whose underlying work reported per-item
/// errors but still completed. `status()` intentionally returns
/// `Done`, not `PartialSuccess` — see SPEC_FULL.md §9's open-question
/// decision: the wire event name carries the distinction, the
/// persisted status stays backward-compatible with older clients.
#[derive(Debug, Clone, PartialEq)]
pub struct BgtaskPartialSuccessEvent {
    pub task_id: Uuid,
    pub message: Option<String>,
    pub errors: Vec<String>,
}

impl Event for BgtaskPartialSuccessEvent {
    fn event_name() -> &'static str {
        "bgtask_partial_success"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Bgtask
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        domain_id_of(self.task_id)
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        let mut args = EventArgs::new();
        args.push_str(self.task_id.to_string())
            .push_opt_str(self.message.clone())
            .push_str_list(&self.errors);
        Ok(args)
    }

    fn deserialize(args: &EventArgs) -> Result<Self, Error> {
        let task_id = parse_task_id(args)?;
        let message = args.opt_str(1, "message")?;
        let errors = args.str_list_or_empty(2);
        Ok(Self {
            task_id,
            message,
            errors,
        })
    }
}

impl BgtaskEvent for BgtaskPartialSuccessEvent {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::Done
    }
}

/// Synthesized by `BgtaskManager::fetch_last_finished_event` to replay
/// the last terminal state to a late subscriber. Never actually goes
/// over the wire — `serialize`/`deserialize` are unreachable on
/// purpose, mirroring the source's `UnreachableError` guard.
#[derive(Debug, Clone, PartialEq)]
pub struct BgtaskAlreadyDoneEvent {
    pub task_id: Uuid,
    pub task_status: TaskStatus,
    pub message: Option<String>,
    pub current: String,
    pub total: String,
}

impl Event for BgtaskAlreadyDoneEvent {
    fn event_name() -> &'static str {
        "bgtask_already_done"
    }

    fn event_domain() -> EventDomain {
        EventDomain::Bgtask
    }

    fn delivery_pattern() -> DeliveryPattern {
        DeliveryPattern::Broadcast
    }

    fn domain_id(&self) -> Option<String> {
        domain_id_of(self.task_id)
    }

    fn serialize(&self) -> Result<EventArgs, Error> {
        Err(Error::Internal(anyhow::anyhow!(
            "BgtaskAlreadyDoneEvent must never be serialized to the wire"
        )))
    }

    fn deserialize(_args: &EventArgs) -> Result<Self, Error> {
        Err(Error::Internal(anyhow::anyhow!(
            "BgtaskAlreadyDoneEvent must never be deserialized from the wire"
        )))
    }
}

impl BgtaskEvent for BgtaskAlreadyDoneEvent {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn status(&self) -> TaskStatus {
        self.task_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgtask_updated_round_trips() {
        let original = BgtaskUpdatedEvent {
            task_id: Uuid::new_v4(),
            current_progress: 10.0,
            total_progress: 100.0,
            message: Some("working".to_owned()),
        };
        let decoded = BgtaskUpdatedEvent::deserialize(&original.serialize().unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn bgtask_updated_round_trips_with_no_message() {
        let original = BgtaskUpdatedEvent {
            task_id: Uuid::new_v4(),
            current_progress: 0.0,
            total_progress: 0.0,
            message: None,
        };
        let decoded = BgtaskUpdatedEvent::deserialize(&original.serialize().unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn bgtask_done_round_trips() {
        let original = BgtaskDoneEvent {
            task_id: Uuid::new_v4(),
            message: None,
        };
        let decoded = BgtaskDoneEvent::deserialize(&original.serialize().unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn bgtask_partial_success_round_trips_and_keeps_done_status() {
        let original = BgtaskPartialSuccessEvent {
            task_id: Uuid::new_v4(),
            message: Some("2 of 5 items failed".to_owned()),
            errors: vec!["item-3: timeout".to_owned(), "item-4: not found".to_owned()],
        };
        let decoded =
            BgtaskPartialSuccessEvent::deserialize(&original.serialize().unwrap()).unwrap();
        assert_eq!(original, decoded);
        assert_eq!(decoded.status(), TaskStatus::Done);
        assert_eq!(BgtaskPartialSuccessEvent::event_name(), "bgtask_partial_success");
    }

    #[test]
    fn already_done_event_refuses_to_serialize() {
        let event = BgtaskAlreadyDoneEvent {
            task_id: Uuid::new_v4(),
            task_status: TaskStatus::Done,
            message: None,
            current: "0".to_owned(),
            total: "0".to_owned(),
        };
        assert!(event.serialize().is_err());
    }

    #[test]
    fn task_status_round_trips_through_strings() {
        for status in [
            TaskStatus::Started,
            TaskStatus::Done,
            TaskStatus::Cancelled,
            TaskStatus::Failed,
            TaskStatus::PartialSuccess,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
        }
    }
}
