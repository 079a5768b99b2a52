//! # Clusterbus Events
//!
//! The event type catalog: domain/delivery-pattern enums, the `Event`
//! trait every wire event implements, the positional-tuple msgpack
//! codec, the background-task event family, and a handful of
//! representative events for the other cluster domains.

pub mod bgtask_events;
pub mod catalog;
pub mod codec;
pub mod domain_events;
pub mod event;
pub mod types;

pub use bgtask_events::{
    BgtaskAlreadyDoneEvent, BgtaskCancelledEvent, BgtaskDoneEvent, BgtaskEvent, BgtaskFailedEvent,
    BgtaskPartialSuccessEvent, BgtaskUpdatedEvent, TaskStatus,
};
pub use catalog::BroadcastEventCatalog;
pub use domain_events::{
    AgentStartedEvent, DoScheduleEvent, IdleCheckTriggeredEvent, KernelStartedEvent,
    SessionEnqueuedEvent, VfolderDeletedEvent,
};
pub use codec::EventArgs;
pub use event::Event;
pub use types::{DeliveryPattern, EventCacheDomain, EventDomain, UserEvent};
