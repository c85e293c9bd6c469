//! Event primitives for the qnsim kernel: the `Event`/`Process` data model,
//! the local vs. foreign owner discriminant, and the pending-event priority
//! queue (`EventList`) every timeline drives its loop from.

mod event;
mod list;

pub use event::{Event, EntityId, Owner, Process, SimTime, WireEvent, DEFAULT_PRIORITY, TIME_INFINITY};
pub use list::{EventId, EventList};
