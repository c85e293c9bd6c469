//! Scheduled invocations and their owners.
//!
//! An [`Event`] pairs a timestamp with a [`Process`], the deferred method
//! call it performs when popped. The owner of a process is either a direct
//! handle into the local entity arena or a globally unique entity name; the
//! name form is what allows an event to be shipped to the worker that owns
//! the target entity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Simulated time in integer picoseconds.
pub type SimTime = u64;

/// Sentinel for "no pending event"; used by the global clock reduction.
pub const TIME_INFINITY: SimTime = SimTime::MAX;

/// Priority assigned when the scheduler is not asked for one. Smaller values
/// win ties, so the default sorts behind every explicit priority.
pub const DEFAULT_PRIORITY: u32 = u32::MAX;

/// Handle to an entity slot in a timeline's arena. Only meaningful on the
/// worker that issued it; events that cross workers carry names instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl EntityId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Target of a process: a resolved local entity or a name to resolve later.
///
/// The name form serves two purposes. A name registered as foreign diverts
/// the event into the outbound buffer for the owning worker; an unregistered
/// name is treated as local and resolved against the arena's name index when
/// the event executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Local(EntityId),
    Named(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Local(id) => write!(f, "entity {id}"),
            Owner::Named(name) => write!(f, "{name:?}"),
        }
    }
}

/// A deferred method invocation: owner, method selector, arguments.
#[derive(Debug, Clone)]
pub struct Process {
    pub owner: Owner,
    pub method: String,
    pub args: Vec<Value>,
}

impl Process {
    pub fn new(owner: Owner, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            owner,
            method: method.into(),
            args,
        }
    }
}

/// A pending invocation on the event list.
///
/// Immutable once scheduled, except for `time` (via reschedule) and the
/// validity flag (cleared by removal; invalid events are discarded when
/// popped rather than extracted from the heap).
#[derive(Debug, Clone)]
pub struct Event {
    pub time: SimTime,
    pub priority: u32,
    pub process: Process,
    pub(crate) valid: bool,
}

impl Event {
    pub fn new(time: SimTime, process: Process) -> Self {
        Self::with_priority(time, DEFAULT_PRIORITY, process)
    }

    pub fn with_priority(time: SimTime, priority: u32, process: Process) -> Self {
        Self {
            time,
            priority,
            process,
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The owner's name, when the event targets by name.
    pub fn owner_name(&self) -> Option<&str> {
        match &self.process.owner {
            Owner::Named(name) => Some(name),
            Owner::Local(_) => None,
        }
    }

    /// Flatten into the wire form. `None` when the owner is a local handle;
    /// such events never cross workers.
    pub fn into_wire(self) -> Option<WireEvent> {
        match self.process.owner {
            Owner::Named(owner) => Some(WireEvent {
                time: self.time,
                priority: self.priority,
                owner,
                method: self.process.method,
                args: self.process.args,
            }),
            Owner::Local(_) => None,
        }
    }
}

/// Flat serializable form of an event for cross-worker shipment.
///
/// Only name-owned events cross workers, so the owner is always a string
/// here. The encoding of a whole buffer is the kernel's concern, not the
/// transport's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub time: SimTime,
    pub priority: u32,
    pub owner: String,
    pub method: String,
    pub args: Vec<Value>,
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        Event::with_priority(
            wire.time,
            wire.priority,
            Process::new(Owner::Named(wire.owner), wire.method, wire.args),
        )
    }
}
