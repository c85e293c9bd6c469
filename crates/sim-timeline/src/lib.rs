//! Simulation timelines: the sequential event loop and the conservative
//! parallel variant.
//!
//! A [`Timeline`] owns the entities of one worker and drives their events in
//! timestamp order. [`ParallelTimeline`] extends it across a fixed worker
//! group: events against foreign-owned entities divert into per-peer
//! buffers, workers exchange those buffers and a global clock minimum at
//! barriers, and each worker then executes only inside the lookahead-bounded
//! window proven safe by the reduction.

mod entity;
mod parallel;
mod scheduler;
mod timeline;
mod wire;

pub use entity::{Call, Entity, EntityRegistry};
pub use parallel::{ParallelTimeline, SyncStats};
pub use scheduler::Context;
pub use timeline::Timeline;

// The event-model vocabulary is re-exported so entity implementations can
// depend on this crate alone.
pub use sim_events::{
    EntityId, Event, EventId, Owner, Process, SimTime, WireEvent, DEFAULT_PRIORITY, TIME_INFINITY,
};

use sim_config::ConfigError;
use sim_quantum::QuantumError;
use sim_transport::TransportError;
use thiserror::Error;

/// Kernel errors. The protocol-violation variants (time regression,
/// lookahead violation) indicate domain-logic bugs; they propagate out of
/// `run()` and abort the worker rather than being recovered.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulated time regressed: event at {event_time} ps behind clock {now} ps ({owner})")]
    TimeRegression {
        now: SimTime,
        event_time: SimTime,
        owner: String,
    },
    #[error("unknown entity {0}")]
    UnknownEntity(String),
    #[error("entity name {0:?} is already registered")]
    DuplicateEntity(String),
    #[error(
        "event for foreign entity {owner} at {event_time} ps lands inside the lookahead window \
         (now {now} ps, lookahead {lookahead} ps)"
    )]
    LookaheadViolation {
        owner: String,
        event_time: SimTime,
        now: SimTime,
        lookahead: SimTime,
    },
    #[error("cannot reschedule an event to {requested} ps, clock is already at {now} ps")]
    ReschedulePast { requested: SimTime, now: SimTime },
    #[error("entity {name} has no handler for method {method:?}")]
    UnknownMethod { name: String, method: String },
    #[error("entity {name}: {source}")]
    Entity {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("event buffer codec failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Quantum(#[from] QuantumError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
