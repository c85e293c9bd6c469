//! Scheduler core shared by the timeline variants, and the [`Context`]
//! facade entities see during execution.

use crate::SimError;
use rand::rngs::StdRng;
use sim_events::{EntityId, Event, EventId, EventList, Owner, SimTime, WireEvent};
use sim_quantum::QuantumManager;
use std::collections::{HashMap, HashSet};

/// The queue-and-clock half of a timeline. Kept separate from the entity
/// arena so an executing entity can borrow the scheduler while the arena
/// holds the entity itself.
pub(crate) struct Scheduler {
    pub events: EventList,
    pub time: SimTime,
    pub stop_time: SimTime,
    pub schedule_counter: u64,
    pub run_counter: u64,
}

impl Scheduler {
    pub fn new(stop_time: SimTime) -> Self {
        Self {
            events: EventList::new(),
            time: 0,
            stop_time,
            schedule_counter: 0,
            run_counter: 0,
        }
    }

    pub fn schedule(&mut self, event: Event) -> EventId {
        self.schedule_counter += 1;
        self.events.push(event)
    }
}

/// Cross-partition routing state of a parallel timeline: the foreign-name
/// map, the per-peer outbound buffers, and the async-partition membership.
pub(crate) struct ParallelRouter {
    pub foreign: HashMap<String, usize>,
    pub outbound: Vec<Vec<WireEvent>>,
    pub lookahead: SimTime,
    pub async_names: HashSet<String>,
    pub async_ids: HashSet<EntityId>,
    /// Events bound for the async partition, staged here until the owner
    /// timeline imports them (the router cannot reach the partition's queue
    /// while an entity holds the scheduler borrow).
    pub async_inbox: Vec<Event>,
}

impl ParallelRouter {
    pub fn new(world_size: usize, lookahead: SimTime) -> Self {
        Self {
            foreign: HashMap::new(),
            outbound: vec![Vec::new(); world_size],
            lookahead,
            async_names: HashSet::new(),
            async_ids: HashSet::new(),
            async_inbox: Vec::new(),
        }
    }
}

/// Parallel-mode scheduling: divert foreign-named events to the owning
/// peer's buffer (enforcing the lookahead contract), stage async-partition
/// events, and queue everything else locally. Returns `None` when the event
/// left the local queue's jurisdiction.
pub(crate) fn route_schedule(
    sched: &mut Scheduler,
    router: &mut ParallelRouter,
    event: Event,
) -> Result<Option<EventId>, SimError> {
    let foreign_peer = match &event.process.owner {
        Owner::Named(name) => router.foreign.get(name.as_str()).copied(),
        Owner::Local(_) => None,
    };
    if let Some(peer) = foreign_peer {
        let horizon = sched.time.saturating_add(router.lookahead);
        if event.time < horizon {
            return Err(SimError::LookaheadViolation {
                owner: event.process.owner.to_string(),
                event_time: event.time,
                now: sched.time,
                lookahead: router.lookahead,
            });
        }
        let wire = event.into_wire().expect("foreign events carry names");
        router.outbound[peer].push(wire);
        sched.schedule_counter += 1;
        return Ok(None);
    }

    let is_async = match &event.process.owner {
        Owner::Named(name) => router.async_names.contains(name.as_str()),
        Owner::Local(id) => router.async_ids.contains(id),
    };
    if is_async {
        router.async_inbox.push(event);
        return Ok(None);
    }

    Ok(Some(sched.schedule(event)))
}

/// Where a `Context::schedule` call lands.
pub(crate) enum Route<'a> {
    /// Straight onto the local queue (sequential timeline).
    Local,
    /// Through the parallel router (foreign buffers, async partition).
    Parallel(&'a mut ParallelRouter),
    /// Into a side buffer, re-routed by the caller after the window (async
    /// partition execution).
    Capture(&'a mut Vec<Event>),
}

/// What an entity sees of the kernel while one of its methods runs.
pub struct Context<'a> {
    pub(crate) sched: &'a mut Scheduler,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) quantum: &'a mut dyn QuantumManager,
    pub(crate) route: Route<'a>,
    pub(crate) self_id: EntityId,
}

impl<'a> Context<'a> {
    /// Current simulated time in ps.
    pub fn now(&self) -> SimTime {
        self.sched.time
    }

    /// Arena handle of the entity currently executing. Lets an entity
    /// schedule events on itself without knowing its own registration.
    pub fn self_id(&self) -> EntityId {
        self.self_id
    }

    /// Schedule an event. Returns `None` when the event was diverted to a
    /// peer buffer or the async partition, in which case no local handle
    /// exists for it.
    pub fn schedule(&mut self, event: Event) -> Result<Option<EventId>, SimError> {
        match &mut self.route {
            Route::Local => Ok(Some(self.sched.schedule(event))),
            Route::Parallel(router) => route_schedule(self.sched, &mut **router, event),
            Route::Capture(buffer) => {
                buffer.push(event);
                Ok(None)
            }
        }
    }

    /// Invalidate a pending event; it is discarded when popped. No-op on
    /// handles whose event already ran.
    pub fn remove_event(&mut self, id: EventId) {
        self.sched.events.remove(id);
    }

    /// Reschedule a pending event. The new time must not lie in the past.
    pub fn update_event_time(&mut self, id: EventId, time: SimTime) -> Result<(), SimError> {
        if time < self.sched.time {
            return Err(SimError::ReschedulePast {
                requested: time,
                now: self.sched.time,
            });
        }
        self.sched.events.update_time(id, time);
        Ok(())
    }

    /// Timestamp a pending event will execute at, if it is still pending.
    pub fn event_time(&self, id: EventId) -> Option<SimTime> {
        self.sched.events.get(id).map(|event| event.time)
    }

    /// The worker's seeded random stream. Entities must sample only through
    /// this handle to keep runs reproducible.
    pub fn rng(&mut self) -> &mut StdRng {
        self.rng
    }

    pub fn quantum(&mut self) -> &mut dyn QuantumManager {
        self.quantum
    }

    /// Request the simulation stop: the stop time collapses to `now()` and
    /// the loop exits at the next iteration boundary.
    pub fn stop(&mut self) {
        self.sched.stop_time = self.sched.time;
    }

    pub fn stop_time(&self) -> SimTime {
        self.sched.stop_time
    }
}
