//! The single-worker timeline: registration, initialization, and the
//! pop-execute loop.

use crate::entity::{Call, Entity, EntityArena, EntityRegistry};
use crate::scheduler::{Context, Route, Scheduler};
use crate::SimError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sim_config::SimConfig;
use sim_events::{EntityId, Event, EventId, Owner, SimTime, TIME_INFINITY};
use sim_quantum::{LocalQuantumManager, QuantumError, QuantumManager, RemoteQuantumManager};
use std::time::Instant;
use tracing::{error, info};

/// Drives one worker's entities through their events in timestamp order.
///
/// Lifecycle: construct, register entities, `init()`, `run()`, `close()`.
/// The clock only ever moves forward; a regression is a kernel or domain
/// bug and aborts the run.
pub struct Timeline {
    pub(crate) sched: Scheduler,
    pub(crate) entities: EntityArena,
    pub(crate) rng: StdRng,
    pub(crate) quantum: Box<dyn QuantumManager>,
    pub(crate) show_progress: bool,
    closed: bool,
}

impl Timeline {
    /// A timeline with an in-process quantum manager in the default (ket)
    /// formalism.
    pub fn new(stop_time: SimTime) -> Self {
        Self::with_quantum_manager(stop_time, Box::new(LocalQuantumManager::default()))
    }

    pub fn with_quantum_manager(stop_time: SimTime, quantum: Box<dyn QuantumManager>) -> Self {
        Self {
            sched: Scheduler::new(stop_time),
            entities: EntityArena::default(),
            rng: StdRng::seed_from_u64(0),
            quantum,
            show_progress: false,
            closed: false,
        }
    }

    /// Build from a validated configuration, connecting the remote quantum
    /// manager client when an endpoint is configured. An unreachable
    /// endpoint fails here, before anything runs.
    pub fn from_config(config: &SimConfig) -> Result<Self, QuantumError> {
        let mut timeline =
            Self::with_quantum_manager(config.stop_time, build_quantum_manager(config)?);
        timeline.seed(config.seed);
        timeline.show_progress = config.show_progress;
        Ok(timeline)
    }

    /// Current simulated time in ps.
    pub fn now(&self) -> SimTime {
        self.sched.time
    }

    pub fn stop_time(&self) -> SimTime {
        self.sched.stop_time
    }

    pub fn set_stop_time(&mut self, stop_time: SimTime) {
        self.sched.stop_time = stop_time;
    }

    pub fn set_show_progress(&mut self, show: bool) {
        self.show_progress = show;
    }

    /// Reseed the worker's random stream. For reproducible parallel runs
    /// every worker must be seeded from a known sequence.
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn register(&mut self, entity: impl Entity + 'static) -> Result<EntityId, SimError> {
        self.entities.register(Box::new(entity))
    }

    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.entities.id_of(name)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Insert an event into the queue.
    pub fn schedule(&mut self, event: Event) -> EventId {
        assert!(!self.closed, "schedule on a torn-down timeline");
        self.sched.schedule(event)
    }

    pub fn remove_event(&mut self, id: EventId) {
        self.sched.events.remove(id);
    }

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

    pub fn pending_events(&self) -> usize {
        self.sched.events.len()
    }

    pub fn schedule_counter(&self) -> u64 {
        self.sched.schedule_counter
    }

    pub fn run_counter(&self) -> u64 {
        self.sched.run_counter
    }

    pub fn quantum_manager(&self) -> &dyn QuantumManager {
        &*self.quantum
    }

    /// Run each entity's `init` hook once, in registration order. Hooks may
    /// schedule the first events.
    pub fn init(&mut self) -> Result<(), SimError> {
        info!(target: "timeline", entities = self.entities.len(), "initializing entities");
        for id in self.entities.ids() {
            init_entity(
                &mut self.entities,
                id,
                &mut self.sched,
                &mut self.rng,
                &mut *self.quantum,
                Route::Local,
            )?;
        }
        Ok(())
    }

    /// The main loop: pop and execute until the queue drains or the stop
    /// time is reached. An event at or past the stop time is pushed back,
    /// not executed.
    pub fn run(&mut self) -> Result<(), SimError> {
        info!(target: "timeline", stop_time = self.sched.stop_time, "timeline start");
        let tick = Instant::now();
        let mut progress = ProgressLog::new(self.show_progress, self.sched.stop_time);
        loop {
            let Some((_, event)) = self.sched.events.pop() else {
                break;
            };
            if event.time >= self.sched.stop_time {
                self.sched.schedule(event);
                break;
            }
            if !event.is_valid() {
                continue;
            }
            if event.time < self.sched.time {
                return Err(SimError::TimeRegression {
                    now: self.sched.time,
                    event_time: event.time,
                    owner: event.process.owner.to_string(),
                });
            }
            self.sched.time = event.time;
            progress.advance(event.time);
            dispatch_event(
                &mut self.entities,
                &mut self.sched,
                &mut self.rng,
                &mut *self.quantum,
                Route::Local,
                &event,
            )?;
            self.sched.run_counter += 1;
        }
        info!(
            target: "timeline",
            elapsed_us = tick.elapsed().as_micros() as u64,
            scheduled = self.sched.schedule_counter,
            executed = self.sched.run_counter,
            final_time = self.sched.time,
            "timeline end"
        );
        Ok(())
    }

    /// Stop at the current time; the loop exits at the next pop.
    pub fn stop(&mut self) {
        info!(target: "timeline", time = self.sched.time, "timeline stopped");
        self.sched.stop_time = self.sched.time;
    }

    /// Teardown: disconnect the quantum manager. Idempotent.
    pub fn close(&mut self) -> Result<(), QuantumError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.quantum.disconnect_from_server()
    }
}

impl EntityRegistry for Timeline {
    fn add_entity(&mut self, entity: Box<dyn Entity>) -> Result<EntityId, SimError> {
        self.entities.register(entity)
    }

    fn lookup_entity(&self, name: &str) -> Option<EntityId> {
        self.entities.id_of(name)
    }
}

pub(crate) fn build_quantum_manager(
    config: &SimConfig,
) -> Result<Box<dyn QuantumManager>, QuantumError> {
    match config.qm_endpoint() {
        Some((ip, port)) => Ok(Box::new(RemoteQuantumManager::connect(
            config.formalism,
            ip,
            port,
        )?)),
        None => Ok(Box::new(LocalQuantumManager::new(config.formalism))),
    }
}

pub(crate) fn init_entity(
    entities: &mut EntityArena,
    id: EntityId,
    sched: &mut Scheduler,
    rng: &mut StdRng,
    quantum: &mut dyn QuantumManager,
    route: Route<'_>,
) -> Result<(), SimError> {
    let entity = entities
        .get_mut(id)
        .ok_or_else(|| SimError::UnknownEntity(id.to_string()))?;
    let mut ctx = Context {
        sched,
        rng,
        quantum,
        route,
        self_id: id,
    };
    entity.init(&mut ctx)
}

/// Resolve an event's owner and invoke the target entity. Shared by every
/// loop variant; the route decides where nested schedules land.
pub(crate) fn dispatch_event(
    entities: &mut EntityArena,
    sched: &mut Scheduler,
    rng: &mut StdRng,
    quantum: &mut dyn QuantumManager,
    route: Route<'_>,
    event: &Event,
) -> Result<(), SimError> {
    let id = match &event.process.owner {
        Owner::Local(id) => *id,
        Owner::Named(name) => entities
            .id_of(name)
            .ok_or_else(|| SimError::UnknownEntity(name.clone()))?,
    };
    let entity = entities
        .get_mut(id)
        .ok_or_else(|| SimError::UnknownEntity(event.process.owner.to_string()))?;
    let call = Call {
        method: &event.process.method,
        args: &event.process.args,
    };
    let event_time = event.time;
    let mut ctx = Context {
        sched,
        rng,
        quantum,
        route,
        self_id: id,
    };
    if let Err(err) = entity.handle(&call, &mut ctx) {
        error!(
            target: "timeline",
            time = event_time,
            owner = %event.process.owner,
            method = %event.process.method,
            %err,
            "entity handler failed"
        );
        return Err(err);
    }
    Ok(())
}

/// Periodic progress records replacing a terminal progress bar. Only active
/// for finite stop times.
struct ProgressLog {
    next: SimTime,
    step: SimTime,
    stop_time: SimTime,
}

impl ProgressLog {
    fn new(enabled: bool, stop_time: SimTime) -> Self {
        let step = if enabled && stop_time != TIME_INFINITY {
            (stop_time / 20).max(1)
        } else {
            TIME_INFINITY
        };
        Self {
            next: step,
            step,
            stop_time,
        }
    }

    fn advance(&mut self, time: SimTime) {
        if time < self.next {
            return;
        }
        let percent = (time as f64 / self.stop_time as f64 * 100.0).min(100.0);
        info!(target: "timeline.progress", time, percent = percent as u32, "progress");
        while self.next <= time {
            self.next = self.next.saturating_add(self.step);
        }
    }
}
