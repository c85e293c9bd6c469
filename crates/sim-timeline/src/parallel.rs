//! The conservative parallel timeline.
//!
//! One instance runs per worker. Each iteration of `run` is one window of
//! the synchronization protocol: exchange outbound event buffers all-to-all,
//! absorb arrivals, reduce the global minimum pending timestamp, then
//! execute local events strictly below `min_time + lookahead`. The window
//! bound is safe because no worker may schedule a cross-partition event
//! closer than its lookahead, so nothing earlier than the bound can still
//! arrive. Every window ends by flushing the quantum manager's batched
//! operations; that flush is a mandatory synchronization point.

use crate::entity::{Entity, EntityArena, EntityRegistry};
use crate::scheduler::{route_schedule, ParallelRouter, Route, Scheduler};
use crate::timeline::{build_quantum_manager, dispatch_event, init_entity, Timeline};
use crate::wire;
use crate::SimError;
use rand::rngs::StdRng;
use sim_config::SimConfig;
use sim_events::{EntityId, Event, EventId, SimTime, TIME_INFINITY};
use sim_quantum::{QuantumError, QuantumManager};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Synchronization and accounting counters for the performance report.
#[derive(Debug, Clone, Copy)]
pub struct SyncStats {
    /// Windows that actually opened (termination checks that passed).
    pub sync_counter: u64,
    /// Events received from peers during absorb phases.
    pub exchange_counter: u64,
    /// Events popped inside execute windows, valid or not.
    pub event_counter: u64,
    pub schedule_counter: u64,
    /// Events executed, async partition included.
    pub run_counter: u64,
    pub computing_time: Duration,
    /// Portion of the compute phase spent in the async partition.
    pub async_computing_time: Duration,
    /// All-to-all event exchange.
    pub communication_time1: Duration,
    /// Global clock reduction.
    pub communication_time2: Duration,
    /// Barrier flush of the quantum manager.
    pub communication_time3: Duration,
    pub quantum_io_time: Duration,
}

/// Distributed timeline for one rank of a fixed worker group.
pub struct ParallelTimeline {
    tl: Timeline,
    rank: usize,
    world_size: usize,
    lookahead: SimTime,
    router: ParallelRouter,
    events_comm: sim_transport::Collective<Vec<u8>>,
    clock_comm: sim_transport::Collective<u64>,
    async_part: AsyncPartition,
    sync_counter: u64,
    exchange_counter: u64,
    event_counter: u64,
    computing_time: Duration,
    communication_time1: Duration,
    communication_time2: Duration,
    communication_time3: Duration,
}

impl ParallelTimeline {
    /// Build from a validated configuration and this worker's mesh
    /// endpoints. Fails before running on a zero lookahead or an
    /// unreachable quantum-manager endpoint.
    pub fn from_config(
        config: &SimConfig,
        links: sim_transport::WorkerLinks,
    ) -> Result<Self, SimError> {
        config.validate_parallel()?;
        let quantum = build_quantum_manager(config)?;
        Self::with_quantum_manager(config, links, quantum)
    }

    pub fn with_quantum_manager(
        config: &SimConfig,
        links: sim_transport::WorkerLinks,
        quantum: Box<dyn QuantumManager>,
    ) -> Result<Self, SimError> {
        config.validate_parallel()?;
        let sim_transport::WorkerLinks {
            rank,
            world_size,
            events,
            clocks,
        } = links;
        let mut tl = Timeline::with_quantum_manager(config.stop_time, quantum);
        // Each worker draws from its own stream of the seed sequence.
        tl.seed(config.seed.wrapping_add(rank as u64));
        tl.set_show_progress(config.show_progress);
        Ok(Self {
            tl,
            rank,
            world_size,
            lookahead: config.lookahead,
            router: ParallelRouter::new(world_size, config.lookahead),
            events_comm: events,
            clock_comm: clocks,
            async_part: AsyncPartition::new(config.lookahead),
            sync_counter: 0,
            exchange_counter: 0,
            event_counter: 0,
            computing_time: Duration::ZERO,
            communication_time1: Duration::ZERO,
            communication_time2: Duration::ZERO,
            communication_time3: Duration::ZERO,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn lookahead(&self) -> SimTime {
        self.lookahead
    }

    pub fn now(&self) -> SimTime {
        self.tl.now()
    }

    pub fn stop_time(&self) -> SimTime {
        self.tl.stop_time()
    }

    pub fn seed(&mut self, seed: u64) {
        self.tl.seed(seed);
    }

    pub fn register(&mut self, entity: impl Entity + 'static) -> Result<EntityId, SimError> {
        self.tl.register(entity)
    }

    pub fn entity_id(&self, name: &str) -> Option<EntityId> {
        self.tl.entity_id(name)
    }

    /// Declare that `name` lives on worker `owner_rank`; events against it
    /// will buffer for that peer.
    pub fn add_foreign_entity(&mut self, name: impl Into<String>, owner_rank: usize) {
        assert!(owner_rank < self.world_size, "foreign owner rank out of range");
        self.router.foreign.insert(name.into(), owner_rank);
    }

    /// Opt a local entity into the async partition: it may observe events
    /// up to one lookahead late, and in exchange its queue relaxes the
    /// window bound it contributes to the clock reduction.
    pub fn move_entity_to_async(&mut self, name: &str) -> Result<(), SimError> {
        let id = self
            .tl
            .entity_id(name)
            .ok_or_else(|| SimError::UnknownEntity(name.to_owned()))?;
        self.router.async_names.insert(name.to_owned());
        self.router.async_ids.insert(id);
        Ok(())
    }

    /// Schedule with cross-partition routing. Returns `None` when the event
    /// was diverted to a peer buffer or the async partition.
    pub fn schedule(&mut self, event: Event) -> Result<Option<EventId>, SimError> {
        let id = route_schedule(&mut self.tl.sched, &mut self.router, event)?;
        self.drain_async_inbox();
        Ok(id)
    }

    pub fn remove_event(&mut self, id: EventId) {
        self.tl.remove_event(id);
    }

    pub fn update_event_time(&mut self, id: EventId, time: SimTime) -> Result<(), SimError> {
        self.tl.update_event_time(id, time)
    }

    pub fn init(&mut self) -> Result<(), SimError> {
        info!(
            target: "timeline.sync",
            rank = self.rank,
            entities = self.tl.entities.len(),
            "initializing entities"
        );
        for id in self.tl.entities.ids() {
            init_entity(
                &mut self.tl.entities,
                id,
                &mut self.tl.sched,
                &mut self.tl.rng,
                &mut *self.tl.quantum,
                Route::Parallel(&mut self.router),
            )?;
        }
        self.drain_async_inbox();
        Ok(())
    }

    /// The conservative window loop. Returns when the global minimum
    /// pending timestamp reaches the stop time, including the case where
    /// every queue in the group is empty.
    pub fn run(&mut self) -> Result<(), SimError> {
        info!(
            target: "timeline.sync",
            rank = self.rank,
            world_size = self.world_size,
            lookahead = self.lookahead,
            stop_time = self.tl.sched.stop_time,
            "parallel timeline start"
        );
        let tick = Instant::now();
        loop {
            // Exchange: ship per-peer buffers, all-to-all.
            let t = Instant::now();
            let outbound = self
                .router
                .outbound
                .iter()
                .map(|buffer| wire::encode_buffer(buffer))
                .collect::<Result<Vec<_>, _>>()?;
            for buffer in &mut self.router.outbound {
                buffer.clear();
            }
            let inbound = self.events_comm.alltoall(outbound)?;
            self.communication_time1 += t.elapsed();

            // Absorb: arrivals are local now and queue normally.
            for payload in inbound {
                for wire_event in wire::decode_buffer(&payload)? {
                    self.exchange_counter += 1;
                    self.schedule(Event::from(wire_event))?;
                }
            }

            // Reduce: agree on the earliest pending timestamp anywhere.
            let t = Instant::now();
            let local_top = self
                .tl
                .sched
                .events
                .peek_time()
                .unwrap_or(TIME_INFINITY)
                .min(self.async_part.top_time());
            let min_time = self.clock_comm.allreduce_min(local_top)?;
            self.communication_time2 += t.elapsed();

            if min_time >= self.tl.sched.stop_time {
                break;
            }
            if min_time < self.tl.sched.time {
                return Err(SimError::TimeRegression {
                    now: self.tl.sched.time,
                    event_time: min_time,
                    owner: "window reduction".to_owned(),
                });
            }
            self.sync_counter += 1;
            let sync_time = min_time
                .saturating_add(self.lookahead)
                .min(self.tl.sched.stop_time);
            self.tl.sched.time = min_time;
            debug!(
                target: "timeline.sync",
                rank = self.rank,
                min_time,
                sync_time,
                "window open"
            );

            // Execute: async partition first (its products re-route), then
            // the local queue up to the window bound.
            let t = Instant::now();
            let produced = self.async_part.run_window(
                sync_time,
                &mut self.tl.entities,
                &mut self.tl.rng,
                &mut *self.tl.quantum,
            )?;
            for event in produced {
                self.schedule(event)?;
            }
            self.execute_window(sync_time)?;
            self.computing_time += t.elapsed();

            // Barrier flush: publish batched state operations before the
            // next window; no progress until it completes.
            let t = Instant::now();
            self.tl.quantum.flush_message_buffer()?;
            self.communication_time3 += t.elapsed();
        }
        info!(
            target: "timeline.sync",
            rank = self.rank,
            elapsed_us = tick.elapsed().as_micros() as u64,
            windows = self.sync_counter,
            exchanged = self.exchange_counter,
            executed = self.tl.sched.run_counter + self.async_part.run_counter(),
            final_time = self.tl.sched.time,
            "parallel timeline end"
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.tl.stop();
    }

    /// Teardown: disconnect the quantum manager. Idempotent.
    pub fn close(&mut self) -> Result<(), QuantumError> {
        self.tl.close()
    }

    pub fn schedule_counter(&self) -> u64 {
        self.tl.sched.schedule_counter
    }

    pub fn run_counter(&self) -> u64 {
        self.tl.sched.run_counter + self.async_part.run_counter()
    }

    pub fn quantum_manager(&self) -> &dyn QuantumManager {
        self.tl.quantum_manager()
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            sync_counter: self.sync_counter,
            exchange_counter: self.exchange_counter,
            event_counter: self.event_counter,
            schedule_counter: self.tl.sched.schedule_counter,
            run_counter: self.run_counter(),
            computing_time: self.computing_time,
            async_computing_time: self.async_part.computing_time,
            communication_time1: self.communication_time1,
            communication_time2: self.communication_time2,
            communication_time3: self.communication_time3,
            quantum_io_time: self.tl.quantum.io_time(),
        }
    }

    fn execute_window(&mut self, sync_time: SimTime) -> Result<(), SimError> {
        loop {
            match self.tl.sched.events.peek_time() {
                Some(time) if time < sync_time => {}
                _ => break,
            }
            let (_, event) = self
                .tl
                .sched
                .events
                .pop()
                .expect("peeked event is poppable");
            self.event_counter += 1;
            if !event.is_valid() {
                continue;
            }
            if event.time < self.tl.sched.time {
                return Err(SimError::TimeRegression {
                    now: self.tl.sched.time,
                    event_time: event.time,
                    owner: event.process.owner.to_string(),
                });
            }
            self.tl.sched.time = event.time;
            dispatch_event(
                &mut self.tl.entities,
                &mut self.tl.sched,
                &mut self.tl.rng,
                &mut *self.tl.quantum,
                Route::Parallel(&mut self.router),
                &event,
            )?;
            self.tl.sched.run_counter += 1;
        }
        self.drain_async_inbox();
        Ok(())
    }

    fn drain_async_inbox(&mut self) {
        for event in self.router.async_inbox.drain(..) {
            self.async_part.import(event);
        }
    }
}

impl EntityRegistry for ParallelTimeline {
    fn add_entity(&mut self, entity: Box<dyn Entity>) -> Result<EntityId, SimError> {
        self.tl.add_entity(entity)
    }

    fn lookup_entity(&self, name: &str) -> Option<EntityId> {
        self.tl.entity_id(name)
    }
}

/// Event queue for entities that tolerate lookahead-delayed delivery.
///
/// Its contribution to the clock reduction is its top timestamp plus the
/// lookahead, which keeps a dense async queue from throttling the window.
/// Schedules made during its window are captured and re-routed by the
/// parallel timeline afterwards, so cross-partition routing still applies.
struct AsyncPartition {
    sched: Scheduler,
    lookahead: SimTime,
    computing_time: Duration,
}

impl AsyncPartition {
    fn new(lookahead: SimTime) -> Self {
        Self {
            sched: Scheduler::new(TIME_INFINITY),
            lookahead,
            computing_time: Duration::ZERO,
        }
    }

    fn import(&mut self, event: Event) {
        self.sched.events.push(event);
    }

    fn top_time(&mut self) -> SimTime {
        match self.sched.events.peek_time() {
            Some(time) => time.saturating_add(self.lookahead),
            None => TIME_INFINITY,
        }
    }

    fn run_counter(&self) -> u64 {
        self.sched.run_counter
    }

    fn run_window(
        &mut self,
        until: SimTime,
        entities: &mut EntityArena,
        rng: &mut StdRng,
        quantum: &mut dyn QuantumManager,
    ) -> Result<Vec<Event>, SimError> {
        let mut produced = Vec::new();
        let tick = Instant::now();
        loop {
            match self.sched.events.peek_time() {
                Some(time) if time < until => {}
                _ => break,
            }
            let (_, event) = self.sched.events.pop().expect("peeked event is poppable");
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
            dispatch_event(
                entities,
                &mut self.sched,
                rng,
                quantum,
                Route::Capture(&mut produced),
                &event,
            )?;
            self.sched.run_counter += 1;
        }
        self.computing_time += tick.elapsed();
        Ok(produced)
    }
}
