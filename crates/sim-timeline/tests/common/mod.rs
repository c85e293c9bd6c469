//! Shared test entities and quantum-manager fakes.
#![allow(dead_code)] // each test binary uses its own subset

use sim_quantum::{Formalism, QuantumError, QuantumManager, StateOp};
use sim_timeline::{Call, Context, Entity, Event, Owner, Process, SimError, SimTime};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type ExecutionLog = Arc<Mutex<Vec<(String, SimTime)>>>;

pub fn new_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &ExecutionLog) -> Vec<(String, SimTime)> {
    log.lock().unwrap().clone()
}

/// Records every invocation it receives as `(method, now)`.
pub struct Recorder {
    name: String,
    log: ExecutionLog,
}

impl Recorder {
    pub fn new(name: impl Into<String>, log: ExecutionLog) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

impl Entity for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.log
            .lock()
            .unwrap()
            .push((call.method.to_owned(), ctx.now()));
        Ok(())
    }
}

/// On `kick`, schedules `method` on a named target at an absolute time.
/// Lets tests provoke cross-partition schedules from inside a handler.
pub struct CrossSender {
    name: String,
    target: String,
    fire_at: SimTime,
}

impl CrossSender {
    pub fn new(name: impl Into<String>, target: impl Into<String>, fire_at: SimTime) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            fire_at,
        }
    }
}

impl Entity for CrossSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
        assert_eq!(call.method, "kick");
        ctx.schedule(Event::new(
            self.fire_at,
            Process::new(Owner::Named(self.target.clone()), "f", vec![]),
        ))?;
        Ok(())
    }
}

/// Ping-pong hop: every `ping` is forwarded to the peer exactly one delay
/// later, until `last_time` is reached.
pub struct Bouncer {
    name: String,
    peer: String,
    delay: SimTime,
    last_time: SimTime,
    log: ExecutionLog,
}

impl Bouncer {
    pub fn new(
        name: impl Into<String>,
        peer: impl Into<String>,
        delay: SimTime,
        last_time: SimTime,
        log: ExecutionLog,
    ) -> Self {
        Self {
            name: name.into(),
            peer: peer.into(),
            delay,
            last_time,
            log,
        }
    }
}

impl Entity for Bouncer {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
        assert_eq!(call.method, "ping");
        self.log
            .lock()
            .unwrap()
            .push((self.name.clone(), ctx.now()));
        let next = ctx.now() + self.delay;
        if next <= self.last_time {
            ctx.schedule(Event::new(
                next,
                Process::new(Owner::Named(self.peer.clone()), "ping", vec![]),
            ))?;
        }
        Ok(())
    }
}

/// Counts barrier flushes and teardown disconnects through shared atomics.
pub struct CountingManager {
    pub flushes: Arc<AtomicU64>,
    pub disconnects: Arc<AtomicU64>,
}

impl CountingManager {
    pub fn new() -> (Self, Arc<AtomicU64>, Arc<AtomicU64>) {
        let flushes = Arc::new(AtomicU64::new(0));
        let disconnects = Arc::new(AtomicU64::new(0));
        (
            Self {
                flushes: flushes.clone(),
                disconnects: disconnects.clone(),
            },
            flushes,
            disconnects,
        )
    }
}

impl QuantumManager for CountingManager {
    fn formalism(&self) -> Formalism {
        Formalism::Ket
    }

    fn flush_message_buffer(&mut self) -> Result<(), QuantumError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect_from_server(&mut self) -> Result<(), QuantumError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enqueue(&mut self, _op: StateOp) {}
}
