//! Single-atom quantum memories and their arrays.
//!
//! A memory "waits" for nothing: coherence decay is a scheduled expiration
//! event, re-targeted on every rewrite and cancelled on reset. Excitation is
//! rate-limited by the memory's frequency and succeeds against its emission
//! efficiency, sampled from the worker's seeded random stream.

use crate::args::{f64_arg, str_arg, u64_arg};
use rand::Rng;
use serde_json::{json, Value};
use sim_timeline::{
    Call, Context, Entity, EntityRegistry, Event, EventId, Owner, Process, SimError, SimTime,
};
use tracing::{debug, warn};

const PS_PER_SECOND: f64 = 1e12;

/// Physical parameters of a memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryParams {
    /// Fidelity a fresh write starts from.
    pub fidelity: f64,
    /// Maximum excitation rate in Hz; non-positive disables rate limiting.
    pub frequency: f64,
    /// Probability an excitation emits a usable photon.
    pub efficiency: f64,
    /// Coherence time in seconds; non-positive disables expiration.
    pub coherence_time: f64,
}

impl Default for MemoryParams {
    fn default() -> Self {
        Self {
            fidelity: 0.85,
            frequency: 80e6,
            efficiency: 1.0,
            coherence_time: -1.0,
        }
    }
}

/// A single quantum memory entity.
///
/// Methods dispatched: `set_plus`, `excite` (arg: destination entity),
/// `expire`, `reset`, `update_expire_time` (arg: new time), `set_param`
/// (args: name, value).
pub struct Memory {
    name: String,
    params: MemoryParams,
    /// Array notified on expiration, when the memory belongs to one.
    array: Option<String>,
    /// Extra delay applied to emitted photons; must cover the lookahead
    /// when the destination is foreign.
    emit_delay: SimTime,
    fidelity: f64,
    next_excite_time: SimTime,
    expiration_event: Option<EventId>,
}

impl Memory {
    pub fn new(name: impl Into<String>, params: MemoryParams) -> Self {
        assert!((0.0..=1.0).contains(&params.fidelity));
        assert!((0.0..=1.0).contains(&params.efficiency));
        Self {
            name: name.into(),
            params,
            array: None,
            emit_delay: 0,
            fidelity: 0.0,
            next_excite_time: 0,
            expiration_event: None,
        }
    }

    pub fn with_array(mut self, array: impl Into<String>) -> Self {
        self.array = Some(array.into());
        self
    }

    pub fn with_emit_delay(mut self, delay: SimTime) -> Self {
        self.emit_delay = delay;
        self
    }

    pub fn fidelity(&self) -> f64 {
        self.fidelity
    }

    fn excite(&mut self, destination: &str, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if ctx.now() < self.next_excite_time {
            return Ok(());
        }
        if self.params.frequency > 0.0 {
            let period = (PS_PER_SECOND / self.params.frequency) as SimTime;
            self.next_excite_time = ctx.now() + period;
        }
        if ctx.rng().gen_range(0.0..1.0) < self.params.efficiency {
            let time = ctx.now() + self.emit_delay;
            ctx.schedule(Event::new(
                time,
                Process::new(
                    Owner::Named(destination.to_owned()),
                    "qubit",
                    vec![json!(self.name)],
                ),
            ))?;
            debug!(target: "components.memory", memory = %self.name, %destination, time, "photon emitted");
        }
        Ok(())
    }

    /// Write the |+> state: fidelity resets to the raw value and the
    /// coherence clock starts over.
    fn set_plus(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        self.fidelity = self.params.fidelity;
        if self.params.coherence_time > 0.0 {
            self.schedule_expiration(ctx)?;
        }
        Ok(())
    }

    fn schedule_expiration(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        if let Some(pending) = self.expiration_event.take() {
            ctx.remove_event(pending);
        }
        let decay_time = ctx.now() + (self.params.coherence_time * PS_PER_SECOND) as SimTime;
        self.expiration_event = ctx.schedule(Event::new(
            decay_time,
            Process::new(Owner::Local(ctx.self_id()), "expire", vec![]),
        ))?;
        Ok(())
    }

    fn expire(&mut self, ctx: &mut Context<'_>) -> Result<(), SimError> {
        debug!(target: "components.memory", memory = %self.name, time = ctx.now(), "memory expired");
        if let Some(array) = &self.array {
            ctx.schedule(Event::new(
                ctx.now(),
                Process::new(
                    Owner::Named(array.clone()),
                    "memory_expired",
                    vec![json!(self.name)],
                ),
            ))?;
        }
        self.expiration_event = None;
        self.reset(ctx);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut Context<'_>) {
        self.fidelity = 0.0;
        if let Some(pending) = self.expiration_event.take() {
            ctx.remove_event(pending);
        }
    }

    /// Move the pending expiration, scheduling one if none is pending. The
    /// new time never lies before the current time.
    fn update_expire_time(&mut self, time: SimTime, ctx: &mut Context<'_>) -> Result<(), SimError> {
        let time = time.max(ctx.now());
        match self.expiration_event {
            Some(pending) => ctx.update_event_time(pending, time),
            None => {
                self.expiration_event = ctx.schedule(Event::new(
                    time,
                    Process::new(Owner::Local(ctx.self_id()), "expire", vec![]),
                ))?;
                Ok(())
            }
        }
    }

    fn set_param(&mut self, param: &str, value: f64) {
        match param {
            "fidelity" => self.params.fidelity = value,
            "frequency" => self.params.frequency = value,
            "efficiency" => self.params.efficiency = value,
            "coherence_time" => self.params.coherence_time = value,
            other => {
                warn!(target: "components.memory", memory = %self.name, param = other, "unknown memory parameter");
            }
        }
    }
}

impl Entity for Memory {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match call.method {
            "excite" => {
                let destination = str_arg(&self.name, call.method, call.args, 0)?.to_owned();
                self.excite(&destination, ctx)
            }
            "set_plus" => self.set_plus(ctx),
            "expire" => self.expire(ctx),
            "reset" => {
                self.reset(ctx);
                Ok(())
            }
            "update_expire_time" => {
                let time = u64_arg(&self.name, call.method, call.args, 0)?;
                self.update_expire_time(time, ctx)
            }
            "set_param" => {
                let param = str_arg(&self.name, call.method, call.args, 0)?.to_owned();
                let value = f64_arg(&self.name, call.method, call.args, 1)?;
                self.set_param(&param, value);
                Ok(())
            }
            other => Err(SimError::UnknownMethod {
                name: self.name.clone(),
                method: other.to_owned(),
            }),
        }
    }
}

/// An array of memories, registered as one entity per member plus the array
/// itself. The array is the expiry sink for its members and fans parameter
/// updates out to them.
pub struct MemoryArray {
    name: String,
    members: Vec<String>,
    /// Upper-protocol callback: expiry notifications are forwarded here.
    observer: Option<String>,
}

impl MemoryArray {
    /// Register an array and its `count` members on a timeline. Member
    /// names follow the `array[i]` convention the routing tables use.
    pub fn install(
        registry: &mut dyn EntityRegistry,
        name: &str,
        count: usize,
        params: MemoryParams,
        observer: Option<String>,
    ) -> Result<Vec<String>, SimError> {
        let members: Vec<String> = (0..count).map(|i| format!("{name}[{i}]")).collect();
        for member in &members {
            registry.add_entity(Box::new(Memory::new(member.clone(), params).with_array(name)))?;
        }
        registry.add_entity(Box::new(MemoryArray {
            name: name.to_owned(),
            members: members.clone(),
            observer,
        }))?;
        Ok(members)
    }

    fn fan_out_param(
        &self,
        param: &str,
        value: &Value,
        ctx: &mut Context<'_>,
    ) -> Result<(), SimError> {
        for member in &self.members {
            ctx.schedule(Event::new(
                ctx.now(),
                Process::new(
                    Owner::Named(member.clone()),
                    "set_param",
                    vec![json!(param), value.clone()],
                ),
            ))?;
        }
        Ok(())
    }
}

impl Entity for MemoryArray {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match call.method {
            "memory_expired" => {
                let member = str_arg(&self.name, call.method, call.args, 0)?.to_owned();
                debug!(target: "components.memory", array = %self.name, %member, time = ctx.now(), "member expired");
                if let Some(observer) = &self.observer {
                    ctx.schedule(Event::new(
                        ctx.now(),
                        Process::new(
                            Owner::Named(observer.clone()),
                            "memory_expired",
                            vec![json!(member)],
                        ),
                    ))?;
                }
                Ok(())
            }
            "update_memory_params" => {
                let param = str_arg(&self.name, call.method, call.args, 0)?.to_owned();
                let value = call.args.get(1).cloned().unwrap_or(Value::Null);
                self.fan_out_param(&param, &value, ctx)
            }
            other => Err(SimError::UnknownMethod {
                name: self.name.clone(),
                method: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_timeline::{Timeline, TIME_INFINITY};
    use std::sync::{Arc, Mutex};

    type ProbeLog = Arc<Mutex<Vec<(String, SimTime, Vec<Value>)>>>;

    struct Probe {
        name: String,
        log: ProbeLog,
    }

    impl Entity for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
            self.log
                .lock()
                .unwrap()
                .push((call.method.to_owned(), ctx.now(), call.args.to_vec()));
            Ok(())
        }
    }

    fn probe(tl: &mut Timeline, name: &str) -> ProbeLog {
        let log: ProbeLog = Arc::new(Mutex::new(Vec::new()));
        tl.register(Probe {
            name: name.into(),
            log: log.clone(),
        })
        .unwrap();
        log
    }

    fn call_on(tl: &mut Timeline, time: SimTime, target: &str, method: &str, args: Vec<Value>) {
        tl.schedule(Event::new(
            time,
            Process::new(Owner::Named(target.into()), method, args),
        ));
    }

    fn coherent_params() -> MemoryParams {
        MemoryParams {
            coherence_time: 2e-9, // 2000 ps
            ..MemoryParams::default()
        }
    }

    #[test]
    fn set_plus_schedules_expiration_through_the_array() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "upper");
        MemoryArray::install(&mut tl, "mems", 2, coherent_params(), Some("upper".into()))
            .unwrap();
        call_on(&mut tl, 0, "mems[0]", "set_plus", vec![]);
        tl.init().unwrap();
        tl.run().unwrap();

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (method, time, args) = &seen[0];
        assert_eq!(method, "memory_expired");
        assert_eq!(*time, 2000);
        assert_eq!(args[0], json!("mems[0]"));
    }

    #[test]
    fn reset_cancels_the_pending_expiration() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "upper");
        MemoryArray::install(&mut tl, "mems", 1, coherent_params(), Some("upper".into()))
            .unwrap();
        call_on(&mut tl, 0, "mems[0]", "set_plus", vec![]);
        call_on(&mut tl, 1000, "mems[0]", "reset", vec![]);
        tl.init().unwrap();
        tl.run().unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn rewriting_restarts_the_coherence_clock() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "upper");
        MemoryArray::install(&mut tl, "mems", 1, coherent_params(), Some("upper".into()))
            .unwrap();
        call_on(&mut tl, 0, "mems[0]", "set_plus", vec![]);
        call_on(&mut tl, 1500, "mems[0]", "set_plus", vec![]);
        tl.init().unwrap();
        tl.run().unwrap();

        let seen = log.lock().unwrap().clone();
        // One expiration only, rescheduled to 1500 + 2000.
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 3500);
    }

    #[test]
    fn update_expire_time_moves_the_decay() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "upper");
        MemoryArray::install(&mut tl, "mems", 1, coherent_params(), Some("upper".into()))
            .unwrap();
        call_on(&mut tl, 0, "mems[0]", "set_plus", vec![]);
        call_on(&mut tl, 100, "mems[0]", "update_expire_time", vec![json!(500)]);
        tl.init().unwrap();
        tl.run().unwrap();

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 500);
    }

    #[test]
    fn excitation_is_rate_limited_by_frequency() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "detector");
        // 80 MHz -> one emission per 12_500 ps.
        tl.register(Memory::new("m", MemoryParams::default())).unwrap();
        call_on(&mut tl, 0, "m", "excite", vec![json!("detector")]);
        call_on(&mut tl, 5_000, "m", "excite", vec![json!("detector")]);
        call_on(&mut tl, 13_000, "m", "excite", vec![json!("detector")]);
        tl.init().unwrap();
        tl.run().unwrap();

        let seen = log.lock().unwrap().clone();
        let times: Vec<_> = seen.iter().map(|(m, t, _)| (m.as_str(), *t)).collect();
        assert_eq!(times, vec![("qubit", 0), ("qubit", 13_000)]);
        assert_eq!(seen[0].2[0], json!("m"));
    }

    #[test]
    fn zero_efficiency_never_emits() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "detector");
        tl.register(Memory::new(
            "m",
            MemoryParams {
                efficiency: 0.0,
                ..MemoryParams::default()
            },
        ))
        .unwrap();
        for time in [0, 20_000, 40_000] {
            call_on(&mut tl, time, "m", "excite", vec![json!("detector")]);
        }
        tl.init().unwrap();
        tl.run().unwrap();

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn param_updates_fan_out_to_members() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let log = probe(&mut tl, "detector");
        MemoryArray::install(&mut tl, "mems", 3, MemoryParams::default(), None).unwrap();
        call_on(
            &mut tl,
            0,
            "mems",
            "update_memory_params",
            vec![json!("efficiency"), json!(0.0)],
        );
        // After the fan-out lands, no member emits anymore.
        for i in 0..3 {
            call_on(&mut tl, 10, &format!("mems[{i}]"), "excite", vec![json!("detector")]);
        }
        tl.init().unwrap();
        tl.run().unwrap();

        assert!(log.lock().unwrap().is_empty());
    }
}
