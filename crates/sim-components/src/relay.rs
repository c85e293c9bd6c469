//! A minimal forwarding entity for demo topologies: every `ping` is passed
//! to the next hop after a fixed delay. The delay must cover the timeline's
//! lookahead when the next hop lives on another worker.

use crate::args::u64_arg;
use serde_json::json;
use sim_timeline::{Call, Context, Entity, Event, Owner, Process, SimError, SimTime};
use tracing::debug;

pub struct Relay {
    name: String,
    next: Option<String>,
    delay: SimTime,
    received: u64,
}

impl Relay {
    pub fn new(name: impl Into<String>, next: Option<String>, delay: SimTime) -> Self {
        Self {
            name: name.into(),
            next,
            delay,
            received: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl Entity for Relay {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
        match call.method {
            "ping" => {
                let hop = u64_arg(&self.name, call.method, call.args, 0)?;
                self.received += 1;
                debug!(target: "components.relay", relay = %self.name, hop, time = ctx.now(), "ping");
                if let Some(next) = &self.next {
                    ctx.schedule(Event::new(
                        ctx.now() + self.delay,
                        Process::new(Owner::Named(next.clone()), "ping", vec![json!(hop + 1)]),
                    ))?;
                }
                Ok(())
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

    struct Terminus {
        name: String,
        hops: Arc<Mutex<Vec<(u64, SimTime)>>>,
    }

    impl Entity for Terminus {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&mut self, call: &Call<'_>, ctx: &mut Context<'_>) -> Result<(), SimError> {
            assert_eq!(call.method, "ping");
            let hop = call.args[0].as_u64().unwrap();
            self.hops.lock().unwrap().push((hop, ctx.now()));
            Ok(())
        }
    }

    #[test]
    fn chain_forwards_with_accumulating_delay() {
        let mut tl = Timeline::new(TIME_INFINITY);
        let hops = Arc::new(Mutex::new(Vec::new()));
        tl.register(Relay::new("r0", Some("r1".into()), 100)).unwrap();
        tl.register(Relay::new("r1", Some("end".into()), 250)).unwrap();
        tl.register(Terminus {
            name: "end".into(),
            hops: hops.clone(),
        })
        .unwrap();

        tl.schedule(Event::new(
            0,
            Process::new(Owner::Named("r0".into()), "ping", vec![json!(0)]),
        ));
        tl.init().unwrap();
        tl.run().unwrap();

        assert_eq!(hops.lock().unwrap().clone(), vec![(2, 350)]);
        assert_eq!(tl.run_counter(), 3);
    }
}
