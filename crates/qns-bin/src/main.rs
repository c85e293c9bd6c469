//! qnsim entrypoint: runs a linear relay chain partitioned across a worker
//! group and writes one performance report per worker.

use anyhow::{ensure, Context as _, Result};
use clap::Parser;
use serde_json::json;
use sim_components::Relay;
use sim_config::SimConfig;
use sim_timeline::{Event, Owner, ParallelTimeline, Process, SimTime};
use sim_transport::{WorkerGroup, WorkerLinks};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Instant;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// Used when neither the config file nor the CLI provides a lookahead.
const DEFAULT_LOOKAHEAD: SimTime = 1_000;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "qns", version, about = "Parallel quantum-network simulation kernel demo")]
struct Args {
    /// Optional configuration file path (overrides discovery of `qnsim.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Number of workers in the group.
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Number of relays in the demo chain.
    #[arg(long, default_value_t = 8)]
    chain: usize,
    /// Stop time override in ps.
    #[arg(long)]
    stop_time: Option<u64>,
    /// Lookahead override in ps.
    #[arg(long)]
    lookahead: Option<u64>,
    /// Directory the per-worker `perf_<rank>.json` reports land in.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

struct WorkerSummary {
    rank: usize,
    final_time: SimTime,
    executed: u64,
}

fn configure_logging() -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(".", "qns.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .try_init()
    {
        Ok(()) => Some(guard),
        // Global subscriber already installed; drop the guard so the writer
        // shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!(target: "runtime.panic", ?panic_info, "panic");
            default_panic(panic_info);
        }));
    });
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging();
    install_panic_hook();

    ensure!(args.workers >= 1, "need at least one worker");
    ensure!(args.chain >= 1, "need at least one relay in the chain");

    let mut config = sim_config::load_from(args.config.clone())?;
    if let Some(stop_time) = args.stop_time {
        config.stop_time = stop_time;
    }
    if let Some(lookahead) = args.lookahead {
        config.lookahead = lookahead;
    }
    if config.lookahead == 0 {
        info!(target: "qns", lookahead = DEFAULT_LOOKAHEAD, "lookahead unset, using default");
        config.lookahead = DEFAULT_LOOKAHEAD;
    }
    config.validate_parallel()?;
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    info!(
        target: "qns",
        workers = args.workers,
        chain = args.chain,
        lookahead = config.lookahead,
        stop_time = config.stop_time,
        "starting demo chain"
    );
    let total_tick = Instant::now();
    let results = WorkerGroup::launch(args.workers, |links| {
        run_worker(links, &config, args.chain, &args.out_dir)
    });

    let mut total_executed = 0;
    let mut final_time = 0;
    for result in results {
        let summary = result?;
        total_executed += summary.executed;
        final_time = final_time.max(summary.final_time);
        info!(
            target: "qns",
            rank = summary.rank,
            executed = summary.executed,
            final_time = summary.final_time,
            "worker finished"
        );
    }
    println!(
        "{} workers executed {} events to t={} ps in {:.3} s",
        args.workers,
        total_executed,
        final_time,
        total_tick.elapsed().as_secs_f64()
    );
    Ok(())
}

/// One worker: build its slice of the relay chain, run, report.
fn run_worker(
    links: WorkerLinks,
    config: &SimConfig,
    chain: usize,
    out_dir: &Path,
) -> Result<WorkerSummary> {
    let rank = links.rank;
    let world_size = links.world_size;
    let prepare_tick = Instant::now();
    let mut tl = ParallelTimeline::from_config(config, links)?;

    // Relays are dealt round-robin; everyone else's relays become foreign
    // routing entries.
    for i in 0..chain {
        let name = format!("relay_{i}");
        let owner = i % world_size;
        if owner == rank {
            let next = if i + 1 < chain {
                Some(format!("relay_{}", i + 1))
            } else {
                None
            };
            tl.register(Relay::new(name, next, config.lookahead))?;
        } else {
            tl.add_foreign_entity(name, owner);
        }
    }
    if rank == 0 {
        tl.schedule(Event::new(
            0,
            Process::new(Owner::Named("relay_0".to_owned()), "ping", vec![json!(0)]),
        ))?;
    }
    tl.init()?;
    let prepare_time = prepare_tick.elapsed();

    let run_tick = Instant::now();
    tl.run()?;
    let execution_time = run_tick.elapsed();
    tl.close()?;

    let stats = tl.stats();
    let communication_time =
        stats.communication_time1 + stats.communication_time2 + stats.communication_time3;
    let report = json!({
        "rank": rank,
        "prepare_time": prepare_time.as_secs_f64(),
        "execution_time": execution_time.as_secs_f64(),
        "computing_time": stats.computing_time.as_secs_f64(),
        "communication_time": communication_time.as_secs_f64(),
        "communication_time1": stats.communication_time1.as_secs_f64(),
        "communication_time2": stats.communication_time2.as_secs_f64(),
        "communication_time3": stats.communication_time3.as_secs_f64(),
        "io_time": stats.quantum_io_time.as_secs_f64(),
        "sync_time": execution_time
            .saturating_sub(stats.computing_time)
            .saturating_sub(communication_time)
            .as_secs_f64(),
        "sync_counter": stats.sync_counter,
        "event_counter": stats.event_counter,
        "schedule_counter": stats.schedule_counter,
        "exchange_counter": stats.exchange_counter,
        "run_counter": stats.run_counter,
        "final_time": tl.now(),
    });
    let path = out_dir.join(format!("perf_{rank}.json"));
    let file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &report)?;

    Ok(WorkerSummary {
        rank,
        final_time: tl.now(),
        executed: stats.run_counter,
    })
}
