//! Worker binary entry point

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use shared::{logging, ProcessId};
use worker::{serve, ServeEnd, ServeOptions, WeightTableOracle};

/// Exit status of a simulated crash
const CRASH_EXIT_CODE: i32 = 3;

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Evaluator worker scoring candidate builds over stdio")]
struct Args {
    /// Pool slot this worker serves
    #[arg(long, default_value = "0")]
    id: u32,

    /// Weight table (JSON); every node is worth one throughput point without it
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Exit after answering this many evaluations
    #[arg(long)]
    exit_after: Option<usize>,

    /// Probability of crashing instead of answering an evaluation
    #[arg(long, default_value = "0")]
    crash_rate: f64,

    /// Delay before announcing readiness
    #[arg(long, default_value = "0")]
    startup_delay_ms: u64,

    /// Seed for the crash simulation
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ProcessId::init_worker(args.id);
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), &format!("evaluator worker {}", args.id));

    let oracle = match &args.weights {
        Some(path) => WeightTableOracle::load(path)?,
        None => WeightTableOracle::default(),
    };

    if args.startup_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.startup_delay_ms)).await;
    }

    let options = ServeOptions {
        worker_id: args.id,
        exit_after: args.exit_after,
        crash_rate: args.crash_rate,
        seed: args.seed,
    };
    let end = serve(tokio::io::stdin(), tokio::io::stdout(), &oracle, options).await?;

    logging::log_shutdown(ProcessId::current(), &format!("{end:?}"));
    if end == ServeEnd::Crashed {
        std::process::exit(CRASH_EXIT_CODE);
    }
    Ok(())
}
