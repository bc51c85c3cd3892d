//! Main entry point for the optimizer binary
//!
//! Loads the tree and the starting allocation, starts the evaluator pool, runs
//! one search strategy and writes a JSON report.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

use optimizer::cluster::{attach, ClusterPlan, ClusterSubgraph, ClusterSubgraphSolver, OracleValuer};
use optimizer::services::{JsonAllocationEncoder, PoolScorer, ProcessLauncher, WorkerPool};
use optimizer::{AllocationState, GeneticSearch, GraphModel, GreedySearch, OptimizerConfig};
use shared::{logging, process_info, process_warn, AllocationSnapshot, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Greedy,
    Genetic,
}

/// Skill-tree allocation optimizer
#[derive(Parser)]
#[command(name = "optimizer")]
#[command(about = "Searches point allocations over a skill tree, scored by evaluator worker processes")]
pub struct Args {
    /// Tree definition (JSON)
    #[arg(long)]
    pub tree: PathBuf,

    /// Starting allocation (JSON snapshot); defaults to the root alone
    #[arg(long)]
    pub start: Option<PathBuf>,

    /// Allocation every candidate is compared against; defaults to the start
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Optimizer configuration (JSON); missing fields keep their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "greedy")]
    strategy: Strategy,

    /// Number of worker processes (overrides the configuration)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Worker executable; defaults to `worker` next to this binary
    #[arg(long)]
    pub worker_bin: Option<PathBuf>,

    /// Weight table handed to every worker
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Satellite cluster definitions (JSON array) to fill after the search
    #[arg(long)]
    pub clusters: Option<PathBuf>,

    /// RNG seed for the genetic search (overrides the configuration)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Route worker stderr through this process's logging
    #[arg(long)]
    pub forward_worker_logs: bool,

    /// Report file; stdout when absent
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ProcessId::init_optimizer();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "skill-tree optimizer");

    let mut config = match &args.config {
        Some(path) => OptimizerConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => OptimizerConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.pool.size = workers;
    }
    if args.seed.is_some() {
        config.genetic.seed = args.seed;
    }
    config.validate()?;

    let graph = GraphModel::load(&args.tree).with_context(|| format!("loading tree {}", args.tree.display()))?;
    let start = match &args.start {
        Some(path) => load_allocation(&graph, path)?,
        None => AllocationState::rooted(&graph),
    };
    let baseline = match &args.baseline {
        Some(path) => load_allocation(&graph, path)?,
        None => start.clone(),
    };
    process_info!(
        ProcessId::current(),
        "🌳 Tree with {} nodes, start allocation costs {} of {} points",
        graph.len(),
        start.point_cost(),
        config.budget.max_points
    );

    let worker_bin = match &args.worker_bin {
        Some(path) => path.clone(),
        None => std::env::current_exe()?.with_file_name("worker"),
    };
    let mut worker_args = Vec::new();
    if let Some(weights) = &args.weights {
        worker_args.push("--weights".to_string());
        worker_args.push(weights.display().to_string());
    }
    let launcher = ProcessLauncher::new(worker_bin)
        .with_args(worker_args)
        .with_log_level(args.log_level.clone())
        .with_forward_logs(args.forward_worker_logs);

    let mut pool = WorkerPool::new(launcher, config.pool.clone());
    let started = pool.start(config.pool.size).await;
    if started == 0 {
        bail!("no evaluator worker could be started");
    }
    logging::log_success(
        ProcessId::current(),
        &format!("{} of {} workers ready", started, config.pool.size),
    );

    let pool = Arc::new(pool);
    let scorer = PoolScorer::new(Arc::clone(&pool), JsonAllocationEncoder);

    let result = tokio::select! {
        result = optimize(&args, &config, &graph, &scorer, &start, &baseline) => result,
        interrupted = signal::ctrl_c() => {
            match interrupted {
                Ok(()) => logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal"),
                Err(err) => logging::log_error(ProcessId::current(), "Signal handling", &err),
            }
            pool.shutdown().await;
            return Ok(());
        }
    };

    let report = match result {
        Ok(mut report) => {
            report["workers"] = json!(pool.snapshot());
            report
        }
        Err(e) => {
            pool.shutdown().await;
            return Err(e);
        }
    };
    pool.shutdown().await;

    let text = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            logging::log_success(ProcessId::current(), &format!("Report written to {}", path.display()));
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn load_allocation(graph: &GraphModel, path: &Path) -> anyhow::Result<AllocationState> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let snapshot = AllocationSnapshot::from_json_bytes(&bytes)?;
    Ok(AllocationState::from_snapshot(graph, &snapshot)?)
}

/// Run the chosen strategy, then fill any clusters, and describe the result
async fn optimize<S>(
    args: &Args,
    config: &OptimizerConfig,
    graph: &GraphModel,
    scorer: &S,
    start: &AllocationState,
    baseline: &AllocationState,
) -> anyhow::Result<serde_json::Value>
where
    S: optimizer::BatchScorer,
{
    let (state, fitness, details) = match args.strategy {
        Strategy::Greedy => {
            let search = GreedySearch::new(
                graph,
                scorer,
                config.greedy.clone(),
                config.budget.clone(),
                config.objective.clone(),
            );
            let outcome = search.run(start.clone(), baseline).await?;
            let details = json!({
                "iterations": outcome.iterations,
                "stop_reason": outcome.stop_reason,
                "trace": outcome.trace,
            });
            (outcome.state, outcome.fitness, details)
        }
        Strategy::Genetic => {
            let search = GeneticSearch::new(
                graph,
                scorer,
                config.genetic.clone(),
                config.budget.clone(),
                config.objective.clone(),
            );
            let outcome = search.run(start.clone(), baseline).await?;
            let details = json!({
                "generations": outcome.generations,
                "stop_reason": outcome.stop_reason,
                "history": outcome.history,
            });
            (outcome.best.state, outcome.best.fitness, details)
        }
    };

    let mut state = state;
    let mut plans: Vec<ClusterPlan> = Vec::new();
    if let Some(path) = &args.clusters {
        let clusters = ClusterSubgraph::load_all(path).with_context(|| format!("loading {}", path.display()))?;
        for cluster in &clusters {
            if !state.contains(cluster.socket()) {
                process_warn!(
                    ProcessId::current(),
                    "⚠️ Skipping cluster at socket {}: socket not allocated",
                    cluster.socket()
                );
                continue;
            }
            let host = state.without_satellite(cluster.socket());
            let remaining = config.budget.max_points.saturating_sub(host.point_cost());
            let valuer = OracleValuer::new(graph, scorer, &config.objective, &host, baseline);
            let solver = ClusterSubgraphSolver::new(&valuer, config.cluster.clone());
            let plan = solver.optimize_allocation(cluster, remaining).await?;
            state = attach(graph, &host, &plan)?;
            plans.push(plan);
        }
    }

    Ok(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "strategy": args.strategy.to_possible_value().map(|value| value.get_name().to_string()),
        "fitness": fitness,
        "point_cost": state.point_cost(),
        "budget": config.budget.max_points,
        "allocation": state.snapshot(),
        "changes": start.diff(&state),
        "search": details,
        "clusters": plans,
    }))
}
