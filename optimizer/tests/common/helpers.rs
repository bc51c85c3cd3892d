//! Test helper utilities for optimizer integration tests

use async_trait::async_trait;
use optimizer::config::PoolConfig;
use optimizer::services::JsonAllocationEncoder;
use optimizer::{AllocationState, GraphModel, OptimizerError, OptimizerResult, PoolScorer, WorkerLauncher, WorkerLink, WorkerPool};
use shared::{AllocationSnapshot, EvaluationPair, NodeId, OptionId, ScoreDeltas, WorkerRequest, WorkerResponse};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::TestFixtures;

/// Launches in-memory workers that price builds from a value table
#[derive(Clone)]
pub struct ValueLauncher {
    node_values: Arc<BTreeMap<NodeId, f64>>,
    option_values: Arc<BTreeMap<OptionId, f64>>,
    exit_after: Option<usize>,
    launches: Arc<AtomicUsize>,
}

impl ValueLauncher {
    pub fn new() -> Self {
        Self {
            node_values: Arc::new(TestFixtures::node_values()),
            option_values: Arc::new(TestFixtures::option_values()),
            exit_after: None,
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every worker exits after answering this many calls
    pub fn with_exit_after(mut self, calls: usize) -> Self {
        self.exit_after = Some(calls);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for ValueLauncher {
    async fn launch(&self, slot: usize) -> OptimizerResult<Box<dyn WorkerLink>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut pending = VecDeque::new();
        pending.push_back(WorkerResponse::Ready { worker_id: slot as u32 });
        Ok(Box::new(ValueLink {
            slot,
            launcher: self.clone(),
            alive: true,
            answered: 0,
            pending,
        }))
    }
}

/// Throughput delta is the table value of the candidate minus the baseline's
struct ValueLink {
    slot: usize,
    launcher: ValueLauncher,
    alive: bool,
    answered: usize,
    pending: VecDeque<WorkerResponse>,
}

impl ValueLink {
    fn value(&self, bytes: &[u8]) -> Option<f64> {
        let build = AllocationSnapshot::from_json_bytes(bytes).ok()?;
        let nodes: f64 = build
            .nodes
            .iter()
            .chain(build.satellites.values().flatten())
            .filter_map(|node| self.launcher.node_values.get(node))
            .sum();
        let options: f64 = build
            .choices
            .values()
            .filter_map(|option| self.launcher.option_values.get(option))
            .sum();
        Some(nodes + options)
    }

    fn answer(&mut self, sequence: u64, pair: &EvaluationPair) -> WorkerResponse {
        match (self.value(&pair.baseline), self.value(&pair.candidate)) {
            (Some(baseline), Some(candidate)) => WorkerResponse::Scored {
                sequence,
                deltas: ScoreDeltas::new(candidate - baseline, 0.0, 0.0),
            },
            _ => WorkerResponse::Failed {
                sequence,
                message: "undecodable build".to_string(),
            },
        }
    }
}

#[async_trait]
impl WorkerLink for ValueLink {
    fn pid(&self) -> Option<u32> {
        Some(20_000 + self.slot as u32)
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn send(&mut self, request: &WorkerRequest) -> OptimizerResult<()> {
        if !self.alive {
            return Err(OptimizerError::WorkerDied {
                slot: self.slot,
                message: "broken pipe".to_string(),
            });
        }
        match request {
            WorkerRequest::Evaluate { sequence, pair } => {
                let response = self.answer(*sequence, pair);
                self.pending.push_back(response);
                self.answered += 1;
                if self.launcher.exit_after == Some(self.answered) {
                    self.alive = false;
                }
            }
            WorkerRequest::Ping { sequence } => self.pending.push_back(WorkerResponse::Pong { sequence: *sequence }),
            WorkerRequest::Exit => self.alive = false,
        }
        Ok(())
    }

    async fn recv(&mut self) -> OptimizerResult<WorkerResponse> {
        match self.pending.pop_front() {
            Some(response) => Ok(response),
            None if self.alive => std::future::pending().await,
            None => Err(OptimizerError::WorkerDied {
                slot: self.slot,
                message: "output stream closed".to_string(),
            }),
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> OptimizerResult<()> {
        self.alive = false;
        Ok(())
    }
}

/// Builder for started pools over [`ValueLauncher`]
pub struct PoolBuilder {
    launcher: ValueLauncher,
    config: PoolConfig,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            launcher: ValueLauncher::new(),
            config: TestFixtures::config(3).pool,
        }
    }

    pub fn with_workers(mut self, size: usize) -> Self {
        self.config.size = size;
        self
    }

    pub fn with_exit_after(mut self, calls: usize) -> Self {
        self.launcher = self.launcher.with_exit_after(calls);
        self
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Start every worker and hand back the pool with its launcher
    pub async fn build(self) -> (Arc<WorkerPool<ValueLauncher>>, ValueLauncher) {
        let size = self.config.size;
        let mut pool = WorkerPool::new(self.launcher.clone(), self.config);
        assert_eq!(pool.start(size).await, size, "all fake workers should start");
        (Arc::new(pool), self.launcher)
    }
}

pub type TestScorer = PoolScorer<ValueLauncher, JsonAllocationEncoder>;

/// Common test helper functions
pub struct TestHelpers;

impl TestHelpers {
    pub fn scorer(pool: &Arc<WorkerPool<ValueLauncher>>) -> TestScorer {
        PoolScorer::new(Arc::clone(pool), JsonAllocationEncoder)
    }

    pub fn state(graph: &GraphModel, nodes: &[NodeId]) -> AllocationState {
        AllocationState::from_nodes(graph, nodes.iter().copied(), BTreeMap::new()).unwrap()
    }

    /// Table value of an allocation, the fitness a search should report for it
    pub fn value(state: &AllocationState) -> f64 {
        let nodes = TestFixtures::node_values();
        let options = TestFixtures::option_values();
        let node_sum: f64 = state
            .nodes()
            .iter()
            .chain(state.satellites().values().flatten())
            .filter_map(|node| nodes.get(node))
            .sum();
        let option_sum: f64 = state.choices().values().filter_map(|option| options.get(option)).sum();
        node_sum + option_sum
    }
}
