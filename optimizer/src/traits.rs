//! Trait definitions with mockall annotations for testing
//!
//! Seams between the search code and everything that talks to worker
//! processes. Production implementations live in `services`; tests use the
//! generated mocks or hand-written fakes.

use shared::{NodeId, WorkerRequest, WorkerResponse};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::cluster::ClusterSubgraph;
use crate::core::AllocationState;
use crate::error::OptimizerResult;
use crate::services::Evaluation;

/// Starts evaluator processes for pool slots
///
/// The launcher only spawns. Waiting for the `Ready` handshake, restarts and
/// bookkeeping belong to the pool.
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Spawn a worker for `slot`
    ///
    /// # Returns
    /// A link to the new process, or `WorkerSpawnFailed`
    async fn launch(&self, slot: usize) -> OptimizerResult<Box<dyn WorkerLink>>;
}

/// Framed duplex connection to one running worker
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerLink: Send {
    /// OS process id, if the link is backed by a process
    fn pid(&self) -> Option<u32>;

    /// Whether the process is still running
    fn is_alive(&mut self) -> bool;

    /// Queue one request frame
    async fn send(&mut self, request: &WorkerRequest) -> OptimizerResult<()>;

    /// Next response frame. Cancel safe: dropping the future loses nothing.
    ///
    /// # Returns
    /// `WorkerDied` once the worker's output stream has ended
    async fn recv(&mut self) -> OptimizerResult<WorkerResponse>;

    /// Stop the process, waiting up to `grace` for it to exit on its own
    async fn terminate(&mut self, grace: Duration) -> OptimizerResult<()>;
}

/// Scores candidate allocations against a fixed baseline
#[mockall::automock]
#[async_trait::async_trait]
pub trait BatchScorer: Send + Sync {
    /// Score every candidate in one batch
    ///
    /// # Returns
    /// One result per candidate in input order. The outer error is fatal to the
    /// search (no live workers); inner errors only lose that candidate.
    async fn score_batch(
        &self,
        baseline: &AllocationState,
        candidates: &[AllocationState],
    ) -> OptimizerResult<Vec<OptimizerResult<Evaluation>>>;
}

/// Values node sets inside a satellite subgraph
#[mockall::automock]
#[async_trait::async_trait]
pub trait ClusterValuer: Send + Sync {
    /// Value each connected node set of `subgraph`
    ///
    /// # Returns
    /// One value per set; `None` where no value could be computed
    async fn value_sets(
        &self,
        subgraph: &ClusterSubgraph,
        sets: &[BTreeSet<NodeId>],
    ) -> OptimizerResult<Vec<Option<f64>>>;
}

/// Turns allocations into the opaque build descriptions workers consume
#[mockall::automock]
pub trait AllocationEncoder: Send + Sync {
    fn encode(&self, state: &AllocationState) -> OptimizerResult<Vec<u8>>;
}
