//! Skill-tree allocation optimizer
//!
//! Searches for the allocation of a fixed point budget over a passive skill
//! tree that maximizes a weighted objective. Candidates are scored by external
//! evaluator processes managed by a crash-tolerant worker pool; the search
//! strategies only ever see the [`traits::BatchScorer`] seam.

pub mod cluster;
pub mod config;
pub mod core;
pub mod error;
pub mod search;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use cluster::{ClusterPlan, ClusterSubgraph, ClusterSubgraphSolver};
pub use config::OptimizerConfig;
pub use core::{AllocationState, GraphModel, ObjectiveWeights};
pub use error::{OptimizerError, OptimizerResult};
pub use search::{GeneticSearch, GreedySearch};
pub use services::{PoolScorer, ProcessLauncher, WorkerPool};
pub use traits::{BatchScorer, ClusterValuer, WorkerLauncher, WorkerLink};
