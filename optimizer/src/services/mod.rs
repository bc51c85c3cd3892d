//! Service implementations
//!
//! Everything that touches worker processes: launching them, pooling them and
//! turning pool calls into batch scores for the searches.

pub mod encoder;
pub mod pool_scorer;
pub mod process_launcher;
pub mod process_output_handler;
pub mod worker_pool;

#[cfg(test)]
mod tests;

pub use encoder::JsonAllocationEncoder;
pub use pool_scorer::PoolScorer;
pub use process_launcher::{ProcessLauncher, ProcessLink};
pub use worker_pool::{Evaluation, HealthReport, WorkerPool, WorkerSnapshot, WorkerStatus};
