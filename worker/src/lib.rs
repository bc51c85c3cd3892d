//! Evaluator worker
//!
//! A worker is a long-lived process that scores candidate builds for the
//! optimizer. It speaks length-prefixed frames on stdin/stdout and logs to
//! stderr only.

pub mod error;
pub mod oracle;
pub mod server;

// Re-export main types
pub use error::{WorkerError, WorkerResult};
pub use oracle::{Contribution, ScoringOracle, WeightTable, WeightTableOracle};
pub use server::{serve, ServeEnd, ServeOptions};
