//! Message types for the optimizer system
//!
//! - `worker`: Optimizer ↔ evaluator worker communication over stdio

pub mod worker;

pub use worker::{EvaluationPair, WorkerRequest, WorkerResponse};
