//! Optimizer-specific error types

use shared::{NodeId, SharedError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Invalid allocation: {reason}")]
    Validation { reason: String },

    #[error("Allocation costs {cost} points, budget is {budget}")]
    BudgetExceeded { cost: usize, budget: usize },

    #[error("Oracle rejected candidate: {message}")]
    Oracle { message: String },

    #[error("Failed to spawn worker in slot {slot}: {message}")]
    WorkerSpawnFailed { slot: usize, message: String },

    #[error("Worker {slot} did not answer within {timeout:?}")]
    WorkerTimeout { slot: usize, timeout: Duration },

    #[error("Worker {slot} died: {message}")]
    WorkerDied { slot: usize, message: String },

    #[error("Worker unavailable: {message}")]
    WorkerUnavailable { message: String },

    #[error("No live workers left in the pool")]
    NoLiveWorkers,

    #[error("Unknown node {node}")]
    UnknownNode { node: NodeId },

    #[error("Invalid tree definition: {reason}")]
    GraphDefinition { reason: String },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OptimizerError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn config(field: impl Into<String>) -> Self {
        Self::ConfigurationError { field: field.into() }
    }

    pub fn graph(reason: impl Into<String>) -> Self {
        Self::GraphDefinition { reason: reason.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::WorkerUnavailable { message: message.into() }
    }

    /// Failures of the worker infrastructure rather than of the candidate
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::WorkerSpawnFailed { .. }
                | Self::WorkerTimeout { .. }
                | Self::WorkerDied { .. }
                | Self::WorkerUnavailable { .. }
                | Self::NoLiveWorkers
        )
    }

    /// Failures that end a whole search run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoLiveWorkers)
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;
