//! Optimizer ↔ worker protocol
//!
//! One request frame in, one response frame out. A worker announces itself with
//! exactly one `Ready` before it reads its first request.

use serde::{Deserialize, Serialize};

use crate::types::ScoreDeltas;

/// Baseline and candidate build descriptions, opaque to the pool
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EvaluationPair {
    pub baseline: Vec<u8>,
    pub candidate: Vec<u8>,
}

/// Messages sent from the optimizer to a worker (stdin)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum WorkerRequest {
    /// Score one candidate against the baseline
    Evaluate { sequence: u64, pair: EvaluationPair },

    /// Liveness probe
    Ping { sequence: u64 },

    /// Graceful shutdown request, no response expected
    Exit,
}

/// Messages sent from a worker to the optimizer (stdout)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum WorkerResponse {
    /// Worker finished starting up and accepts requests
    Ready { worker_id: u32 },

    /// Oracle scored the candidate
    Scored { sequence: u64, deltas: ScoreDeltas },

    /// Oracle ran but could not score this candidate
    Failed { sequence: u64, message: String },

    /// Answer to `Ping`
    Pong { sequence: u64 },
}

impl WorkerResponse {
    /// Sequence id this response answers, `None` for `Ready`
    pub fn sequence(&self) -> Option<u64> {
        match self {
            WorkerResponse::Ready { .. } => None,
            WorkerResponse::Scored { sequence, .. }
            | WorkerResponse::Failed { sequence, .. }
            | WorkerResponse::Pong { sequence } => Some(*sequence),
        }
    }
}
