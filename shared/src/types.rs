//! Core types used throughout the optimizer system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::errors::{SharedError, SharedResult};

/// Identifier of a node in the skill tree or in a satellite subgraph
pub type NodeId = u32;

/// Identifier of one option in a choice node's menu
pub type OptionId = u32;

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Identity reported by processes that never called an `init_*` function (tests, tools)
static UNINITIALIZED: ProcessId = ProcessId::Optimizer;

/// Process identifier for any component in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// Coordinator process driving the searches (singleton)
    Optimizer,
    /// Evaluator worker process with its pool slot number
    Worker(u32),
}

impl ProcessId {
    /// Initialize the global process ID for the coordinator
    pub fn init_optimizer() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Optimizer)
    }

    /// Initialize the global process ID for a worker with explicit ID
    pub fn init_worker(id: u32) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Worker(id))
    }

    /// Get the global process ID, or the coordinator identity if none was set
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get().unwrap_or(&UNINITIALIZED)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Optimizer => write!(f, "optimizer"),
            ProcessId::Worker(id) => write!(f, "worker_{id}"),
        }
    }
}

/// Objective deltas returned by the scoring oracle.
///
/// Every value is a percentage change of the candidate relative to the baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDeltas {
    /// Primary throughput metric (damage per second in the usual setup)
    pub throughput: f64,
    /// Durability metric (life / energy shield pool)
    pub durability: f64,
    /// Effective survivability (effective hit pool)
    pub survivability: f64,
    /// Any further named metrics the oracle chose to report
    pub extra: BTreeMap<String, f64>,
}

impl ScoreDeltas {
    pub fn new(throughput: f64, durability: f64, survivability: f64) -> Self {
        Self {
            throughput,
            durability,
            survivability,
            extra: BTreeMap::new(),
        }
    }

    /// Look up a metric by name, including the three primary ones
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "throughput" => Some(self.throughput),
            "durability" => Some(self.durability),
            "survivability" => Some(self.survivability),
            other => self.extra.get(other).copied(),
        }
    }
}

/// Serializable view of an allocation.
///
/// This is the default build description handed to workers. The pool treats it
/// as an opaque blob; only the encoder and the oracle look inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub choices: BTreeMap<NodeId, OptionId>,
    #[serde(default)]
    pub satellites: BTreeMap<NodeId, Vec<NodeId>>,
}

impl AllocationSnapshot {
    pub fn to_json_bytes(&self) -> SharedResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SharedError::SerializationError {
            message: format!("allocation snapshot: {e}"),
        })
    }

    pub fn from_json_bytes(bytes: &[u8]) -> SharedResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SharedError::DeserializationError {
            message: format!("allocation snapshot: {e}"),
        })
    }
}
