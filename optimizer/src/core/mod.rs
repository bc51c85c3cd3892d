//! Core domain model
//!
//! Pure data and algorithms with no I/O: the static tree, the allocation genome
//! and the objective. Everything here is deterministic and synchronous.

pub mod allocation;
pub mod graph;
pub mod objective;

pub use allocation::{AllocationDiff, AllocationState};
pub use graph::{ChoiceCatalog, GraphModel, GraphNode, NodeDefinition, NodeKind, TreeDefinition};
pub use objective::ObjectiveWeights;
