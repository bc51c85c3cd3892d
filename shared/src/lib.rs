//! Shared types for the skill-tree optimizer system
//!
//! Contains only truly shared types: identifiers, objective deltas, the
//! allocation snapshot encoding and the coordinator ↔ worker protocol.
//! Component-internal types are kept in their respective crates.

pub mod codec;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

// Re-export only inter-process communication messages
pub use messages::{EvaluationPair, WorkerRequest, WorkerResponse};
