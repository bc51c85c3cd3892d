//! Satellite cluster allocation
//!
//! Clusters are small graphs attached to socket nodes of the main tree. The
//! solver decides which notables of a cluster to take for a point budget and
//! writes the result into an allocation as a satellite set.

pub mod solver;
pub mod steiner;
pub mod subgraph;

pub use solver::{attach, ClusterPlan, ClusterSubgraphSolver, HeuristicValuer, OracleValuer};
pub use steiner::{minimum_connecting_set, ConnectingSet, SolveMode};
pub use subgraph::{ClusterDefinition, ClusterNodeDefinition, ClusterNodeKind, ClusterSubgraph};
