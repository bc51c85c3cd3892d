//! Satellite subgraph model
//!
//! A cluster is a small graph hanging off a socket node of the main tree. It has
//! its own root; allocations inside it always contain that root and stay
//! connected to it. Point cost counts every allocated node except the root.

use serde::{Deserialize, Serialize};
use shared::NodeId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use crate::error::{OptimizerError, OptimizerResult};

/// Role of a node inside a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterNodeKind {
    Notable,
    #[default]
    Small,
    NestedSocket,
}

impl ClusterNodeKind {
    /// Value assumed for a node when nobody provides a better estimate
    fn default_value(self) -> f64 {
        match self {
            ClusterNodeKind::Notable => 1.0,
            ClusterNodeKind::Small | ClusterNodeKind::NestedSocket => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNodeDefinition {
    pub id: NodeId,
    #[serde(default)]
    pub kind: ClusterNodeKind,
    /// Heuristic value used when the oracle cannot price a subset
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub links: Vec<NodeId>,
}

/// On-disk description of one cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDefinition {
    /// Socket node in the main tree this cluster plugs into
    pub socket: NodeId,
    pub root: NodeId,
    pub nodes: Vec<ClusterNodeDefinition>,
    #[serde(default)]
    pub edges: Vec<(NodeId, NodeId)>,
}

#[derive(Debug, Clone)]
struct ClusterNode {
    kind: ClusterNodeKind,
    value: f64,
    neighbors: Vec<NodeId>,
}

/// Validated, immutable cluster graph
#[derive(Debug, Clone)]
pub struct ClusterSubgraph {
    socket: NodeId,
    root: NodeId,
    nodes: BTreeMap<NodeId, ClusterNode>,
}

impl ClusterSubgraph {
    pub fn from_definition(definition: ClusterDefinition) -> OptimizerResult<Self> {
        let mut nodes = BTreeMap::new();
        let mut edges = definition.edges;

        for node in definition.nodes {
            let value = node.value.unwrap_or_else(|| node.kind.default_value());
            if !value.is_finite() {
                return Err(OptimizerError::graph(format!(
                    "cluster node {} has a non-finite value",
                    node.id
                )));
            }
            edges.extend(node.links.iter().map(|&link| (node.id, link)));
            let previous = nodes.insert(
                node.id,
                ClusterNode {
                    kind: node.kind,
                    value,
                    neighbors: Vec::new(),
                },
            );
            if previous.is_some() {
                return Err(OptimizerError::graph(format!("duplicate cluster node {}", node.id)));
            }
        }

        if !nodes.contains_key(&definition.root) {
            return Err(OptimizerError::graph(format!(
                "cluster root {} is not a cluster node",
                definition.root
            )));
        }

        for (a, b) in edges {
            if a == b {
                return Err(OptimizerError::graph(format!("cluster self loop on {a}")));
            }
            for (from, to) in [(a, b), (b, a)] {
                match nodes.get_mut(&from) {
                    Some(node) => node.neighbors.push(to),
                    None => {
                        return Err(OptimizerError::graph(format!(
                            "cluster edge {a}-{b} references unknown node {from}"
                        )))
                    }
                }
            }
        }
        for node in nodes.values_mut() {
            node.neighbors.sort_unstable();
            node.neighbors.dedup();
        }

        Ok(Self {
            socket: definition.socket,
            root: definition.root,
            nodes,
        })
    }

    /// Load a JSON array of cluster definitions
    pub fn load_all(path: &Path) -> OptimizerResult<Vec<Self>> {
        let text = std::fs::read_to_string(path)?;
        let definitions: Vec<ClusterDefinition> = serde_json::from_str(&text)?;
        definitions.into_iter().map(Self::from_definition).collect()
    }

    pub fn socket(&self) -> NodeId {
        self.socket
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<ClusterNodeKind> {
        self.nodes.get(&id).map(|node| node.kind)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map(|node| node.neighbors.as_slice()).unwrap_or(&[])
    }

    /// Notable nodes in ascending id order
    pub fn notables(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.kind == ClusterNodeKind::Notable)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Sum of per-node heuristic values over `set`
    pub fn heuristic_value(&self, set: &BTreeSet<NodeId>) -> f64 {
        set.iter().filter_map(|id| self.nodes.get(id)).map(|node| node.value).sum()
    }

    /// Points a set costs inside this cluster
    pub fn point_cost(&self, set: &BTreeSet<NodeId>) -> usize {
        set.len() - usize::from(set.contains(&self.root))
    }

    /// Whether `set` contains the root and is connected through itself
    pub fn is_rooted_and_connected(&self, set: &BTreeSet<NodeId>) -> bool {
        if !set.contains(&self.root) {
            return false;
        }
        let mut seen = BTreeSet::from([self.root]);
        let mut queue = VecDeque::from([self.root]);
        while let Some(current) = queue.pop_front() {
            for &next in self.neighbors(current) {
                if set.contains(&next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.len() == set.len()
    }

    /// Hop distances from `source` to every reachable node
    pub fn distances_from(&self, source: NodeId) -> BTreeMap<NodeId, usize> {
        let mut distances = BTreeMap::new();
        if !self.contains(source) {
            return distances;
        }
        distances.insert(source, 0);
        let mut queue = VecDeque::from([source]);
        while let Some(current) = queue.pop_front() {
            let next_distance = distances[&current] + 1;
            for &next in self.neighbors(current) {
                if let std::collections::btree_map::Entry::Vacant(entry) = distances.entry(next) {
                    entry.insert(next_distance);
                    queue.push_back(next);
                }
            }
        }
        distances
    }

    /// Shortest path from any member of `from` to `target`.
    ///
    /// Excludes the starting member and includes `target`; empty when `target`
    /// is already in `from`.
    pub fn shortest_path(&self, from: &BTreeSet<NodeId>, target: NodeId) -> Option<Vec<NodeId>> {
        if from.contains(&target) {
            return Some(Vec::new());
        }
        let mut parent: BTreeMap<NodeId, Option<NodeId>> = BTreeMap::new();
        let mut queue = VecDeque::new();
        for &start in from.iter().filter(|id| self.contains(**id)) {
            parent.insert(start, None);
            queue.push_back(start);
        }
        while let Some(current) = queue.pop_front() {
            for &next in self.neighbors(current) {
                if parent.contains_key(&next) {
                    continue;
                }
                parent.insert(next, Some(current));
                if next == target {
                    let mut path = vec![target];
                    let mut cursor = current;
                    while let Some(Some(previous)) = parent.get(&cursor) {
                        path.push(cursor);
                        cursor = *previous;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}
