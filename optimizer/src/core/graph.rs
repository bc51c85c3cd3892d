//! Static skill-tree graph
//!
//! Loaded once from a tree definition and then only read. Every query is a pure
//! function of the graph and the sets handed in.

use serde::{Deserialize, Serialize};
use shared::{NodeId, OptionId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::error::{OptimizerError, OptimizerResult};

/// Category of a tree node. Decides which operations a node accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Ordinary,
    Notable,
    Keystone,
    /// Anchor for a satellite subgraph
    Socket,
    /// Offers a fixed menu of mutually exclusive options
    Choice,
}

/// A node of the static tree
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    /// Tree coordinates, carried for radius-based effects evaluated by the oracle
    pub position: (f64, f64),
    neighbors: Vec<NodeId>,
}

impl GraphNode {
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }
}

/// Option menus of every choice node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceCatalog {
    menus: HashMap<NodeId, Vec<OptionId>>,
}

impl ChoiceCatalog {
    pub fn options(&self, node: NodeId) -> Option<&[OptionId]> {
        self.menus.get(&node).map(Vec::as_slice)
    }

    pub fn offers(&self, node: NodeId, option: OptionId) -> bool {
        self.options(node).is_some_and(|menu| menu.contains(&option))
    }
}

/// Serialized tree description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeDefinition {
    pub root: NodeId,
    pub nodes: Vec<NodeDefinition>,
    /// Undirected edges; per-node `links` are merged in
    #[serde(default)]
    pub edges: Vec<(NodeId, NodeId)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: (f64, f64),
    /// Menu of a choice node
    #[serde(default)]
    pub options: Vec<OptionId>,
    #[serde(default)]
    pub links: Vec<NodeId>,
}

/// Immutable adjacency model of the tree
#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: HashMap<NodeId, GraphNode>,
    root: NodeId,
    choices: ChoiceCatalog,
}

impl GraphModel {
    /// Build and validate a graph from its definition
    pub fn from_definition(definition: TreeDefinition) -> OptimizerResult<Self> {
        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        let mut menus = HashMap::new();
        let mut edges = definition.edges;

        for node in definition.nodes {
            match (node.kind, node.options.is_empty()) {
                (NodeKind::Choice, true) => {
                    return Err(OptimizerError::graph(format!(
                        "choice node {} has no options",
                        node.id
                    )))
                }
                (NodeKind::Choice, false) => {
                    let mut menu = node.options.clone();
                    menu.sort_unstable();
                    menu.dedup();
                    menus.insert(node.id, menu);
                }
                (_, false) => {
                    return Err(OptimizerError::graph(format!(
                        "node {} lists options but is not a choice node",
                        node.id
                    )))
                }
                (_, true) => {}
            }

            edges.extend(node.links.iter().map(|&other| (node.id, other)));

            let graph_node = GraphNode {
                id: node.id,
                kind: node.kind,
                name: node.name,
                position: node.position,
                neighbors: Vec::new(),
            };
            if nodes.insert(node.id, graph_node).is_some() {
                return Err(OptimizerError::graph(format!("duplicate node id {}", node.id)));
            }
        }

        if !nodes.contains_key(&definition.root) {
            return Err(OptimizerError::graph(format!(
                "root {} is not a node",
                definition.root
            )));
        }

        for (a, b) in edges {
            if a == b {
                return Err(OptimizerError::graph(format!("self loop on node {a}")));
            }
            for (from, to) in [(a, b), (b, a)] {
                let node = nodes.get_mut(&from).ok_or_else(|| {
                    OptimizerError::graph(format!("edge {a}-{b} references unknown node {from}"))
                })?;
                node.neighbors.push(to);
            }
        }
        for node in nodes.values_mut() {
            node.neighbors.sort_unstable();
            node.neighbors.dedup();
        }

        Ok(Self {
            nodes,
            root: definition.root,
            choices: ChoiceCatalog { menus },
        })
    }

    /// Load a JSON tree definition from disk
    pub fn load(path: &Path) -> OptimizerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let definition: TreeDefinition = serde_json::from_str(&text)?;
        Self::from_definition(definition)
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

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|node| node.kind)
    }

    pub fn choices(&self) -> &ChoiceCatalog {
        &self.choices
    }

    /// Neighbors of a node in ascending id order; empty for unknown ids
    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map(GraphNode::neighbors).unwrap_or(&[])
    }

    /// Frontier of an allocation: nodes adjacent to it but not in it
    pub fn unallocated_neighbors(&self, allocation: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let frontier: BTreeSet<NodeId> = allocation
            .iter()
            .flat_map(|&id| self.neighbors(id).iter().copied())
            .filter(|id| !allocation.contains(id))
            .collect();
        frontier.into_iter().collect()
    }

    /// Nodes of `allowed` reachable from `start` through `allowed` only
    pub fn reachable_within(&self, start: NodeId, allowed: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        if !allowed.contains(&start) {
            return seen;
        }
        let mut queue = VecDeque::from([start]);
        seen.insert(start);
        while let Some(current) = queue.pop_front() {
            for &next in self.neighbors(current) {
                if allowed.contains(&next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Whether every allocated node is reachable from `root` through allocated nodes
    pub fn is_connected(&self, root: NodeId, allocation: &BTreeSet<NodeId>) -> bool {
        allocation.contains(&root) && self.reachable_within(root, allocation).len() == allocation.len()
    }

    /// Cheapest way to reach `target` from any member of `from`.
    ///
    /// The returned path excludes the starting member and ends at `target`, so its
    /// length is the number of points needed. An empty path means `target` is
    /// already in `from`.
    pub fn shortest_path(&self, from: &BTreeSet<NodeId>, target: NodeId) -> Option<Vec<NodeId>> {
        self.bfs_path(from, target, |_| true)
    }

    /// Like [`shortest_path`](Self::shortest_path) but only stepping through `allowed`
    pub fn shortest_path_within(
        &self,
        from: &BTreeSet<NodeId>,
        target: NodeId,
        allowed: &BTreeSet<NodeId>,
    ) -> Option<Vec<NodeId>> {
        self.bfs_path(from, target, |id| allowed.contains(&id))
    }

    fn bfs_path<F>(&self, from: &BTreeSet<NodeId>, target: NodeId, allowed: F) -> Option<Vec<NodeId>>
    where
        F: Fn(NodeId) -> bool,
    {
        if from.contains(&target) {
            return Some(Vec::new());
        }
        if !self.contains(target) || !allowed(target) {
            return None;
        }

        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut seen: HashSet<NodeId> = from.iter().copied().collect();
        let mut queue: VecDeque<NodeId> = from.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            for &next in self.neighbors(current) {
                if !allowed(next) || !seen.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == target {
                    let mut path = vec![target];
                    let mut step = current;
                    while !from.contains(&step) {
                        path.push(step);
                        step = parent[&step];
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Cut vertices of the subgraph induced by `allocation`, searched from `root`.
    ///
    /// Removing any returned node disconnects some other allocated node from the
    /// root. Iterative Tarjan so deep trees cannot overflow the stack.
    pub fn articulation_points(&self, root: NodeId, allocation: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let mut points = BTreeSet::new();
        if !allocation.contains(&root) {
            return points;
        }

        let mut discovered: HashMap<NodeId, usize> = HashMap::new();
        let mut low: HashMap<NodeId, usize> = HashMap::new();
        let mut root_children = 0usize;
        let mut timer = 1usize;

        // (node, parent, index of the next neighbor to visit)
        let mut stack: Vec<(NodeId, Option<NodeId>, usize)> = vec![(root, None, 0)];
        discovered.insert(root, 0);
        low.insert(root, 0);

        while let Some(frame) = stack.last_mut() {
            let (node, parent) = (frame.0, frame.1);
            let neighbors = self.neighbors(node);

            if frame.2 < neighbors.len() {
                let next = neighbors[frame.2];
                frame.2 += 1;
                if !allocation.contains(&next) || Some(next) == parent {
                    continue;
                }
                if let Some(&seen_at) = discovered.get(&next) {
                    let updated = low[&node].min(seen_at);
                    low.insert(node, updated);
                } else {
                    discovered.insert(next, timer);
                    low.insert(next, timer);
                    timer += 1;
                    if node == root {
                        root_children += 1;
                    }
                    stack.push((next, Some(node), 0));
                }
            } else {
                stack.pop();
                if let Some(parent) = parent {
                    let child_low = low[&node];
                    let updated = low[&parent].min(child_low);
                    low.insert(parent, updated);
                    if parent != root && child_low >= discovered[&parent] {
                        points.insert(parent);
                    }
                }
            }
        }

        if root_children > 1 {
            points.insert(root);
        }
        points
    }
}
