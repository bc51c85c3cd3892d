//! Allocation genome
//!
//! An `AllocationState` is never mutated. Every operation returns a new state that
//! shares unchanged collections with its source through `Arc`, so a state handed to
//! a batch of concurrent evaluations stays valid for as long as anyone holds it.

use serde::Serialize;
use shared::{AllocationSnapshot, NodeId, OptionId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::BudgetConfig;
use crate::core::graph::{GraphModel, NodeKind};
use crate::error::{OptimizerError, OptimizerResult};

/// Allocated nodes, choice selections and satellite allocations of one build
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationState {
    root: NodeId,
    nodes: Arc<BTreeSet<NodeId>>,
    choices: Arc<BTreeMap<NodeId, OptionId>>,
    /// Socket node id -> nodes allocated inside its satellite subgraph, socket root excluded
    satellites: Arc<BTreeMap<NodeId, BTreeSet<NodeId>>>,
}

/// Differences between two allocations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllocationDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// (node, old option, new option)
    pub choice_changes: Vec<(NodeId, Option<OptionId>, Option<OptionId>)>,
    pub satellites_changed: Vec<NodeId>,
}

impl AllocationDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.choice_changes.is_empty()
            && self.satellites_changed.is_empty()
    }
}

impl AllocationState {
    /// Allocation holding only the graph's root
    pub fn rooted(graph: &GraphModel) -> Self {
        Self::from_parts_unchecked(
            graph.root(),
            BTreeSet::from([graph.root()]),
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    /// Build a state from explicit parts and check every invariant
    pub fn from_nodes(
        graph: &GraphModel,
        nodes: impl IntoIterator<Item = NodeId>,
        choices: BTreeMap<NodeId, OptionId>,
    ) -> OptimizerResult<Self> {
        let mut nodes: BTreeSet<NodeId> = nodes.into_iter().collect();
        nodes.insert(graph.root());
        let state = Self::from_parts_unchecked(graph.root(), nodes, choices, BTreeMap::new());
        state.validate(graph)?;
        Ok(state)
    }

    /// Rebuild a state from its serialized form, e.g. a start allocation file
    pub fn from_snapshot(graph: &GraphModel, snapshot: &AllocationSnapshot) -> OptimizerResult<Self> {
        let mut nodes: BTreeSet<NodeId> = snapshot.nodes.iter().copied().collect();
        nodes.insert(graph.root());
        let satellites = snapshot
            .satellites
            .iter()
            .map(|(&socket, set)| (socket, set.iter().copied().collect()))
            .collect();
        let state = Self::from_parts_unchecked(graph.root(), nodes, snapshot.choices.clone(), satellites);
        state.validate(graph)?;
        Ok(state)
    }

    /// Assemble a state without validation.
    ///
    /// Callers construct the parts so that the invariants hold; debug builds
    /// check them at the call site with [`is_valid`](Self::is_valid).
    pub fn from_parts_unchecked(
        root: NodeId,
        nodes: BTreeSet<NodeId>,
        choices: BTreeMap<NodeId, OptionId>,
        satellites: BTreeMap<NodeId, BTreeSet<NodeId>>,
    ) -> Self {
        Self {
            root,
            nodes: Arc::new(nodes),
            choices: Arc::new(choices),
            satellites: Arc::new(satellites),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn nodes(&self) -> &BTreeSet<NodeId> {
        &self.nodes
    }

    pub fn choices(&self) -> &BTreeMap<NodeId, OptionId> {
        &self.choices
    }

    pub fn satellites(&self) -> &BTreeMap<NodeId, BTreeSet<NodeId>> {
        &self.satellites
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn choice(&self, node: NodeId) -> Option<OptionId> {
        self.choices.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate `ids`; the result must stay connected to the root
    pub fn add(&self, graph: &GraphModel, ids: &[NodeId]) -> OptimizerResult<Self> {
        let mut nodes = (*self.nodes).clone();
        for &id in ids {
            if !graph.contains(id) {
                return Err(OptimizerError::validation(format!("unknown node {id}")));
            }
            nodes.insert(id);
        }
        if nodes.len() == self.nodes.len() {
            return Ok(self.clone());
        }
        if !graph.is_connected(self.root, &nodes) {
            return Err(OptimizerError::validation(format!(
                "adding {ids:?} leaves nodes disconnected from root {}",
                self.root
            )));
        }

        Ok(Self {
            root: self.root,
            nodes: Arc::new(nodes),
            choices: Arc::clone(&self.choices),
            satellites: Arc::clone(&self.satellites),
        })
    }

    /// Deallocate `ids`, dropping their choice selections and satellite allocations
    pub fn remove(&self, graph: &GraphModel, ids: &[NodeId]) -> OptimizerResult<Self> {
        if ids.contains(&self.root) {
            return Err(OptimizerError::validation(format!(
                "root {} cannot be removed",
                self.root
            )));
        }
        let mut nodes = (*self.nodes).clone();
        for id in ids {
            if !nodes.remove(id) {
                return Err(OptimizerError::validation(format!("node {id} is not allocated")));
            }
        }
        if !graph.is_connected(self.root, &nodes) {
            return Err(OptimizerError::validation(format!(
                "removing {ids:?} disconnects the allocation"
            )));
        }

        let choices = if ids.iter().any(|id| self.choices.contains_key(id)) {
            let kept = self
                .choices
                .iter()
                .filter(|(node, _)| nodes.contains(node))
                .map(|(&node, &option)| (node, option))
                .collect();
            Arc::new(kept)
        } else {
            Arc::clone(&self.choices)
        };

        let satellites = if ids.iter().any(|id| self.satellites.contains_key(id)) {
            let kept = self
                .satellites
                .iter()
                .filter(|(socket, _)| nodes.contains(socket))
                .map(|(&socket, set)| (socket, set.clone()))
                .collect();
            Arc::new(kept)
        } else {
            Arc::clone(&self.satellites)
        };

        Ok(Self {
            root: self.root,
            nodes: Arc::new(nodes),
            choices,
            satellites,
        })
    }

    /// Select `option` on an allocated choice node
    pub fn set_choice(&self, graph: &GraphModel, node: NodeId, option: OptionId) -> OptimizerResult<Self> {
        if graph.kind(node) != Some(NodeKind::Choice) {
            return Err(OptimizerError::validation(format!("node {node} is not a choice node")));
        }
        if !self.contains(node) {
            return Err(OptimizerError::validation(format!("choice node {node} is not allocated")));
        }
        if !graph.choices().offers(node, option) {
            return Err(OptimizerError::validation(format!(
                "option {option} is not on the menu of node {node}"
            )));
        }

        let mut choices = (*self.choices).clone();
        choices.insert(node, option);
        Ok(Self {
            root: self.root,
            nodes: Arc::clone(&self.nodes),
            choices: Arc::new(choices),
            satellites: Arc::clone(&self.satellites),
        })
    }

    /// Attach a satellite allocation to an allocated socket node
    pub fn with_satellite(
        &self,
        graph: &GraphModel,
        socket: NodeId,
        nodes: BTreeSet<NodeId>,
    ) -> OptimizerResult<Self> {
        if graph.kind(socket) != Some(NodeKind::Socket) {
            return Err(OptimizerError::validation(format!("node {socket} is not a socket")));
        }
        if !self.contains(socket) {
            return Err(OptimizerError::validation(format!("socket {socket} is not allocated")));
        }

        let mut satellites = (*self.satellites).clone();
        satellites.insert(socket, nodes);
        Ok(Self {
            root: self.root,
            nodes: Arc::clone(&self.nodes),
            choices: Arc::clone(&self.choices),
            satellites: Arc::new(satellites),
        })
    }

    pub fn without_satellite(&self, socket: NodeId) -> Self {
        if !self.satellites.contains_key(&socket) {
            return self.clone();
        }
        let mut satellites = (*self.satellites).clone();
        satellites.remove(&socket);
        Self {
            root: self.root,
            nodes: Arc::clone(&self.nodes),
            choices: Arc::clone(&self.choices),
            satellites: Arc::new(satellites),
        }
    }

    /// Check every structural invariant, reporting the first violation
    pub fn validate(&self, graph: &GraphModel) -> OptimizerResult<()> {
        if let Some(unknown) = self.nodes.iter().find(|&&id| !graph.contains(id)) {
            return Err(OptimizerError::validation(format!("unknown node {unknown}")));
        }
        if !graph.is_connected(self.root, &self.nodes) {
            return Err(OptimizerError::validation("allocation is not connected to the root"));
        }
        for (&node, &option) in self.choices.iter() {
            if !self.nodes.contains(&node) {
                return Err(OptimizerError::validation(format!(
                    "choice on unallocated node {node}"
                )));
            }
            if !graph.choices().offers(node, option) {
                return Err(OptimizerError::validation(format!(
                    "option {option} is not on the menu of node {node}"
                )));
            }
        }
        for socket in self.satellites.keys() {
            if !self.nodes.contains(socket) || graph.kind(*socket) != Some(NodeKind::Socket) {
                return Err(OptimizerError::validation(format!(
                    "satellite allocation on {socket}, which is not an allocated socket"
                )));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self, graph: &GraphModel) -> bool {
        self.validate(graph).is_ok()
    }

    /// Allocated nodes whose removal keeps the rest connected
    pub fn removable_nodes(&self, graph: &GraphModel) -> Vec<NodeId> {
        let cut = graph.articulation_points(self.root, &self.nodes);
        self.nodes
            .iter()
            .copied()
            .filter(|id| *id != self.root && !cut.contains(id))
            .collect()
    }

    /// Points spent: allocated nodes other than the root plus satellite nodes
    pub fn point_cost(&self) -> usize {
        let tree = self.nodes.len().saturating_sub(1);
        let satellites: usize = self.satellites.values().map(BTreeSet::len).sum();
        tree + satellites
    }

    /// Reject allocations that do not fit the point budget
    pub fn check_budget(&self, budget: &BudgetConfig) -> OptimizerResult<()> {
        let cost = self.point_cost();
        if cost > budget.max_points {
            return Err(OptimizerError::BudgetExceeded {
                cost,
                budget: budget.max_points,
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> AllocationSnapshot {
        AllocationSnapshot {
            nodes: self.nodes.iter().copied().collect(),
            choices: (*self.choices).clone(),
            satellites: self
                .satellites
                .iter()
                .map(|(&socket, set)| (socket, set.iter().copied().collect()))
                .collect(),
        }
    }

    /// What changed going from `self` to `other`
    pub fn diff(&self, other: &AllocationState) -> AllocationDiff {
        let added = other.nodes.difference(&self.nodes).copied().collect();
        let removed = self.nodes.difference(&other.nodes).copied().collect();

        let keys: BTreeSet<NodeId> = self.choices.keys().chain(other.choices.keys()).copied().collect();
        let choice_changes = keys
            .into_iter()
            .filter_map(|node| {
                let (before, after) = (self.choice(node), other.choice(node));
                (before != after).then_some((node, before, after))
            })
            .collect();

        let sockets: BTreeSet<NodeId> = self
            .satellites
            .keys()
            .chain(other.satellites.keys())
            .copied()
            .collect();
        let satellites_changed = sockets
            .into_iter()
            .filter(|socket| self.satellites.get(socket) != other.satellites.get(socket))
            .collect();

        AllocationDiff {
            added,
            removed,
            choice_changes,
            satellites_changed,
        }
    }

    /// Whether two states share their node set allocation without copying
    #[cfg(test)]
    pub(crate) fn shares_nodes_with(&self, other: &AllocationState) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes)
    }
}
