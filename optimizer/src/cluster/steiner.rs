//! Minimum connecting sets inside a cluster
//!
//! Small target sets are solved exactly with the Dreyfus-Wagner dynamic program
//! over terminal subsets; larger ones fall back to growing the tree toward the
//! nearest remaining target.

use serde::{Deserialize, Serialize};
use shared::NodeId;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::subgraph::ClusterSubgraph;
use crate::config::ClusterConfig;

const UNREACHABLE: usize = usize::MAX / 4;

/// How a result was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    Exact,
    Approximate,
}

/// Rooted connected node set reaching a group of targets
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectingSet {
    /// Always contains the cluster root
    pub nodes: BTreeSet<NodeId>,
    /// Targets that no path from the root reaches
    pub unreachable: Vec<NodeId>,
    pub mode: SolveMode,
}

impl ConnectingSet {
    pub fn point_cost(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }
}

/// Smallest rooted connected set containing every reachable target.
///
/// Exact when at most `exact_limit` reachable targets remain, greedy otherwise.
/// The limit never exceeds [`ClusterConfig::MAX_EXACT_TARGETS`].
pub fn minimum_connecting_set(subgraph: &ClusterSubgraph, targets: &[NodeId], exact_limit: usize) -> ConnectingSet {
    let root = subgraph.root();
    let reach = subgraph.distances_from(root);

    let mut reachable = BTreeSet::new();
    let mut unreachable = Vec::new();
    for &target in targets {
        if target == root {
            continue;
        }
        if reach.contains_key(&target) {
            reachable.insert(target);
        } else if !unreachable.contains(&target) {
            unreachable.push(target);
        }
    }

    let (nodes, mode) = if reachable.len() <= exact_limit.min(ClusterConfig::MAX_EXACT_TARGETS) {
        (exact(subgraph, &reachable), SolveMode::Exact)
    } else {
        (nearest_first(subgraph, &reachable), SolveMode::Approximate)
    };

    ConnectingSet {
        nodes,
        unreachable,
        mode,
    }
}

/// Grow from the root, always attaching the closest remaining target
fn nearest_first(subgraph: &ClusterSubgraph, targets: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    let mut nodes = BTreeSet::from([subgraph.root()]);
    let mut remaining = targets.clone();

    while !remaining.is_empty() {
        let closest = remaining
            .iter()
            .filter_map(|&target| subgraph.shortest_path(&nodes, target).map(|path| (path.len(), target, path)))
            .min_by_key(|(length, target, _)| (*length, *target));
        let Some((_, target, path)) = closest else {
            break;
        };
        nodes.extend(path);
        remaining.remove(&target);
        // earlier paths may have swept up other targets
        remaining.retain(|node| !nodes.contains(node));
    }
    nodes
}

/// Dense index over the cluster with all-pairs hop distances
struct Metric {
    ids: Vec<NodeId>,
    dist: Vec<Vec<usize>>,
    parent: Vec<Vec<Option<usize>>>,
}

impl Metric {
    fn new(subgraph: &ClusterSubgraph) -> Self {
        let ids: Vec<NodeId> = subgraph.node_ids().collect();
        let index: BTreeMap<NodeId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let n = ids.len();
        let mut dist = vec![vec![UNREACHABLE; n]; n];
        let mut parent = vec![vec![None; n]; n];

        for source in 0..n {
            dist[source][source] = 0;
            let mut queue = VecDeque::from([source]);
            while let Some(current) = queue.pop_front() {
                for neighbor in subgraph.neighbors(ids[current]) {
                    let Some(&next) = index.get(neighbor) else {
                        continue;
                    };
                    if dist[source][next] == UNREACHABLE {
                        dist[source][next] = dist[source][current] + 1;
                        parent[source][next] = Some(current);
                        queue.push_back(next);
                    }
                }
            }
        }

        Self { ids, dist, parent }
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.ids.iter().position(|&candidate| candidate == id)
    }

    /// Add every node on the stored shortest path between `from` and `to`
    fn collect_path(&self, from: usize, to: usize, out: &mut BTreeSet<NodeId>) {
        let mut cursor = to;
        out.insert(self.ids[cursor]);
        while cursor != from {
            match self.parent[from][cursor] {
                Some(previous) => {
                    cursor = previous;
                    out.insert(self.ids[cursor]);
                }
                None => return,
            }
        }
    }
}

/// Dreyfus-Wagner over the root and every target.
///
/// `cost[mask][v]` is the fewest edges of a tree spanning the terminals in
/// `mask` together with `v`. Unit edge weights make the edge optimum a node
/// optimum as well.
fn exact(subgraph: &ClusterSubgraph, targets: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    let root = subgraph.root();
    if targets.is_empty() {
        return BTreeSet::from([root]);
    }

    let metric = Metric::new(subgraph);
    let n = metric.ids.len();
    let mut terminals = Vec::with_capacity(targets.len() + 1);
    for &id in std::iter::once(&root).chain(targets.iter()) {
        if let Some(position) = metric.position(id) {
            terminals.push(position);
        }
    }
    let k = terminals.len();
    let full = (1usize << k) - 1;

    let mut cost = vec![vec![UNREACHABLE; n]; full + 1];
    // node where the tree for (mask, v) branches, and how it splits there
    let mut via = vec![vec![0usize; n]; full + 1];
    let mut split = vec![vec![0usize; n]; full + 1];

    for (bit, &terminal) in terminals.iter().enumerate() {
        for v in 0..n {
            cost[1 << bit][v] = metric.dist[terminal][v];
            via[1 << bit][v] = terminal;
        }
    }

    for mask in 1..=full {
        if mask.count_ones() < 2 {
            continue;
        }
        let mut merged = vec![UNREACHABLE; n];
        for u in 0..n {
            let mut sub = (mask - 1) & mask;
            while sub > 0 {
                // each unordered split once
                if sub < (mask ^ sub) {
                    let total = cost[sub][u] + cost[mask ^ sub][u];
                    if total < merged[u] {
                        merged[u] = total;
                        split[mask][u] = sub;
                    }
                }
                sub = (sub - 1) & mask;
            }
        }
        for v in 0..n {
            for u in 0..n {
                let total = merged[u] + metric.dist[u][v];
                if total < cost[mask][v] {
                    cost[mask][v] = total;
                    via[mask][v] = u;
                }
            }
        }
    }

    let mut nodes = BTreeSet::from([root]);
    let mut stack = vec![(full, terminals[0])];
    while let Some((mask, v)) = stack.pop() {
        if cost[mask][v] >= UNREACHABLE {
            continue;
        }
        let u = via[mask][v];
        metric.collect_path(u, v, &mut nodes);
        if mask.count_ones() >= 2 {
            let sub = split[mask][u];
            stack.push((sub, u));
            stack.push((mask ^ sub, u));
        }
    }
    nodes
}
