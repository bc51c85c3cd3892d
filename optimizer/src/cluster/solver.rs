//! Budgeted allocation inside a satellite cluster

use async_trait::async_trait;
use serde::Serialize;
use shared::{process_debug, process_info, process_warn, NodeId, ProcessId};
use std::collections::BTreeSet;

use super::steiner::{minimum_connecting_set, ConnectingSet, SolveMode};
use super::subgraph::ClusterSubgraph;
use crate::config::ClusterConfig;
use crate::core::{AllocationState, GraphModel, ObjectiveWeights};
use crate::error::{OptimizerError, OptimizerResult};
use crate::search::score_candidates;
use crate::traits::{BatchScorer, ClusterValuer};

/// Chosen allocation for one cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterPlan {
    pub socket: NodeId,
    pub root: NodeId,
    /// Notables covered by `nodes`, ascending
    pub notables: Vec<NodeId>,
    /// Allocated cluster nodes including the root
    pub nodes: BTreeSet<NodeId>,
    pub point_cost: usize,
    pub value: f64,
    pub mode: SolveMode,
    /// Notables no path from the root reaches
    pub unreachable: Vec<NodeId>,
}

/// Values a set by summing the per-node values in the cluster definition
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicValuer;

#[async_trait]
impl ClusterValuer for HeuristicValuer {
    async fn value_sets(
        &self,
        subgraph: &ClusterSubgraph,
        sets: &[BTreeSet<NodeId>],
    ) -> OptimizerResult<Vec<Option<f64>>> {
        Ok(sets.iter().map(|set| Some(subgraph.heuristic_value(set))).collect())
    }
}

/// Values a set by attaching it to `host` and scoring the result against
/// `baseline` through the worker pool
pub struct OracleValuer<'a, S: BatchScorer + ?Sized> {
    graph: &'a GraphModel,
    scorer: &'a S,
    objective: &'a ObjectiveWeights,
    host: &'a AllocationState,
    baseline: &'a AllocationState,
}

impl<'a, S: BatchScorer + ?Sized> OracleValuer<'a, S> {
    pub fn new(
        graph: &'a GraphModel,
        scorer: &'a S,
        objective: &'a ObjectiveWeights,
        host: &'a AllocationState,
        baseline: &'a AllocationState,
    ) -> Self {
        Self {
            graph,
            scorer,
            objective,
            host,
            baseline,
        }
    }
}

#[async_trait]
impl<S: BatchScorer + ?Sized> ClusterValuer for OracleValuer<'_, S> {
    async fn value_sets(
        &self,
        subgraph: &ClusterSubgraph,
        sets: &[BTreeSet<NodeId>],
    ) -> OptimizerResult<Vec<Option<f64>>> {
        let mut values = vec![None; sets.len()];
        let mut indices = Vec::with_capacity(sets.len());
        let mut candidates = Vec::with_capacity(sets.len());

        for (index, set) in sets.iter().enumerate() {
            let satellite: BTreeSet<NodeId> = set.iter().copied().filter(|&id| id != subgraph.root()).collect();
            match self.host.with_satellite(self.graph, subgraph.socket(), satellite) {
                Ok(candidate) => {
                    indices.push(index);
                    candidates.push(candidate);
                }
                Err(e) => {
                    process_debug!(ProcessId::current(), "🧩 Cannot attach cluster set {}: {}", index, e);
                }
            }
        }

        let scored = score_candidates(self.scorer, self.objective, self.baseline, &candidates).await?;
        for (index, value) in indices.into_iter().zip(scored) {
            values[index] = value;
        }
        Ok(values)
    }
}

/// Picks which notables of a cluster to take under a point budget
pub struct ClusterSubgraphSolver<'a, V: ClusterValuer + ?Sized> {
    valuer: &'a V,
    config: ClusterConfig,
}

impl<'a, V: ClusterValuer + ?Sized> ClusterSubgraphSolver<'a, V> {
    pub fn new(valuer: &'a V, config: ClusterConfig) -> Self {
        Self { valuer, config }
    }

    pub fn minimum_connecting_set(&self, subgraph: &ClusterSubgraph, targets: &[NodeId]) -> ConnectingSet {
        minimum_connecting_set(subgraph, targets, self.config.exact_target_limit)
    }

    /// Best-valued rooted allocation costing at most `max_points`.
    ///
    /// Every notable subset is tried when the reachable notable count is within
    /// the exact limit; otherwise notables are added greedily by value per point.
    pub async fn optimize_allocation(
        &self,
        subgraph: &ClusterSubgraph,
        max_points: usize,
    ) -> OptimizerResult<ClusterPlan> {
        self.config.validate()?;
        let reach = subgraph.distances_from(subgraph.root());
        let (notables, unreachable): (Vec<NodeId>, Vec<NodeId>) =
            subgraph.notables().into_iter().partition(|id| reach.contains_key(id));

        let (nodes, value, mode) = if notables.len() <= self.config.exact_target_limit {
            self.exhaustive(subgraph, &notables, max_points).await?
        } else {
            self.greedy(subgraph, &notables, max_points).await?
        };

        let plan = ClusterPlan {
            socket: subgraph.socket(),
            root: subgraph.root(),
            notables: notables.iter().copied().filter(|id| nodes.contains(id)).collect(),
            point_cost: subgraph.point_cost(&nodes),
            nodes,
            value,
            mode,
            unreachable,
        };
        process_info!(
            ProcessId::current(),
            "🧩 Cluster at socket {}: {} notables for {} points, value {:.4} ({:?})",
            plan.socket,
            plan.notables.len(),
            plan.point_cost,
            plan.value,
            plan.mode
        );
        Ok(plan)
    }

    /// Valuer results with the heuristic filling every gap
    async fn values(&self, subgraph: &ClusterSubgraph, sets: &[BTreeSet<NodeId>]) -> OptimizerResult<Vec<f64>> {
        let priced = self.valuer.value_sets(subgraph, sets).await?;
        Ok(sets
            .iter()
            .enumerate()
            .map(|(index, set)| match priced.get(index).copied().flatten() {
                Some(value) => value,
                None => {
                    process_debug!(ProcessId::current(), "🧩 Heuristic value for cluster set {}", index);
                    subgraph.heuristic_value(set)
                }
            })
            .collect())
    }

    async fn exhaustive(
        &self,
        subgraph: &ClusterSubgraph,
        notables: &[NodeId],
        max_points: usize,
    ) -> OptimizerResult<(BTreeSet<NodeId>, f64, SolveMode)> {
        let mut sets: Vec<BTreeSet<NodeId>> = Vec::new();
        for mask in 0..(1usize << notables.len()) {
            let targets: Vec<NodeId> = notables
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, &id)| id)
                .collect();
            let connecting = minimum_connecting_set(subgraph, &targets, notables.len());
            if connecting.point_cost() <= max_points && !sets.contains(&connecting.nodes) {
                sets.push(connecting.nodes);
            }
        }

        let values = self.values(subgraph, &sets).await?;
        process_debug!(ProcessId::current(), "🧩 Valued {} affordable notable subsets", sets.len());

        // the root-only set always fits, so there is at least one entry
        let mut best = 0;
        for index in 1..sets.len() {
            let better = values[index] > values[best]
                || (values[index] == values[best] && sets[index].len() < sets[best].len());
            if better {
                best = index;
            }
        }
        let value = values[best];
        Ok((sets.swap_remove(best), value, SolveMode::Exact))
    }

    async fn greedy(
        &self,
        subgraph: &ClusterSubgraph,
        notables: &[NodeId],
        max_points: usize,
    ) -> OptimizerResult<(BTreeSet<NodeId>, f64, SolveMode)> {
        let mut current = BTreeSet::from([subgraph.root()]);
        let mut current_value = self.values(subgraph, &[current.clone()]).await?[0];

        loop {
            let cost = subgraph.point_cost(&current);
            let mut options = Vec::new();
            for &notable in notables.iter().filter(|id| !current.contains(id)) {
                let Some(path) = subgraph.shortest_path(&current, notable) else {
                    continue;
                };
                if cost + path.len() > max_points {
                    continue;
                }
                let mut next = current.clone();
                next.extend(path.iter().copied());
                options.push((notable, path.len(), next));
            }
            if options.is_empty() {
                break;
            }

            let sets: Vec<BTreeSet<NodeId>> = options.iter().map(|(_, _, set)| set.clone()).collect();
            let values = self.values(subgraph, &sets).await?;

            let mut best: Option<(usize, f64)> = None;
            for (index, (_, added, _)) in options.iter().enumerate() {
                let gain = values[index] - current_value;
                if gain <= 0.0 {
                    continue;
                }
                let ratio = gain / *added as f64;
                if best.map_or(true, |(_, top)| ratio > top) {
                    best = Some((index, ratio));
                }
            }
            let Some((index, ratio)) = best else {
                break;
            };

            let (notable, added, next) = options.swap_remove(index);
            process_debug!(
                ProcessId::current(),
                "🧩 Took notable {} for {} points ({:.4} per point)",
                notable,
                added,
                ratio
            );
            current = next;
            current_value = values[index];
        }

        Ok((current, current_value, SolveMode::Approximate))
    }
}

/// Write `plan` into `state` as the satellite allocation of its socket
pub fn attach(graph: &GraphModel, state: &AllocationState, plan: &ClusterPlan) -> OptimizerResult<AllocationState> {
    if !graph.contains(plan.socket) {
        return Err(OptimizerError::UnknownNode { node: plan.socket });
    }
    if !plan.unreachable.is_empty() {
        process_warn!(
            ProcessId::current(),
            "⚠️ Cluster at socket {} has unreachable notables {:?}",
            plan.socket,
            plan.unreachable
        );
    }
    let satellite: BTreeSet<NodeId> = plan.nodes.iter().copied().filter(|&id| id != plan.root).collect();
    state.with_satellite(graph, plan.socket, satellite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::subgraph::fixtures::sample_cluster;
    use crate::core::graph::fixtures::sample_tree;
    use crate::search::testing::TableScorer;
    use crate::traits::MockClusterValuer;
    use std::collections::BTreeMap;

    fn config(exact_target_limit: usize) -> ClusterConfig {
        ClusterConfig { exact_target_limit }
    }

    #[tokio::test]
    async fn test_exhaustive_takes_everything_without_a_budget() {
        let cluster = sample_cluster();
        let solver = ClusterSubgraphSolver::new(&HeuristicValuer, config(4));

        let plan = solver.optimize_allocation(&cluster, usize::MAX).await.unwrap();
        assert_eq!(plan.mode, SolveMode::Exact);
        assert_eq!(plan.notables, vec![1003, 1006, 1007]);
        assert_eq!(plan.point_cost, 5);
        assert_eq!(plan.value, 10.0);
        assert!(cluster.is_rooted_and_connected(&plan.nodes));
    }

    #[tokio::test]
    async fn test_exhaustive_respects_the_budget() {
        let cluster = sample_cluster();
        let solver = ClusterSubgraphSolver::new(&HeuristicValuer, config(4));

        let plan = solver.optimize_allocation(&cluster, 3).await.unwrap();
        assert_eq!(plan.notables, vec![1003]);
        assert_eq!(plan.nodes, BTreeSet::from([1000, 1001, 1002, 1003]));
        assert_eq!(plan.point_cost, 3);
        assert_eq!(plan.value, 5.0);

        let nothing = solver.optimize_allocation(&cluster, 0).await.unwrap();
        assert_eq!(nothing.nodes, BTreeSet::from([1000]));
        assert!(nothing.notables.is_empty());
    }

    #[tokio::test]
    async fn test_greedy_adds_best_value_per_point() {
        let cluster = sample_cluster();
        let solver = ClusterSubgraphSolver::new(&HeuristicValuer, config(1));

        let plan = solver.optimize_allocation(&cluster, 4).await.unwrap();
        assert_eq!(plan.mode, SolveMode::Approximate);
        assert_eq!(plan.notables, vec![1003, 1006]);
        assert_eq!(plan.point_cost, 4);
        assert_eq!(plan.value, 8.0);
    }

    #[tokio::test]
    async fn test_oversized_exact_limit_is_a_configuration_error() {
        let cluster = sample_cluster();
        let mut valuer = MockClusterValuer::new();
        valuer.expect_value_sets().never();
        let solver = ClusterSubgraphSolver::new(&valuer, config(64));

        let result = solver.optimize_allocation(&cluster, usize::MAX).await;
        assert!(matches!(result, Err(OptimizerError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn test_unscorable_sets_fall_back_to_heuristic() {
        let cluster = sample_cluster();
        let mut valuer = MockClusterValuer::new();
        valuer
            .expect_value_sets()
            .returning(|_, sets| Ok(vec![None; sets.len()]));
        let solver = ClusterSubgraphSolver::new(&valuer, config(4));

        let plan = solver.optimize_allocation(&cluster, 3).await.unwrap();
        assert_eq!(plan.notables, vec![1003]);
        assert_eq!(plan.value, 5.0);
    }

    #[tokio::test]
    async fn test_fatal_valuer_error_propagates() {
        let cluster = sample_cluster();
        let mut valuer = MockClusterValuer::new();
        valuer
            .expect_value_sets()
            .returning(|_, _| Err(OptimizerError::NoLiveWorkers));
        let solver = ClusterSubgraphSolver::new(&valuer, config(4));

        assert!(matches!(
            solver.optimize_allocation(&cluster, 3).await,
            Err(OptimizerError::NoLiveWorkers)
        ));
    }

    #[tokio::test]
    async fn test_oracle_valuer_scores_attached_sets() {
        let graph = sample_tree();
        let cluster = sample_cluster();
        let scorer = TableScorer::new(&[(1003, 5.0), (1007, 10.0)]);
        let objective = ObjectiveWeights::default();
        let host = AllocationState::from_nodes(&graph, [2, 8], BTreeMap::new()).unwrap();
        let baseline = AllocationState::rooted(&graph);
        let valuer = OracleValuer::new(&graph, &scorer, &objective, &host, &baseline);
        let solver = ClusterSubgraphSolver::new(&valuer, config(4));

        let plan = solver.optimize_allocation(&cluster, 4).await.unwrap();
        assert_eq!(plan.notables, vec![1006, 1007]);
        assert_eq!(plan.point_cost, 4);
        assert_eq!(plan.value, 10.0);

        let seen = scorer.seen.lock().unwrap();
        assert!(!seen.is_empty());
        for candidate in seen.iter() {
            assert!(!candidate.satellites()[&8].contains(&1000));
            assert_eq!(candidate.nodes(), host.nodes());
        }
    }

    #[tokio::test]
    async fn test_oracle_valuer_without_allocated_socket_uses_heuristic() {
        let graph = sample_tree();
        let cluster = sample_cluster();
        let scorer = TableScorer::new(&[(1007, 100.0)]);
        let objective = ObjectiveWeights::default();
        let host = AllocationState::rooted(&graph);
        let valuer = OracleValuer::new(&graph, &scorer, &objective, &host, &host);
        let solver = ClusterSubgraphSolver::new(&valuer, config(4));

        let plan = solver.optimize_allocation(&cluster, 3).await.unwrap();
        assert_eq!(plan.notables, vec![1003]);
        assert_eq!(scorer.batches(), 0);
    }

    #[tokio::test]
    async fn test_attach_writes_satellite_allocation() {
        let graph = sample_tree();
        let cluster = sample_cluster();
        let solver = ClusterSubgraphSolver::new(&HeuristicValuer, config(4));
        let plan = solver.optimize_allocation(&cluster, 3).await.unwrap();

        let host = AllocationState::from_nodes(&graph, [2, 8], BTreeMap::new()).unwrap();
        let attached = attach(&graph, &host, &plan).unwrap();
        assert_eq!(attached.satellites()[&8], BTreeSet::from([1001, 1002, 1003]));
        assert_eq!(attached.point_cost(), host.point_cost() + 3);

        let unallocated = AllocationState::rooted(&graph);
        assert!(matches!(
            attach(&graph, &unallocated, &plan),
            Err(OptimizerError::Validation { .. })
        ));

        let stray = ClusterPlan { socket: 999, ..plan };
        assert!(matches!(
            attach(&graph, &host, &stray),
            Err(OptimizerError::UnknownNode { node: 999 })
        ));
    }
}
