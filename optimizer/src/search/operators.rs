//! Structure-preserving genome operators
//!
//! Every operator returns an allocation that keeps all nodes connected to the
//! root and only carries choice selections on allocated nodes.

use rand::seq::SliceRandom;
use rand::Rng;
use shared::NodeId;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::BudgetConfig;
use crate::core::{AllocationState, GraphModel, NodeKind};

/// Kinds of single structural edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    AddFrontier,
    RemoveRemovable,
    RerollChoice,
}

/// Apply one random structural edit the budget allows.
///
/// Additions need a free point, removals keep the cost at or above the floor,
/// re-rolls need an allocated choice node with another option on its menu.
/// Returns `None` when no edit applies.
pub fn random_edit<R>(
    graph: &GraphModel,
    state: &AllocationState,
    budget: &BudgetConfig,
    rng: &mut R,
) -> Option<AllocationState>
where
    R: Rng + ?Sized,
{
    let cost = state.point_cost();
    let frontier = if cost < budget.max_points {
        graph.unallocated_neighbors(state.nodes())
    } else {
        Vec::new()
    };
    let removable = if cost > budget.min_points {
        state.removable_nodes(graph)
    } else {
        Vec::new()
    };
    let rerollable = rerollable_choices(graph, state);

    let mut kinds = Vec::with_capacity(3);
    if !frontier.is_empty() {
        kinds.push(EditKind::AddFrontier);
    }
    if !removable.is_empty() {
        kinds.push(EditKind::RemoveRemovable);
    }
    if !rerollable.is_empty() {
        kinds.push(EditKind::RerollChoice);
    }

    match kinds.choose(rng)? {
        EditKind::AddFrontier => {
            let node = frontier.choose(rng)?;
            state.add(graph, &[*node]).ok()
        }
        EditKind::RemoveRemovable => {
            let node = removable.choose(rng)?;
            state.remove(graph, &[*node]).ok()
        }
        EditKind::RerollChoice => {
            let node = *rerollable.choose(rng)?;
            let current = state.choice(node);
            let menu = graph.choices().options(node)?;
            let alternatives: Vec<_> = menu.iter().copied().filter(|option| Some(*option) != current).collect();
            let option = alternatives.choose(rng)?;
            state.set_choice(graph, node, *option).ok()
        }
    }
}

/// Allocated choice nodes that have an option other than the current one
fn rerollable_choices(graph: &GraphModel, state: &AllocationState) -> Vec<NodeId> {
    state
        .nodes()
        .iter()
        .copied()
        .filter(|&node| graph.kind(node) == Some(NodeKind::Choice))
        .filter(|&node| {
            let menu = graph.choices().options(node).unwrap_or(&[]);
            menu.iter().any(|option| Some(*option) != state.choice(node))
        })
        .collect()
}

/// Union crossover with random inclusion.
///
/// Starts from the parents' common nodes, connects them through the union of both
/// parents, then takes each node unique to either parent with probability 0.5,
/// again connecting through the union. `fitter` supplies choice selections and
/// satellite allocations first; `other` fills gaps. Identical parents yield an
/// identical child without consuming randomness.
pub fn crossover<R>(
    graph: &GraphModel,
    fitter: &AllocationState,
    other: &AllocationState,
    rng: &mut R,
) -> AllocationState
where
    R: Rng + ?Sized,
{
    let root = fitter.root();
    let union: BTreeSet<NodeId> = fitter.nodes().union(other.nodes()).copied().collect();
    let mut nodes: BTreeSet<NodeId> = fitter.nodes().intersection(other.nodes()).copied().collect();
    nodes.insert(root);
    connect_within(graph, root, &mut nodes, &union);

    let unique: Vec<NodeId> = fitter
        .nodes()
        .symmetric_difference(other.nodes())
        .copied()
        .collect();
    for node in unique {
        if nodes.contains(&node) || !rng.gen_bool(0.5) {
            continue;
        }
        if let Some(path) = graph.shortest_path_within(&nodes, node, &union) {
            nodes.extend(path);
        }
    }

    let choices: BTreeMap<_, _> = nodes
        .iter()
        .filter_map(|&node| {
            fitter
                .choice(node)
                .or_else(|| other.choice(node))
                .map(|option| (node, option))
        })
        .collect();
    let satellites: BTreeMap<_, _> = nodes
        .iter()
        .filter_map(|node| {
            fitter
                .satellites()
                .get(node)
                .or_else(|| other.satellites().get(node))
                .map(|set| (*node, set.clone()))
        })
        .collect();

    let child = AllocationState::from_parts_unchecked(root, nodes, choices, satellites);
    debug_assert!(child.is_valid(graph), "crossover produced an invalid child");
    child
}

/// Grow `nodes` until every member is connected to `root`, stepping only
/// through `allowed`. Members that cannot be connected are dropped.
fn connect_within(graph: &GraphModel, root: NodeId, nodes: &mut BTreeSet<NodeId>, allowed: &BTreeSet<NodeId>) {
    loop {
        let reachable = graph.reachable_within(root, nodes);
        let Some(&stranded) = nodes.iter().find(|&&node| !reachable.contains(&node)) else {
            return;
        };
        match graph.shortest_path_within(&reachable, stranded, allowed) {
            Some(path) => nodes.extend(path),
            None => {
                nodes.remove(&stranded);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::fixtures::sample_tree;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state(graph: &GraphModel, nodes: &[NodeId]) -> AllocationState {
        AllocationState::from_nodes(graph, nodes.iter().copied(), BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_crossover_of_identical_parents_is_identity() {
        let graph = sample_tree();
        let parent = state(&graph, &[2, 3, 5, 6])
            .set_choice(&graph, 6, 102)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let child = crossover(&graph, &parent, &parent.clone(), &mut rng);
            assert_eq!(child, parent);
        }
    }

    #[test]
    fn test_crossover_children_stay_valid() {
        let graph = sample_tree();
        // disjoint branches below the root force closure through the union
        let left = state(&graph, &[2, 3, 4, 8, 10]);
        let right = state(&graph, &[5, 6, 7, 9])
            .set_choice(&graph, 6, 100)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..200 {
            let child = crossover(&graph, &right, &left, &mut rng);
            assert!(child.is_valid(&graph), "invalid child {:?}", child.nodes());
            let union: BTreeSet<_> = left.nodes().union(right.nodes()).copied().collect();
            assert!(child.nodes().is_subset(&union));
            if child.contains(6) {
                assert_eq!(child.choice(6), Some(100));
            }
        }
    }

    #[test]
    fn test_crossover_reconnects_common_nodes() {
        let graph = sample_tree();
        // both contain 4 but reach it through different sides of the cycle
        let west = state(&graph, &[2, 3, 4]);
        let east = state(&graph, &[5, 6, 7, 9, 4]);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..50 {
            let child = crossover(&graph, &west, &east, &mut rng);
            assert!(child.contains(4));
            assert!(child.is_valid(&graph));
        }
    }

    #[test]
    fn test_random_edits_respect_structure_and_budget() {
        let graph = sample_tree();
        let budget = BudgetConfig {
            max_points: 4,
            min_points: 1,
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut current = state(&graph, &[5]);

        for _ in 0..500 {
            if let Some(next) = random_edit(&graph, &current, &budget, &mut rng) {
                assert!(next.is_valid(&graph));
                assert!(next.point_cost() <= budget.max_points);
                assert!(next.point_cost() >= budget.min_points);
                current = next;
            }
        }
    }

    #[test]
    fn test_no_edit_available() {
        let graph = sample_tree();
        let budget = BudgetConfig {
            max_points: 0,
            min_points: 0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(random_edit(&graph, &AllocationState::rooted(&graph), &budget, &mut rng).is_none());
    }

    #[test]
    fn test_reroll_picks_a_different_option() {
        let graph = sample_tree();
        let budget = BudgetConfig {
            max_points: 2,
            min_points: 2,
        };
        let start = state(&graph, &[5, 6]).set_choice(&graph, 6, 100).unwrap();
        let mut rng = StdRng::seed_from_u64(9);

        // at the budget and at the floor only re-rolls remain
        for _ in 0..20 {
            let next = random_edit(&graph, &start, &budget, &mut rng).unwrap();
            assert_eq!(next.nodes(), start.nodes());
            assert_ne!(next.choice(6), Some(100));
        }
    }
}
