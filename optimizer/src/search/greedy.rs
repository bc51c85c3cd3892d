//! Greedy hill climbing
//!
//! Each iteration enumerates the single-step neighborhood of the current
//! allocation, scores it in one batch against the fixed baseline and applies the
//! best move if it beats the current fitness by more than the threshold.

use serde::Serialize;
use shared::{logging, process_debug, process_info, process_warn, NodeId, OptionId, ProcessId};

use crate::config::{BudgetConfig, GreedyConfig};
use crate::core::{AllocationState, GraphModel, NodeKind, ObjectiveWeights};
use crate::error::OptimizerResult;
use crate::search::score_candidates;
use crate::traits::BatchScorer;

/// One neighborhood step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    Remove(NodeId),
    Add(NodeId),
    Choose { node: NodeId, option: OptionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GreedyStopReason {
    /// The neighborhood was empty
    NoCandidates,
    IterationBudget,
    /// No candidate improved by more than the threshold
    BelowThreshold,
}

/// What happened in one iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub fitness_before: f64,
    pub best_candidate: Option<f64>,
    pub accepted: Option<Move>,
    pub scored: usize,
    /// Candidates lost to oracle rejections or worker failures
    pub dropped: usize,
    /// Candidates discarded locally for exceeding the budget
    pub over_budget: usize,
}

#[derive(Debug, Clone)]
pub struct GreedyOutcome {
    pub state: AllocationState,
    /// `None` when the search never contacted the oracle
    pub fitness: Option<f64>,
    pub iterations: usize,
    pub stop_reason: GreedyStopReason,
    pub trace: Vec<IterationRecord>,
}

/// Hill climber over single-node additions, removals and choice re-selections
pub struct GreedySearch<'a, S>
where
    S: BatchScorer + ?Sized,
{
    graph: &'a GraphModel,
    scorer: &'a S,
    config: GreedyConfig,
    budget: BudgetConfig,
    objective: ObjectiveWeights,
}

impl<'a, S> GreedySearch<'a, S>
where
    S: BatchScorer + ?Sized,
{
    pub fn new(
        graph: &'a GraphModel,
        scorer: &'a S,
        config: GreedyConfig,
        budget: BudgetConfig,
        objective: ObjectiveWeights,
    ) -> Self {
        Self {
            graph,
            scorer,
            config,
            budget,
            objective,
        }
    }

    /// Climb from `start`, scoring everything against `baseline`
    pub async fn run(&self, start: AllocationState, baseline: &AllocationState) -> OptimizerResult<GreedyOutcome> {
        start.validate(self.graph)?;

        if self.config.min_improvement == f64::INFINITY {
            process_debug!(
                ProcessId::current(),
                "⏭️ Greedy threshold {} can never be met, returning the start allocation",
                self.config.min_improvement
            );
            return Ok(GreedyOutcome {
                state: start,
                fitness: None,
                iterations: 0,
                stop_reason: GreedyStopReason::BelowThreshold,
                trace: Vec::new(),
            });
        }

        let mut current = start;
        let mut current_fitness = self.initial_fitness(&current, baseline).await?;
        let mut trace = Vec::new();
        let mut applied = 0;

        let stop_reason = loop {
            if applied >= self.config.max_iterations {
                break GreedyStopReason::IterationBudget;
            }

            let (moves, candidates, over_budget) = self.neighborhood(&current);
            if candidates.is_empty() {
                break GreedyStopReason::NoCandidates;
            }

            let fitness = score_candidates(self.scorer, &self.objective, baseline, &candidates).await?;
            let dropped = fitness.iter().filter(|f| f.is_none()).count();

            // strict comparison keeps the first candidate among equals
            let mut best: Option<(usize, f64)> = None;
            for (index, value) in fitness.iter().enumerate() {
                if let Some(value) = *value {
                    if best.map_or(true, |(_, best_value)| value > best_value) {
                        best = Some((index, value));
                    }
                }
            }

            let mut record = IterationRecord {
                iteration: trace.len(),
                fitness_before: current_fitness,
                best_candidate: best.map(|(_, value)| value),
                accepted: None,
                scored: candidates.len() - dropped,
                dropped,
                over_budget,
            };

            match best {
                Some((index, value)) if value - current_fitness > self.config.min_improvement => {
                    record.accepted = Some(moves[index]);
                    trace.push(record);
                    logging::log_progress(
                        ProcessId::current(),
                        &format!("Greedy iteration {applied}"),
                        &format!("{:?} {:.4} -> {:.4}", moves[index], current_fitness, value),
                    );
                    current = candidates.into_iter().nth(index).unwrap_or(current);
                    current_fitness = value;
                    applied += 1;
                }
                _ => {
                    trace.push(record);
                    break GreedyStopReason::BelowThreshold;
                }
            }
        };

        process_info!(
            ProcessId::current(),
            "🏁 Greedy search stopped after {} iterations ({:?}), fitness {:.4}",
            applied,
            stop_reason,
            current_fitness
        );

        Ok(GreedyOutcome {
            state: current,
            fitness: Some(current_fitness),
            iterations: applied,
            stop_reason,
            trace,
        })
    }

    /// Fitness of the starting point relative to the baseline.
    ///
    /// A start the oracle cannot score counts as negative infinity, so the first
    /// scored neighbor replaces it.
    async fn initial_fitness(&self, start: &AllocationState, baseline: &AllocationState) -> OptimizerResult<f64> {
        if start == baseline {
            return Ok(0.0);
        }
        let scored = score_candidates(self.scorer, &self.objective, baseline, std::slice::from_ref(start)).await?;
        match scored.into_iter().next().flatten() {
            Some(fitness) => Ok(fitness),
            None => {
                process_warn!(
                    ProcessId::current(),
                    "⚠️ Start allocation could not be scored, accepting the first scored neighbor"
                );
                Ok(f64::NEG_INFINITY)
            }
        }
    }

    /// Enumerate the neighborhood in order: removals, additions, choice changes.
    ///
    /// # Returns
    /// The moves, their resulting states, and how many were over budget
    fn neighborhood(&self, current: &AllocationState) -> (Vec<Move>, Vec<AllocationState>, usize) {
        let mut proposals: Vec<(Move, OptimizerResult<AllocationState>)> = Vec::new();

        if current.point_cost() > self.budget.min_points {
            for node in current.removable_nodes(self.graph) {
                proposals.push((Move::Remove(node), current.remove(self.graph, &[node])));
            }
        }

        for node in self.graph.unallocated_neighbors(current.nodes()) {
            proposals.push((Move::Add(node), current.add(self.graph, &[node])));
        }

        if self.config.include_choices {
            for &node in current.nodes() {
                if self.graph.kind(node) != Some(NodeKind::Choice) {
                    continue;
                }
                let menu = self.graph.choices().options(node).unwrap_or(&[]);
                for &option in menu {
                    if current.choice(node) != Some(option) {
                        proposals.push((
                            Move::Choose { node, option },
                            current.set_choice(self.graph, node, option),
                        ));
                    }
                }
            }
        }

        let mut moves = Vec::with_capacity(proposals.len());
        let mut states = Vec::with_capacity(proposals.len());
        let mut over_budget = 0;
        for (step, proposal) in proposals {
            let Ok(state) = proposal else { continue };
            if state.check_budget(&self.budget).is_err() {
                over_budget += 1;
                continue;
            }
            moves.push(step);
            states.push(state);
        }
        (moves, states, over_budget)
    }
}
