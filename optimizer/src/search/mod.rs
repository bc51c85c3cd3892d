//! Search strategies over allocations
//!
//! Both strategies score candidates in batches through a [`BatchScorer`] against
//! one fixed baseline, and share the genome operators in [`operators`].

pub mod genetic;
pub mod greedy;
pub mod operators;

pub use genetic::{GenerationStats, GeneticOutcome, GeneticSearch, GeneticStopReason, Individual, Population};
pub use greedy::{GreedyOutcome, GreedySearch, GreedyStopReason, IterationRecord, Move};

use shared::{process_debug, process_warn, ProcessId};

use crate::core::{AllocationState, ObjectiveWeights};
use crate::error::OptimizerResult;
use crate::services::Evaluation;
use crate::traits::BatchScorer;

/// Score `candidates` and reduce each to its fitness.
///
/// Candidates the oracle rejects or that were lost to a worker failure come back
/// as `None`. Only fatal pool failures end the search.
pub(crate) async fn score_candidates<S>(
    scorer: &S,
    objective: &ObjectiveWeights,
    baseline: &AllocationState,
    candidates: &[AllocationState],
) -> OptimizerResult<Vec<Option<f64>>>
where
    S: BatchScorer + ?Sized,
{
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let results = scorer.score_batch(baseline, candidates).await?;
    let mut fitness = Vec::with_capacity(results.len());
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(Evaluation::Scored(deltas)) => fitness.push(Some(objective.fitness(&deltas))),
            Ok(Evaluation::Rejected { message }) => {
                process_debug!(ProcessId::current(), "🚫 Candidate {} rejected by oracle: {}", index, message);
                fitness.push(None);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Candidate {} dropped: {}", index, e);
                fitness.push(None);
            }
        }
    }
    Ok(fitness)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic in-process scorer for search tests

    use async_trait::async_trait;
    use shared::{NodeId, ScoreDeltas};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::core::AllocationState;
    use crate::error::{OptimizerError, OptimizerResult};
    use crate::services::Evaluation;
    use crate::traits::BatchScorer;

    /// Throughput delta is the sum of per-node values (satellite nodes included),
    /// minus the baseline's sum.
    /// A chosen option adds its id divided by 100.
    #[derive(Default)]
    pub(crate) struct TableScorer {
        pub values: BTreeMap<NodeId, f64>,
        /// Candidates containing this node are rejected by the "oracle"
        pub poison: Option<NodeId>,
        pub batches: AtomicUsize,
        pub scored: AtomicUsize,
        pub seen: Mutex<Vec<AllocationState>>,
    }

    impl TableScorer {
        pub(crate) fn new(values: &[(NodeId, f64)]) -> Self {
            Self {
                values: values.iter().copied().collect(),
                ..Default::default()
            }
        }

        pub(crate) fn value(&self, state: &AllocationState) -> f64 {
            let nodes: f64 = state
                .nodes()
                .iter()
                .chain(state.satellites().values().flatten())
                .filter_map(|id| self.values.get(id))
                .sum();
            let options: f64 = state.choices().values().map(|&option| option as f64 / 100.0).sum();
            nodes + options
        }

        pub(crate) fn batches(&self) -> usize {
            self.batches.load(Ordering::SeqCst)
        }

        pub(crate) fn scored(&self) -> usize {
            self.scored.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchScorer for TableScorer {
        async fn score_batch(
            &self,
            baseline: &AllocationState,
            candidates: &[AllocationState],
        ) -> OptimizerResult<Vec<OptimizerResult<Evaluation>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.scored.fetch_add(candidates.len(), Ordering::SeqCst);
            self.seen.lock().unwrap().extend(candidates.iter().cloned());

            let base = self.value(baseline);
            Ok(candidates
                .iter()
                .map(|candidate| {
                    if self.poison.is_some_and(|node| candidate.contains(node)) {
                        return Ok(Evaluation::Rejected {
                            message: "poisoned".to_string(),
                        });
                    }
                    if candidate.is_empty() {
                        return Err(OptimizerError::unavailable("empty"));
                    }
                    Ok(Evaluation::Scored(ScoreDeltas::new(self.value(candidate) - base, 0.0, 0.0)))
                })
                .collect())
        }
    }
}
