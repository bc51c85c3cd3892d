//! `BatchScorer` backed by the worker pool

use async_trait::async_trait;
use shared::EvaluationPair;
use std::sync::Arc;

use crate::core::AllocationState;
use crate::error::{OptimizerError, OptimizerResult};
use crate::services::worker_pool::{Evaluation, WorkerPool};
use crate::traits::{AllocationEncoder, BatchScorer, WorkerLauncher};

/// Encodes candidates and scores them on a shared [`WorkerPool`]
pub struct PoolScorer<L, E>
where
    L: WorkerLauncher + 'static,
    E: AllocationEncoder,
{
    pool: Arc<WorkerPool<L>>,
    encoder: E,
}

impl<L, E> PoolScorer<L, E>
where
    L: WorkerLauncher + 'static,
    E: AllocationEncoder,
{
    pub fn new(pool: Arc<WorkerPool<L>>, encoder: E) -> Self {
        Self { pool, encoder }
    }

    pub fn pool(&self) -> &Arc<WorkerPool<L>> {
        &self.pool
    }
}

#[async_trait]
impl<L, E> BatchScorer for PoolScorer<L, E>
where
    L: WorkerLauncher + 'static,
    E: AllocationEncoder,
{
    async fn score_batch(
        &self,
        baseline: &AllocationState,
        candidates: &[AllocationState],
    ) -> OptimizerResult<Vec<OptimizerResult<Evaluation>>> {
        let baseline = self.encoder.encode(baseline)?;

        // Candidates that fail to encode keep their slot in the output
        let mut results: Vec<Option<OptimizerResult<Evaluation>>> = Vec::with_capacity(candidates.len());
        let mut pairs = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.encoder.encode(candidate) {
                Ok(encoded) => {
                    pairs.push(EvaluationPair {
                        baseline: baseline.clone(),
                        candidate: encoded,
                    });
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let mut scored = self
            .pool
            .evaluate_batch(&pairs, self.pool.config().call_timeout())
            .await?
            .into_iter();

        Ok(results
            .into_iter()
            .map(|slot| match slot {
                Some(failed) => failed,
                None => scored
                    .next()
                    .unwrap_or_else(|| Err(OptimizerError::unavailable("batch result missing"))),
            })
            .collect())
    }
}
