//! Scalar objective over oracle deltas

use serde::{Deserialize, Serialize};
use shared::ScoreDeltas;
use std::collections::BTreeMap;

/// Linear weighting of the oracle's percentage deltas.
///
/// Missing extra metrics contribute nothing, so a weight on a metric the oracle
/// never reports is harmless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveWeights {
    pub throughput: f64,
    pub durability: f64,
    pub survivability: f64,
    pub extra: BTreeMap<String, f64>,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            throughput: 1.0,
            durability: 0.0,
            survivability: 0.0,
            extra: BTreeMap::new(),
        }
    }
}

impl ObjectiveWeights {
    pub fn fitness(&self, deltas: &ScoreDeltas) -> f64 {
        let primary = self.throughput * deltas.throughput
            + self.durability * deltas.durability
            + self.survivability * deltas.survivability;

        self.extra
            .iter()
            .filter_map(|(name, weight)| deltas.extra.get(name).map(|value| weight * value))
            .fold(primary, |total, term| total + term)
    }
}
