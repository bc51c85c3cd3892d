//! Scoring oracle
//!
//! The worker binary hosts one oracle. The bundled [`WeightTableOracle`] prices
//! an allocation by summing per-node and per-option contributions from a JSON
//! table and reports percentage changes against the baseline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{AllocationSnapshot, NodeId, OptionId, ScoreDeltas};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Scores a candidate build against a baseline build
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    async fn score(&self, baseline: &AllocationSnapshot, candidate: &AllocationSnapshot) -> WorkerResult<ScoreDeltas>;
}

/// What one node or option adds to each metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contribution {
    pub throughput: f64,
    pub durability: f64,
    pub survivability: f64,
    pub extra: BTreeMap<String, f64>,
}

impl Contribution {
    fn accumulate(&self, totals: &mut Contribution) {
        totals.throughput += self.throughput;
        totals.durability += self.durability;
        totals.survivability += self.survivability;
        for (name, value) in &self.extra {
            *totals.extra.entry(name.clone()).or_insert(0.0) += value;
        }
    }
}

/// Contribution table loaded from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    /// Used for tree nodes without an entry in `nodes`
    pub default_node: Contribution,
    pub nodes: BTreeMap<NodeId, Contribution>,
    pub options: BTreeMap<OptionId, Contribution>,
    /// Nodes inside satellite clusters
    pub satellite_nodes: BTreeMap<NodeId, Contribution>,
    /// Value every metric starts from before contributions, keeps percentages finite
    pub base: f64,
    /// Candidates containing any of these nodes cannot be scored
    pub unscorable: BTreeSet<NodeId>,
    /// Artificial scoring latency
    pub delay_ms: u64,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            default_node: Contribution {
                throughput: 1.0,
                ..Default::default()
            },
            nodes: BTreeMap::new(),
            options: BTreeMap::new(),
            satellite_nodes: BTreeMap::new(),
            base: 100.0,
            unscorable: BTreeSet::new(),
            delay_ms: 0,
        }
    }
}

/// Oracle backed by a [`WeightTable`]
#[derive(Debug, Clone, Default)]
pub struct WeightTableOracle {
    table: WeightTable,
}

impl WeightTableOracle {
    pub fn new(table: WeightTable) -> WorkerResult<Self> {
        if !table.base.is_finite() || table.base <= 0.0 {
            return Err(WorkerError::config("weight table base must be positive"));
        }
        Ok(Self { table })
    }

    pub fn load(path: &Path) -> WorkerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let table: WeightTable = serde_json::from_str(&text)?;
        Self::new(table)
    }

    /// Metric totals of one build, starting from the table base
    fn totals(&self, build: &AllocationSnapshot) -> Contribution {
        let mut totals = Contribution {
            throughput: self.table.base,
            durability: self.table.base,
            survivability: self.table.base,
            extra: BTreeMap::new(),
        };
        for node in &build.nodes {
            self.table
                .nodes
                .get(node)
                .unwrap_or(&self.table.default_node)
                .accumulate(&mut totals);
        }
        for option in build.choices.values() {
            if let Some(contribution) = self.table.options.get(option) {
                contribution.accumulate(&mut totals);
            }
        }
        for node in build.satellites.values().flatten() {
            if let Some(contribution) = self.table.satellite_nodes.get(node) {
                contribution.accumulate(&mut totals);
            }
        }
        totals
    }
}

/// Percentage change from `before` to `after`
fn percent_change(before: f64, after: f64) -> WorkerResult<f64> {
    if before <= 0.0 {
        return Err(WorkerError::unscorable(format!("baseline metric {before} is not positive")));
    }
    Ok((after - before) / before * 100.0)
}

#[async_trait]
impl ScoringOracle for WeightTableOracle {
    async fn score(&self, baseline: &AllocationSnapshot, candidate: &AllocationSnapshot) -> WorkerResult<ScoreDeltas> {
        if let Some(node) = candidate.nodes.iter().find(|node| self.table.unscorable.contains(node)) {
            return Err(WorkerError::unscorable(format!("node {node} has no model")));
        }
        if self.table.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.table.delay_ms)).await;
        }

        let before = self.totals(baseline);
        let after = self.totals(candidate);

        let mut deltas = ScoreDeltas::new(
            percent_change(before.throughput, after.throughput)?,
            percent_change(before.durability, after.durability)?,
            percent_change(before.survivability, after.survivability)?,
        );
        let names: BTreeSet<&String> = before.extra.keys().chain(after.extra.keys()).collect();
        for name in names {
            let from = self.table.base + before.extra.get(name).copied().unwrap_or(0.0);
            let to = self.table.base + after.extra.get(name).copied().unwrap_or(0.0);
            deltas.extra.insert(name.clone(), percent_change(from, to)?);
        }
        Ok(deltas)
    }
}
