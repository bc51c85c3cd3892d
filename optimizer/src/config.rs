//! Optimizer configuration
//!
//! One explicit value passed to every component at construction time. All
//! sections deserialize with defaults, so a JSON file only needs the fields it
//! changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::objective::ObjectiveWeights;
use crate::error::{OptimizerError, OptimizerResult};

/// Complete configuration for a search run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub pool: PoolConfig,
    pub budget: BudgetConfig,
    pub objective: ObjectiveWeights,
    pub greedy: GreedyConfig,
    pub genetic: GeneticConfig,
    pub cluster: ClusterConfig,
}

/// Worker pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker processes
    pub size: usize,
    /// Per-call timeout in milliseconds
    pub call_timeout_ms: u64,
    /// How long a freshly spawned worker may take to report ready
    pub startup_timeout_ms: u64,
    /// Timeouts in a row after which the health check restarts a worker
    pub max_consecutive_timeouts: u32,
    /// Time a worker gets to exit after an `Exit` request before it is killed
    pub shutdown_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            call_timeout_ms: 30_000,
            startup_timeout_ms: 20_000,
            max_consecutive_timeouts: 3,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl PoolConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Point budget. Costs count allocated nodes other than the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_points: usize,
    /// Floor below which removals are not proposed
    pub min_points: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_points: 123,
            min_points: 0,
        }
    }
}

/// Hill-climbing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedyConfig {
    pub max_iterations: usize,
    /// Required fitness gain for a move to be applied
    pub min_improvement: f64,
    /// Also propose re-selecting options on allocated choice nodes
    pub include_choices: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            min_improvement: 0.01,
            include_choices: true,
        }
    }
}

/// Genetic search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub max_generations: usize,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    /// Minimum best-fitness gain over `convergence_window` generations
    pub convergence_epsilon: f64,
    pub convergence_window: usize,
    /// Upper bound of random edits applied to seed copies at initialization
    pub max_initial_edits: usize,
    /// Attempts at producing an in-budget child before copying a parent
    pub child_attempts: usize,
    pub seed: Option<u64>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 30,
            max_generations: 100,
            elite_count: 2,
            tournament_size: 3,
            crossover_rate: 0.8,
            mutation_rate: 0.3,
            convergence_epsilon: 1e-3,
            convergence_window: 10,
            max_initial_edits: 5,
            child_attempts: 8,
            seed: None,
        }
    }
}

/// Satellite subgraph solver parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Largest target count solved exactly; above it the greedy approximation runs
    pub exact_target_limit: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { exact_target_limit: 4 }
    }
}

impl GreedyConfig {
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.min_improvement.is_nan() {
            return Err(OptimizerError::config("greedy.min_improvement is NaN"));
        }
        Ok(())
    }
}

impl GeneticConfig {
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.population_size < 2 {
            return Err(OptimizerError::config("genetic.population_size must be at least 2"));
        }
        if self.elite_count >= self.population_size {
            return Err(OptimizerError::config(
                "genetic.elite_count must be smaller than genetic.population_size",
            ));
        }
        if self.tournament_size == 0 {
            return Err(OptimizerError::config("genetic.tournament_size must be at least 1"));
        }
        for (name, rate) in [
            ("genetic.crossover_rate", self.crossover_rate),
            ("genetic.mutation_rate", self.mutation_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(OptimizerError::config(format!("{name} must be within [0, 1]")));
            }
        }
        if self.convergence_window == 0 {
            return Err(OptimizerError::config("genetic.convergence_window must be at least 1"));
        }
        Ok(())
    }
}

impl ClusterConfig {
    /// Exhaustive search enumerates 2^n notable subsets
    pub const MAX_EXACT_TARGETS: usize = 12;

    pub fn validate(&self) -> OptimizerResult<()> {
        if self.exact_target_limit > Self::MAX_EXACT_TARGETS {
            return Err(OptimizerError::config(format!(
                "cluster.exact_target_limit above {} makes exact search intractable",
                Self::MAX_EXACT_TARGETS
            )));
        }
        Ok(())
    }
}

impl OptimizerConfig {
    /// Load a JSON configuration file and validate it
    pub fn load(path: &Path) -> OptimizerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: OptimizerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no search can run with
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.pool.size == 0 {
            return Err(OptimizerError::config("pool.size must be at least 1"));
        }
        if self.pool.call_timeout_ms == 0 || self.pool.startup_timeout_ms == 0 {
            return Err(OptimizerError::config("pool timeouts must be positive"));
        }
        if self.budget.min_points > self.budget.max_points {
            return Err(OptimizerError::config("budget.min_points exceeds budget.max_points"));
        }
        self.greedy.validate()?;
        self.genetic.validate()?;
        self.cluster.validate()?;
        Ok(())
    }
}
