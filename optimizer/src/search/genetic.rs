//! Generational genetic search over allocations
//!
//! # Algorithm Overview
//!
//! 1. **Initialize** - the seed allocation plus copies of it with 1..=k random edits
//! 2. **Evaluate** - score every individual without a cached fitness in one batch
//! 3. **Elitism** - the top `elite_count` scored individuals survive unchanged,
//!    keeping their cached fitness, so the best fitness never decreases
//! 4. **Tournament selection** - sample `tournament_size` individuals, keep the fittest
//! 5. **Crossover / mutation** - see [`operators`](crate::search::operators)
//! 6. **Budget filter** - over-budget children are regenerated before scoring
//!
//! The run stops after `max_generations` or once the best fitness has gained
//! less than `convergence_epsilon` over the last `convergence_window` generations.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use shared::{logging, process_debug, process_info, ProcessId};
use std::cmp::Ordering;

use crate::config::{BudgetConfig, GeneticConfig};
use crate::core::{AllocationState, GraphModel, ObjectiveWeights};
use crate::error::{OptimizerError, OptimizerResult};
use crate::search::operators::{crossover, random_edit};
use crate::search::score_candidates;
use crate::traits::BatchScorer;

/// A candidate allocation and what is known about it
#[derive(Debug, Clone)]
pub struct Individual {
    pub id: u64,
    pub state: AllocationState,
    /// `None` until scored, and for candidates the oracle could not score
    pub fitness: Option<f64>,
    /// Generation the individual was created in
    pub generation: usize,
    pub parents: Option<(u64, u64)>,
}

/// Fitness summary of one generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub best: Option<f64>,
    pub worst: Option<f64>,
    pub mean: Option<f64>,
    /// Individuals scored by the oracle in this generation
    pub scored: usize,
}

/// Individuals of the current generation and the run's history
#[derive(Debug, Clone)]
pub struct Population {
    pub individuals: Vec<Individual>,
    pub baseline: AllocationState,
    pub stats: Vec<GenerationStats>,
}

impl Population {
    fn summarize(&self, generation: usize, scored: usize) -> GenerationStats {
        let values: Vec<f64> = self.individuals.iter().filter_map(|ind| ind.fitness).collect();
        let best = values.iter().copied().reduce(f64::max);
        let worst = values.iter().copied().reduce(f64::min);
        let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
        GenerationStats {
            generation,
            best,
            worst,
            mean,
            scored,
        }
    }

    /// Indices ordered best first; unscored individuals last, ties by id
    fn ranking(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.individuals.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&self.individuals[a], &self.individuals[b]);
            compare_fitness(b.fitness, a.fitness).then(a.id.cmp(&b.id))
        });
        order
    }
}

/// Total order on optional fitness where `None` ranks below every score
fn compare_fitness(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneticStopReason {
    GenerationBudget,
    Converged,
}

#[derive(Debug, Clone)]
pub struct GeneticOutcome {
    /// Best individual seen in any generation
    pub best: Individual,
    pub history: Vec<GenerationStats>,
    pub generations: usize,
    pub stop_reason: GeneticStopReason,
}

/// Genetic search driven by a [`BatchScorer`]
pub struct GeneticSearch<'a, S>
where
    S: BatchScorer + ?Sized,
{
    graph: &'a GraphModel,
    scorer: &'a S,
    config: GeneticConfig,
    budget: BudgetConfig,
    objective: ObjectiveWeights,
}

impl<'a, S> GeneticSearch<'a, S>
where
    S: BatchScorer + ?Sized,
{
    pub fn new(
        graph: &'a GraphModel,
        scorer: &'a S,
        config: GeneticConfig,
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

    /// Evolve a population grown from `seed`, scoring against `baseline`
    pub async fn run(&self, seed: AllocationState, baseline: &AllocationState) -> OptimizerResult<GeneticOutcome> {
        self.config.validate()?;
        seed.validate(self.graph)?;
        seed.check_budget(&self.budget)?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut next_id = 0u64;
        let mut population = self.initialize(seed, baseline.clone(), &mut next_id, &mut rng);
        let mut best_ever: Option<Individual> = None;
        let mut generation = 0;

        let stop_reason = loop {
            let scored = self.evaluate(&mut population).await?;
            let stats = population.summarize(generation, scored);
            logging::log_progress(
                ProcessId::current(),
                &format!("Generation {generation}"),
                &format!("best {:?} mean {:?} ({} scored)", stats.best, stats.mean, scored),
            );
            population.stats.push(stats);

            if let Some(&leader) = population.ranking().first() {
                let leader = &population.individuals[leader];
                let improves = best_ever
                    .as_ref()
                    .map_or(true, |best| compare_fitness(leader.fitness, best.fitness) == Ordering::Greater);
                if improves {
                    best_ever = Some(leader.clone());
                }
            }

            generation += 1;
            if self.converged(&population.stats) {
                break GeneticStopReason::Converged;
            }
            if generation >= self.config.max_generations {
                break GeneticStopReason::GenerationBudget;
            }
            population = self.breed(&population, generation, &mut next_id, &mut rng);
        };

        let best = best_ever.ok_or_else(|| OptimizerError::validation("population was empty"))?;
        process_info!(
            ProcessId::current(),
            "🏁 Genetic search stopped after {} generations ({:?}), best fitness {:?}",
            generation,
            stop_reason,
            best.fitness
        );

        Ok(GeneticOutcome {
            best,
            history: population.stats,
            generations: generation,
            stop_reason,
        })
    }

    /// Seed first, then seed copies with random edits
    fn initialize(
        &self,
        seed: AllocationState,
        baseline: AllocationState,
        next_id: &mut u64,
        rng: &mut StdRng,
    ) -> Population {
        let max_edits = self.config.max_initial_edits.max(1);
        let mut individuals = Vec::with_capacity(self.config.population_size);

        for index in 0..self.config.population_size {
            let mut state = seed.clone();
            if index > 0 {
                for _ in 0..rng.gen_range(1..=max_edits) {
                    if let Some(edited) = random_edit(self.graph, &state, &self.budget, rng) {
                        state = edited;
                    }
                }
            }
            individuals.push(Individual {
                id: take_id(next_id),
                state,
                fitness: None,
                generation: 0,
                parents: None,
            });
        }

        Population {
            individuals,
            baseline,
            stats: Vec::new(),
        }
    }

    /// Score every individual without a cached fitness
    ///
    /// # Returns
    /// How many individuals got a score
    async fn evaluate(&self, population: &mut Population) -> OptimizerResult<usize> {
        let pending: Vec<usize> = population
            .individuals
            .iter()
            .enumerate()
            .filter(|(_, ind)| ind.fitness.is_none())
            .map(|(index, _)| index)
            .collect();
        let states: Vec<AllocationState> = pending
            .iter()
            .map(|&index| population.individuals[index].state.clone())
            .collect();

        let fitness = score_candidates(self.scorer, &self.objective, &population.baseline, &states).await?;
        let mut scored = 0;
        for (index, value) in pending.into_iter().zip(fitness) {
            scored += usize::from(value.is_some());
            population.individuals[index].fitness = value;
        }
        Ok(scored)
    }

    fn converged(&self, history: &[GenerationStats]) -> bool {
        let window = self.config.convergence_window;
        if history.len() <= window {
            return false;
        }
        let best_so_far = |stats: &[GenerationStats]| {
            stats
                .iter()
                .filter_map(|s| s.best)
                .reduce(f64::max)
        };
        match (best_so_far(history), best_so_far(&history[..history.len() - window])) {
            (Some(now), Some(then)) => now - then < self.config.convergence_epsilon,
            _ => false,
        }
    }

    /// Next generation: elites carried over, the rest bred from tournaments
    fn breed(&self, population: &Population, generation: usize, next_id: &mut u64, rng: &mut StdRng) -> Population {
        let ranking = population.ranking();
        let mut individuals: Vec<Individual> = ranking
            .iter()
            .map(|&index| &population.individuals[index])
            .filter(|ind| ind.fitness.is_some())
            .take(self.config.elite_count)
            .cloned()
            .collect();

        while individuals.len() < self.config.population_size {
            let first = self.tournament(population, rng);
            let second = self.tournament(population, rng);
            individuals.push(self.make_child(first, second, generation, next_id, rng));
        }

        Population {
            individuals,
            baseline: population.baseline.clone(),
            stats: population.stats.clone(),
        }
    }

    fn tournament<'p>(&self, population: &'p Population, rng: &mut StdRng) -> &'p Individual {
        let mut winner = &population.individuals[rng.gen_range(0..population.individuals.len())];
        for _ in 1..self.config.tournament_size {
            let challenger = &population.individuals[rng.gen_range(0..population.individuals.len())];
            if compare_fitness(challenger.fitness, winner.fitness) == Ordering::Greater {
                winner = challenger;
            }
        }
        winner
    }

    /// Produce one in-budget child, falling back to a copy of `first`
    fn make_child(
        &self,
        first: &Individual,
        second: &Individual,
        generation: usize,
        next_id: &mut u64,
        rng: &mut StdRng,
    ) -> Individual {
        let (fitter, other) = if compare_fitness(second.fitness, first.fitness) == Ordering::Greater {
            (second, first)
        } else {
            (first, second)
        };

        let mut child_state = None;
        for attempt in 0..self.config.child_attempts.max(1) {
            let mut state = if rng.gen_bool(self.config.crossover_rate) {
                crossover(self.graph, &fitter.state, &other.state, rng)
            } else {
                first.state.clone()
            };
            if rng.gen_bool(self.config.mutation_rate) {
                if let Some(mutated) = random_edit(self.graph, &state, &self.budget, rng) {
                    state = mutated;
                }
            }
            match state.check_budget(&self.budget) {
                Ok(()) => {
                    child_state = Some(state);
                    break;
                }
                Err(e) => {
                    process_debug!(ProcessId::current(), "✂️ Child attempt {} discarded: {}", attempt, e);
                }
            }
        }
        let state = child_state.unwrap_or_else(|| first.state.clone());

        // an unchanged copy of a parent keeps that parent's score
        let fitness = [first, second]
            .into_iter()
            .find(|parent| parent.state == state)
            .and_then(|parent| parent.fitness);

        Individual {
            id: take_id(next_id),
            state,
            fitness,
            generation,
            parents: Some((first.id, second.id)),
        }
    }
}

fn take_id(next_id: &mut u64) -> u64 {
    let id = *next_id;
    *next_id += 1;
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::fixtures::{line, sample_tree};
    use crate::search::testing::TableScorer;
    use crate::traits::MockBatchScorer;
    use std::collections::BTreeMap;

    fn config(seed: u64) -> GeneticConfig {
        GeneticConfig {
            population_size: 12,
            max_generations: 15,
            elite_count: 2,
            tournament_size: 3,
            crossover_rate: 0.8,
            mutation_rate: 0.5,
            convergence_epsilon: 1e-9,
            convergence_window: 100,
            max_initial_edits: 4,
            child_attempts: 8,
            seed: Some(seed),
        }
    }

    fn budget(max_points: usize) -> BudgetConfig {
        BudgetConfig {
            max_points,
            min_points: 0,
        }
    }

    fn values() -> TableScorer {
        TableScorer::new(&[(2, 1.0), (3, 2.0), (4, 4.0), (5, 0.5), (6, 0.5), (7, 3.0), (8, -1.0), (9, 1.0), (10, 2.0)])
    }

    #[tokio::test]
    async fn test_out_of_range_rates_fail_before_scoring() {
        let graph = line(4);
        let seed = AllocationState::rooted(&graph);
        let mut scorer = MockBatchScorer::new();
        scorer.expect_score_batch().never();

        for (crossover_rate, mutation_rate) in [(1.5, 0.3), (0.8, -0.1)] {
            let cfg = GeneticConfig {
                crossover_rate,
                mutation_rate,
                ..config(1)
            };
            let result = GeneticSearch::new(&graph, &scorer, cfg, budget(3), ObjectiveWeights::default())
                .run(seed.clone(), &seed)
                .await;
            assert!(matches!(result, Err(OptimizerError::ConfigurationError { .. })));
        }
    }

    #[tokio::test]
    async fn test_best_fitness_never_decreases() {
        let graph = sample_tree();
        let scorer = values();
        let seed = AllocationState::rooted(&graph);

        let outcome = GeneticSearch::new(&graph, &scorer, config(17), budget(5), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await
            .unwrap();

        let bests: Vec<f64> = outcome.history.iter().map(|s| s.best.unwrap()).collect();
        assert_eq!(bests.len(), 15);
        for pair in bests.windows(2) {
            assert!(pair[1] >= pair[0], "best fitness dropped: {bests:?}");
        }
        assert_eq!(outcome.best.fitness, bests.last().copied());
        assert!(outcome.best.state.is_valid(&graph));
        assert!(outcome.best.state.point_cost() <= 5);
    }

    #[tokio::test]
    async fn test_every_scored_candidate_is_valid_and_in_budget() {
        let graph = sample_tree();
        let scorer = values();
        let seed = AllocationState::from_nodes(&graph, [5, 6], BTreeMap::from([(6, 100)])).unwrap();

        GeneticSearch::new(&graph, &scorer, config(3), budget(4), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await
            .unwrap();

        let seen = scorer.seen.lock().unwrap();
        assert!(!seen.is_empty());
        for state in seen.iter() {
            assert!(state.is_valid(&graph), "invalid candidate {:?}", state.nodes());
            assert!(state.point_cost() <= 4);
        }
    }

    #[tokio::test]
    async fn test_elites_are_not_rescored() {
        let graph = line(6);
        let scorer = TableScorer::new(&[(2, 1.0), (3, 1.0), (4, 1.0)]);
        let seed = AllocationState::rooted(&graph);
        let mut cfg = config(5);
        cfg.max_generations = 4;
        cfg.population_size = 6;

        let outcome = GeneticSearch::new(&graph, &scorer, cfg, budget(3), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await
            .unwrap();

        assert!(scorer.batches() <= 4);
        // generation 0 scores everyone, later ones at most the non-elites
        assert!(scorer.scored() <= 6 + 3 * 4);
        assert_eq!(outcome.history[0].scored, 6);
    }

    #[tokio::test]
    async fn test_flat_landscape_converges_early() {
        let graph = line(4);
        let scorer = TableScorer::new(&[]);
        let seed = AllocationState::rooted(&graph);
        let mut cfg = config(9);
        cfg.convergence_window = 3;
        cfg.convergence_epsilon = 1e-3;
        cfg.max_generations = 50;

        let outcome = GeneticSearch::new(&graph, &scorer, cfg, budget(3), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await
            .unwrap();

        assert_eq!(outcome.stop_reason, GeneticStopReason::Converged);
        assert_eq!(outcome.generations, 4);
    }

    #[tokio::test]
    async fn test_same_seed_same_result() {
        let graph = sample_tree();
        let seed = AllocationState::rooted(&graph);

        let first_scorer = values();
        let first = GeneticSearch::new(&graph, &first_scorer, config(42), budget(5), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await
            .unwrap();
        let second_scorer = values();
        let second = GeneticSearch::new(&graph, &second_scorer, config(42), budget(5), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await
            .unwrap();

        assert_eq!(first.best.state, second.best.state);
        assert_eq!(first.history, second.history);
    }

    #[tokio::test]
    async fn test_over_budget_seed_is_rejected() {
        let graph = line(5);
        let seed = AllocationState::from_nodes(&graph, [2, 3, 4], BTreeMap::new()).unwrap();
        let scorer = MockBatchScorer::new();

        let result = GeneticSearch::new(&graph, &scorer, config(1), budget(2), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await;
        assert!(matches!(result, Err(OptimizerError::BudgetExceeded { cost: 3, budget: 2 })));
    }

    #[tokio::test]
    async fn test_fatal_pool_failure_ends_the_run() {
        let graph = line(5);
        let seed = AllocationState::rooted(&graph);
        let mut scorer = MockBatchScorer::new();
        scorer
            .expect_score_batch()
            .times(1)
            .returning(|_, _| Err(OptimizerError::NoLiveWorkers));

        let result = GeneticSearch::new(&graph, &scorer, config(1), budget(3), ObjectiveWeights::default())
            .run(seed.clone(), &seed)
            .await;
        assert!(matches!(result, Err(OptimizerError::NoLiveWorkers)));
    }
}
