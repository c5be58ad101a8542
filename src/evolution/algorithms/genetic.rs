use crate::evolution::algorithms::operators::{crossover, mutate, random_chromosome, tournament_selection};
use crate::evolution::algorithms::problem::{build_pool, evaluate_population, PortfolioProblem, Problem};
use crate::evolution::algorithms::{constrained_front, make_rng, Algorithm};
use crate::evolution::cache::EvaluationCache;
use crate::evolution::objective::{Constraints, Objective};
use crate::evolution::pareto::select_pareto;
use crate::evolution::result::{GenerationSummary, OptimisationResult};
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Site};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, info, warn};

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct GeneticAlgorithmConfig {
    pub population_size: usize,
    /// Evaluated generations, the initial population included.
    pub generations: usize,
    pub mutation_rate: Option<f64>,
    pub crossover_rate: f64,
    pub elitism_rate: f64,
    pub tournament_size: usize,
    /// Objective to optimise; the first requested one when unset.
    pub objective: Option<Objective>,
    pub seed: Option<u64>,
    pub max_concurrency: usize,
    pub record_history: bool,
}

impl Default for GeneticAlgorithmConfig {
    fn default() -> Self {
        GeneticAlgorithmConfig {
            population_size: 20,
            generations: 10,
            mutation_rate: None,
            crossover_rate: 0.9,
            elitism_rate: 0.1,
            tournament_size: 3,
            objective: None,
            seed: None,
            max_concurrency: default_max_concurrency(),
            record_history: true,
        }
    }
}

impl GeneticAlgorithmConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.population_size == 0 || self.generations == 0 {
            return Err("population_size and generations must be positive".into());
        }
        if self.tournament_size == 0 || self.max_concurrency == 0 {
            return Err("tournament_size and max_concurrency must be positive".into());
        }
        for (name, rate) in [
            ("crossover_rate", Some(self.crossover_rate)),
            ("elitism_rate", Some(self.elitism_rate)),
            ("mutation_rate", self.mutation_rate),
        ] {
            if let Some(rate) = rate {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(format!("{name} must lie in [0, 1]"));
                }
            }
        }
        if self.elite_count() >= self.population_size {
            return Err("elite population cannot fill the whole population".into());
        }
        Ok(())
    }

    fn elite_count(&self) -> usize {
        ((self.population_size as f64) * self.elitism_rate) as usize
    }
}

/// Feasibility first, then the objective as a cost. NaN counts as worst.
fn fitness_order(a: &PortfolioSolution, b: &PortfolioSolution, objective: Objective) -> Ordering {
    let cost = |s: &PortfolioSolution| {
        let c = objective.as_cost(s.metric(objective));
        if c.is_nan() {
            f64::INFINITY
        } else {
            c
        }
    };
    a.constraint_violation
        .max(0.0)
        .total_cmp(&b.constraint_violation.max(0.0))
        .then_with(|| cost(a).total_cmp(&cost(b)))
}

/// Single-objective elitist GA over the whole portfolio chromosome.
#[derive(Debug, Clone, Default)]
pub struct GeneticAlgorithm {
    pub config: GeneticAlgorithmConfig,
}

impl GeneticAlgorithm {
    pub fn new(config: GeneticAlgorithmConfig) -> Self {
        GeneticAlgorithm { config }
    }
}

impl Algorithm for GeneticAlgorithm {
    fn run(
        &self,
        objectives: &[Objective],
        constraints: &Constraints,
        portfolio: &[Site],
        existing_solutions: Option<&[PortfolioSolution]>,
        cache: &EvaluationCache,
    ) -> Result<OptimisationResult, EvolutionError> {
        let config = &self.config;
        let objective = config
            .objective
            .or_else(|| objectives.first().copied())
            .ok_or(EvolutionError::NoObjectives)?;
        config
            .validate()
            .map_err(EvolutionError::BadPopulationParameter)?;

        let started = Instant::now();

        let problem = PortfolioProblem::new(portfolio, constraints, cache)?;
        let genes = problem.space().genes();
        let pool = build_pool(config.max_concurrency)?;
        let mut rng = make_rng(config.seed);
        let mutation_rate = config.mutation_rate.unwrap_or_else(|| 1.0 / genes.len().max(1) as f64);
        let elite_count = config.elite_count();
        if elite_count == 0 && config.elitism_rate > 0.0 {
            warn!("elite population size rounded to 0, check population size and elitism rate");
        }

        let mut chromosomes = existing_solutions
            .map(|solutions| problem.encode_all(solutions))
            .unwrap_or_default();
        chromosomes.truncate(config.population_size);
        while chromosomes.len() < config.population_size {
            chromosomes.push(random_chromosome(genes, &mut rng));
        }

        let mut history = Vec::new();
        let mut population: Vec<(Vec<f64>, PortfolioSolution)> = Vec::new();

        for generation in 0..config.generations {
            let solutions = evaluate_population(&problem, &chromosomes, &pool)?;
            population.extend(chromosomes.drain(..).zip(solutions));
            population.sort_by(|a, b| fitness_order(&a.1, &b.1, objective));
            population.truncate(config.population_size);

            let snapshot: Vec<PortfolioSolution> = population.iter().map(|(_, s)| s.clone()).collect();
            let front_size = select_pareto(&snapshot, objectives).len();
            let summary = GenerationSummary::from_population(generation, &snapshot, front_size, problem.evaluations(), objectives);
            debug!(generation, evaluations = summary.evaluations, "generation complete");
            history.push(summary);

            if generation + 1 == config.generations {
                break;
            }

            // sorted best first, so a lower index wins
            let better = |a: usize, b: usize| a < b;
            let offspring_count = config.population_size - elite_count;
            chromosomes = (0..offspring_count)
                .map(|_| {
                    let first = tournament_selection(population.len(), config.tournament_size, &mut rng, better);
                    let second = tournament_selection(population.len(), config.tournament_size, &mut rng, better);
                    let mut child = crossover(
                        &population[first].0,
                        &population[second].0,
                        genes,
                        config.crossover_rate,
                        &mut rng,
                    );
                    mutate(&mut child, genes, mutation_rate, &mut rng);
                    child
                })
                .collect();
            // elites keep their place and evaluations; offspring join them next round
            population.truncate(elite_count);
        }

        let final_population: Vec<PortfolioSolution> = population.into_iter().map(|(_, s)| s).collect();
        let solutions = select_pareto(&constrained_front(final_population, objectives), objectives);
        info!(
            %objective,
            solutions = solutions.len(),
            evaluations = problem.evaluations(),
            "genetic algorithm finished"
        );

        OptimisationResult::new(
            solutions,
            problem.evaluations(),
            started.elapsed(),
            config.record_history.then_some(history),
        )
    }
}
