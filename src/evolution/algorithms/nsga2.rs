use crate::evolution::algorithms::operators::{crossover, mutate, random_chromosome, tournament_selection};
use crate::evolution::algorithms::problem::{build_pool, evaluate_population, PortfolioProblem, Problem};
use crate::evolution::algorithms::{make_rng, Algorithm};
use crate::evolution::cache::EvaluationCache;
use crate::evolution::objective::{Constraints, Objective};
use crate::evolution::pareto::{build_pareto_fronts, crowding_distances, select_pareto};
use crate::evolution::result::{GenerationSummary, OptimisationResult};
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Site};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Nsga2Config {
    pub population_size: usize,
    /// Evaluated generations, the initial population included. Every
    /// generation evaluates at most `population_size` candidates.
    pub generations: usize,
    /// Per-gene mutation probability; defaults to one over the chromosome length.
    pub mutation_rate: Option<f64>,
    pub crossover_rate: f64,
    pub tournament_size: usize,
    pub seed: Option<u64>,
    pub max_concurrency: usize,
    pub record_history: bool,
}

impl Default for Nsga2Config {
    fn default() -> Self {
        Nsga2Config {
            population_size: 20,
            generations: 10,
            mutation_rate: None,
            crossover_rate: 0.9,
            tournament_size: 2,
            seed: None,
            max_concurrency: default_max_concurrency(),
            record_history: true,
        }
    }
}

impl Nsga2Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.population_size == 0 {
            return Err("population_size must be positive".into());
        }
        if self.generations == 0 {
            return Err("generations must be positive".into());
        }
        if self.tournament_size == 0 {
            return Err("tournament_size must be positive".into());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.crossover_rate) {
            return Err("crossover_rate must lie in [0, 1]".into());
        }
        if let Some(rate) = self.mutation_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err("mutation_rate must lie in [0, 1]".into());
            }
        }
        Ok(())
    }

    pub(crate) fn mutation_rate_for(&self, n_genes: usize) -> f64 {
        self.mutation_rate
            .unwrap_or_else(|| 1.0 / n_genes.max(1) as f64)
    }
}

#[derive(Debug, Clone)]
struct Member {
    chromosome: Vec<f64>,
    solution: PortfolioSolution,
    rank: usize,
    crowding: f64,
}

pub(crate) struct Outcome {
    /// Rank-0 members of the final population.
    pub front: Vec<PortfolioSolution>,
    pub history: Vec<GenerationSummary>,
}

/// Keeps the best `mu` members by (front rank, crowding distance) and
/// writes both back into the survivors.
fn survive(members: Vec<Member>, objectives: &[Objective], mu: usize) -> Vec<Member> {
    let costs: Vec<Vec<f64>> = members
        .iter()
        .map(|m| m.solution.costs(objectives))
        .collect();
    let violations: Vec<f64> = members
        .iter()
        .map(|m| m.solution.constraint_violation)
        .collect();

    // take members out as they survive so each one moves exactly once
    let mut slots: Vec<Option<Member>> = members.into_iter().map(Some).collect();
    let mut survivors = Vec::with_capacity(mu);

    for (rank, front) in build_pareto_fronts(&costs, &violations).into_iter().enumerate() {
        if survivors.len() >= mu {
            break;
        }
        let distances = crowding_distances(&front, &costs);
        let mut ranked: Vec<(usize, f64)> = front.into_iter().zip(distances).collect();
        // the front that overflows is cut by crowding, most isolated first,
        // so the boundary points (infinite distance) always make it through
        if survivors.len() + ranked.len() > mu {
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked.truncate(mu - survivors.len());
        }
        for (index, crowding) in ranked {
            if let Some(mut member) = slots[index].take() {
                member.rank = rank;
                member.crowding = crowding;
                survivors.push(member);
            }
        }
    }

    survivors
}

/// Drops members whose decoded portfolios coincide, keeping the first.
fn dedupe(members: &mut Vec<Member>) {
    let mut seen = HashSet::new();
    members.retain(|m| seen.insert(m.solution.clone()));
}

fn evaluate_members(
    problem: &dyn Problem,
    chromosomes: Vec<Vec<f64>>,
    pool: &rayon::ThreadPool,
) -> Result<Vec<Member>, EvolutionError> {
    let solutions = evaluate_population(problem, &chromosomes, pool)?;
    Ok(chromosomes
        .into_iter()
        .zip(solutions)
        .map(|(chromosome, solution)| Member {
            chromosome,
            solution,
            rank: 0,
            crowding: 0.0,
        })
        .collect())
}

fn summarise(
    generation: usize,
    population: &[Member],
    evaluations: usize,
    objectives: &[Objective],
) -> GenerationSummary {
    let solutions: Vec<PortfolioSolution> = population.iter().map(|m| m.solution.clone()).collect();
    let front_size = population.iter().filter(|m| m.rank == 0).count();
    GenerationSummary::from_population(generation, &solutions, front_size, evaluations, objectives)
}

/// mu+lambda NSGA-II over an arbitrary [`Problem`].
///
/// `seeds` are warm-start chromosomes; they are clipped into the gene bounds
/// and fill the initial population before random members do. The initial
/// population is generation 0 and counts against `config.generations`, so
/// at most `population_size * generations` candidates are evaluated.
/// `evaluations` reports the fresh evaluations so far and only feeds the history.
pub(crate) fn evolve(
    problem: &dyn Problem,
    objectives: &[Objective],
    config: &Nsga2Config,
    seeds: Vec<Vec<f64>>,
    evaluations: &dyn Fn() -> usize,
) -> Result<Outcome, EvolutionError> {
    if objectives.is_empty() {
        return Err(EvolutionError::NoObjectives);
    }
    config
        .validate()
        .map_err(EvolutionError::BadPopulationParameter)?;

    let genes = problem.genes();
    let pool = build_pool(config.max_concurrency)?;
    let mut rng = make_rng(config.seed);
    let mu = config.population_size;
    let mutation_rate = config.mutation_rate_for(genes.len());

    // nothing to search: the one fixed configuration is the answer
    if genes.is_empty() {
        let members = evaluate_members(problem, vec![vec![]], &pool)?;
        let history = vec![summarise(0, &members, evaluations(), objectives)];
        return Ok(Outcome {
            front: members.into_iter().map(|m| m.solution).collect(),
            history,
        });
    }

    let mut chromosomes: Vec<Vec<f64>> = seeds
        .into_iter()
        .filter(|seed| seed.len() == genes.len())
        .map(|seed| {
            seed.iter()
                .zip(genes)
                .map(|(value, gene)| gene.clip(*value))
                .collect()
        })
        .take(mu)
        .collect();
    if !chromosomes.is_empty() {
        debug!(seeds = chromosomes.len(), "warm-starting population");
    }
    while chromosomes.len() < mu {
        chromosomes.push(random_chromosome(genes, &mut rng));
    }

    let mut population = evaluate_members(problem, chromosomes, &pool)?;
    dedupe(&mut population);
    population = survive(population, objectives, mu);

    let mut history = vec![summarise(0, &population, evaluations(), objectives)];

    for generation in 1..config.generations {
        let better = |a: usize, b: usize| {
            let (a, b) = (&population[a], &population[b]);
            a.rank < b.rank || (a.rank == b.rank && a.crowding > b.crowding)
        };

        let offspring: Vec<Vec<f64>> = (0..mu)
            .map(|_| {
                let first = tournament_selection(population.len(), config.tournament_size, &mut rng, better);
                let second = tournament_selection(population.len(), config.tournament_size, &mut rng, better);
                let mut child = crossover(
                    &population[first].chromosome,
                    &population[second].chromosome,
                    genes,
                    config.crossover_rate,
                    &mut rng,
                );
                mutate(&mut child, genes, mutation_rate, &mut rng);
                child
            })
            .collect();

        let mut combined = std::mem::take(&mut population);
        combined.extend(evaluate_members(problem, offspring, &pool)?);
        dedupe(&mut combined);
        population = survive(combined, objectives, mu);

        let summary = summarise(generation, &population, evaluations(), objectives);
        debug!(
            generation,
            front_size = summary.front_size,
            feasible = summary.feasible_count,
            evaluations = summary.evaluations,
            "generation complete"
        );
        history.push(summary);
    }

    Ok(Outcome {
        front: population
            .into_iter()
            .filter(|m| m.rank == 0)
            .map(|m| m.solution)
            .collect(),
        history,
    })
}

/// Multi-objective search over the whole portfolio chromosome.
#[derive(Debug, Clone, Default)]
pub struct Nsga2 {
    pub config: Nsga2Config,
}

impl Nsga2 {
    pub fn new(config: Nsga2Config) -> Self {
        Nsga2 { config }
    }
}

impl Algorithm for Nsga2 {
    fn run(
        &self,
        objectives: &[Objective],
        constraints: &Constraints,
        portfolio: &[Site],
        existing_solutions: Option<&[PortfolioSolution]>,
        cache: &EvaluationCache,
    ) -> Result<OptimisationResult, EvolutionError> {
        let started = Instant::now();

        let problem = PortfolioProblem::new(portfolio, constraints, cache)?;
        let seeds = existing_solutions
            .map(|solutions| problem.encode_all(solutions))
            .unwrap_or_default();

        let outcome = evolve(&problem, objectives, &self.config, seeds, &|| problem.evaluations())?;
        let solutions = select_pareto(&outcome.front, objectives);
        info!(
            sites = portfolio.len(),
            solutions = solutions.len(),
            evaluations = problem.evaluations(),
            "nsga2 finished"
        );

        OptimisationResult::new(
            solutions,
            problem.evaluations(),
            started.elapsed(),
            self.config.record_history.then_some(outcome.history),
        )
    }
}
