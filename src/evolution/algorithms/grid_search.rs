use crate::evolution::algorithms::problem::{build_pool, evaluate_population, PortfolioProblem, Problem};
use crate::evolution::algorithms::search_space::Gene;
use crate::evolution::algorithms::{constrained_front, make_rng, Algorithm};
use crate::evolution::cache::EvaluationCache;
use crate::evolution::objective::{Constraints, Objective};
use crate::evolution::pareto::select_pareto;
use crate::evolution::result::{GenerationSummary, OptimisationResult};
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Site};
use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info};

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct GridSearchConfig {
    /// Grids larger than this are sampled instead of enumerated.
    pub max_evaluations: usize,
    /// Points per continuous gene, bounds included.
    pub continuous_steps: usize,
    pub seed: Option<u64>,
    pub max_concurrency: usize,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        GridSearchConfig {
            max_evaluations: 1000,
            continuous_steps: 5,
            seed: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl GridSearchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_evaluations == 0 {
            return Err("max_evaluations must be positive".into());
        }
        if self.continuous_steps == 0 {
            return Err("continuous_steps must be positive".into());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be positive".into());
        }
        Ok(())
    }
}

/// Discrete values a gene takes on the grid. Values are computed on demand,
/// so a wide integer gene costs nothing until a point is drawn from it.
#[derive(Debug, Clone, Copy)]
struct Axis {
    gene: Gene,
    len: usize,
}

impl Axis {
    fn new(gene: Gene, continuous_steps: usize) -> Self {
        let len = match gene {
            Gene::Integer { lower, upper } => {
                let span = i128::from(upper) - i128::from(lower) + 1;
                if span <= 0 {
                    0
                } else {
                    usize::try_from(span).unwrap_or(usize::MAX)
                }
            }
            Gene::Continuous { .. } => continuous_steps,
        };
        Axis { gene, len }
    }

    fn value(&self, k: usize) -> f64 {
        match self.gene {
            Gene::Integer { lower, .. } => (lower + k as i64) as f64,
            Gene::Continuous { lower, upper } => {
                if self.len == 1 {
                    return lower;
                }
                // pin the last point to the bound instead of accumulating rounding
                if k + 1 == self.len {
                    return upper;
                }
                let width = (upper - lower) / (self.len - 1) as f64;
                lower + width * k as f64
            }
        }
    }

    fn values(&self) -> impl Iterator<Item = f64> + Clone {
        let axis = *self;
        (0..axis.len).map(move |k| axis.value(k))
    }
}

/// Every grid point when the grid fits in `limit`, otherwise up to `limit`
/// distinct points drawn at random.
fn grid_points<R: Rng + ?Sized>(axes: &[Axis], limit: usize, rng: &mut R) -> Vec<Vec<f64>> {
    if axes.is_empty() {
        return vec![vec![]];
    }
    if axes.iter().any(|axis| axis.len == 0) {
        return Vec::new();
    }

    // overflow means the grid is far too big to enumerate anyway
    let size = axes
        .iter()
        .try_fold(1usize, |acc, axis| acc.checked_mul(axis.len));
    if matches!(size, Some(size) if size <= limit) {
        return axes
            .iter()
            .map(Axis::values)
            .multi_cartesian_product()
            .collect();
    }

    let mut seen: HashSet<Vec<usize>> = HashSet::with_capacity(limit);
    let mut points = Vec::with_capacity(limit);
    let mut attempts = 0;
    while points.len() < limit && attempts < limit.saturating_mul(20) {
        attempts += 1;
        let indices: Vec<usize> = axes.iter().map(|axis| rng.gen_range(0..axis.len)).collect();
        if seen.insert(indices.clone()) {
            points.push(indices.iter().zip(axes).map(|(&k, axis)| axis.value(k)).collect());
        }
    }
    points
}

/// Exhaustive (or sampled) enumeration of the discretised portfolio space.
#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    pub config: GridSearchConfig,
}

impl GridSearch {
    pub fn new(config: GridSearchConfig) -> Self {
        GridSearch { config }
    }
}

impl Algorithm for GridSearch {
    fn run(
        &self,
        objectives: &[Objective],
        constraints: &Constraints,
        portfolio: &[Site],
        _existing_solutions: Option<&[PortfolioSolution]>,
        cache: &EvaluationCache,
    ) -> Result<OptimisationResult, EvolutionError> {
        if objectives.is_empty() {
            return Err(EvolutionError::NoObjectives);
        }
        self.config
            .validate()
            .map_err(EvolutionError::BadPopulationParameter)?;

        let started = Instant::now();

        let problem = PortfolioProblem::new(portfolio, constraints, cache)?;
        let axes: Vec<Axis> = problem
            .space()
            .genes()
            .iter()
            .map(|gene| Axis::new(*gene, self.config.continuous_steps))
            .collect();
        let mut rng = make_rng(self.config.seed);
        let points = grid_points(&axes, self.config.max_evaluations, &mut rng);
        debug!(points = points.len(), genes = axes.len(), "grid built");

        let pool = build_pool(self.config.max_concurrency)?;
        let evaluated = evaluate_population(&problem, &points, &pool)?;
        let n_evals = problem.evaluations();

        let front = constrained_front(evaluated.clone(), objectives);
        let history = vec![GenerationSummary::from_population(
            0,
            &evaluated,
            front.len(),
            n_evals,
            objectives,
        )];
        let solutions = select_pareto(&front, objectives);
        info!(
            solutions = solutions.len(),
            evaluations = n_evals,
            "grid search finished"
        );

        OptimisationResult::new(solutions, n_evals, started.elapsed(), Some(history))
    }
}
