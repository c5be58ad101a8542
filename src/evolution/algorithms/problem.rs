use crate::evolution::algorithms::search_space::{Gene, SearchSpace};
use crate::evolution::cache::EvaluationCache;
use crate::evolution::metrics::site_metrics;
use crate::evolution::objective::Constraints;
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Scenario, Site, SiteSolution};
use crate::simulator::RawSimulationResult;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Something an evolutionary search can optimise: a gene layout and a way
/// to turn a chromosome into an evaluated portfolio.
pub trait Problem: Sync {
    fn genes(&self) -> &[Gene];
    fn evaluate(&self, chromosome: &[f64]) -> Result<PortfolioSolution, EvolutionError>;

    /// Candidates evaluated so far that needed at least one fresh simulator call.
    fn evaluations(&self) -> usize {
        0
    }
}

/// Evaluates one site scenario; the flag is set when the simulator actually ran.
pub fn evaluate_site(
    site: &Site,
    baseline: &RawSimulationResult,
    scenario: Scenario,
    cache: &EvaluationCache,
) -> Result<(SiteSolution, bool), EvolutionError> {
    let (simulation_result, fresh) = cache
        .evaluate_tracked(&scenario)
        .map_err(|source| EvolutionError::Simulation {
            site_id: site.site_id.clone(),
            source,
        })?;
    let metric_values = site_metrics(&simulation_result, baseline);
    let constraint_violation = site.constraint_violation(&metric_values);
    let solution = SiteSolution {
        scenario,
        metric_values,
        simulation_result,
        constraint_violation,
        is_feasible: constraint_violation <= 0.0,
    };
    Ok((solution, fresh))
}

/// Simulator-backed problem over a set of sites.
pub struct PortfolioProblem<'a> {
    sites: &'a [Site],
    space: SearchSpace,
    baselines: Vec<RawSimulationResult>,
    constraints: &'a Constraints,
    cache: &'a EvaluationCache,
    evaluations: AtomicUsize,
}

impl<'a> PortfolioProblem<'a> {
    /// Simulates every site's baseline up front; balances are measured against it.
    /// Those calls are not candidate evaluations and are not counted.
    pub fn new(
        sites: &'a [Site],
        constraints: &'a Constraints,
        cache: &'a EvaluationCache,
    ) -> Result<Self, EvolutionError> {
        if sites.is_empty() {
            return Err(EvolutionError::EmptyPortfolio);
        }
        let space = SearchSpace::new(sites)?;
        let baselines = sites
            .iter()
            .map(|site| {
                cache
                    .evaluate(&site.baseline_scenario())
                    .map_err(|source| EvolutionError::Simulation {
                        site_id: site.site_id.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PortfolioProblem {
            sites,
            space,
            baselines,
            constraints,
            cache,
            evaluations: AtomicUsize::new(0),
        })
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    /// Chromosomes of the warm-start solutions that fit this search space.
    pub fn encode_all(&self, solutions: &[PortfolioSolution]) -> Vec<Vec<f64>> {
        solutions
            .iter()
            .filter_map(|solution| self.space.encode(solution))
            .collect()
    }
}

impl Problem for PortfolioProblem<'_> {
    fn genes(&self) -> &[Gene] {
        self.space.genes()
    }

    fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    fn evaluate(&self, chromosome: &[f64]) -> Result<PortfolioSolution, EvolutionError> {
        let mut fresh = false;
        let mut solutions = BTreeMap::new();
        for (scenario, (site, baseline)) in self
            .space
            .decode(chromosome)
            .into_iter()
            .zip(self.sites.iter().zip(&self.baselines))
        {
            let (solution, simulated) = evaluate_site(site, baseline, scenario, self.cache)?;
            fresh |= simulated;
            solutions.insert(site.site_id.clone(), solution);
        }
        // a candidate served entirely from the cache costs nothing
        if fresh {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(PortfolioSolution::from_site_solutions(
            solutions,
            self.constraints,
        ))
    }
}

pub fn build_pool(max_concurrency: usize) -> Result<ThreadPool, EvolutionError> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(max_concurrency.max(1))
        .build()?)
}

/// Evaluates chromosomes in parallel on `pool`; the first failure aborts the batch.
pub fn evaluate_population(
    problem: &dyn Problem,
    chromosomes: &[Vec<f64>],
    pool: &ThreadPool,
) -> Result<Vec<PortfolioSolution>, EvolutionError> {
    pool.install(|| {
        chromosomes
            .par_iter()
            .map(|chromosome| problem.evaluate(chromosome))
            .collect()
    })
}
