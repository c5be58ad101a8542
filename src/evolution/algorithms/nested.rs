use crate::evolution::algorithms::nsga2::{evolve, Nsga2, Nsga2Config};
use crate::evolution::algorithms::problem::Problem;
use crate::evolution::algorithms::search_space::Gene;
use crate::evolution::algorithms::separated::{SeparatedNsga2, SeparatedNsga2Config};
use crate::evolution::algorithms::{constrained_front, Algorithm};
use crate::evolution::cache::EvaluationCache;
use crate::evolution::objective::{Constraints, Objective};
use crate::evolution::pareto::select_pareto;
use crate::evolution::result::OptimisationResult;
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Site, SiteSolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SeparatedNsga2xNsga2Config {
    pub separated: SeparatedNsga2Config,
    /// Settings of the portfolio-level pass over the site fronts.
    pub portfolio: Nsga2Config,
}

impl SeparatedNsga2xNsga2Config {
    pub fn validate(&self) -> Result<(), String> {
        self.separated.validate()?;
        self.portfolio.validate()
    }
}

/// Portfolio-level problem whose genes pick one member of each site's front.
/// Every candidate is already simulated, so evaluation never hits the simulator.
struct SubFrontProblem<'a> {
    site_ids: Vec<&'a str>,
    fronts: &'a [Vec<SiteSolution>],
    genes: Vec<Gene>,
    constraints: &'a Constraints,
}

impl<'a> SubFrontProblem<'a> {
    fn new(portfolio: &'a [Site], fronts: &'a [Vec<SiteSolution>], constraints: &'a Constraints) -> Self {
        let genes = fronts
            .iter()
            .map(|front| Gene::Integer {
                lower: 0,
                upper: front.len() as i64 - 1,
            })
            .collect();
        SubFrontProblem {
            site_ids: portfolio.iter().map(|site| site.site_id.as_str()).collect(),
            fronts,
            genes,
            constraints,
        }
    }

    /// Position of each site's pick inside its front, if all are present.
    fn encode(&self, solution: &PortfolioSolution) -> Option<Vec<f64>> {
        self.site_ids
            .iter()
            .zip(self.fronts)
            .map(|(site_id, front)| {
                let chosen = solution.solutions.get(*site_id)?;
                front.iter().position(|s| s == chosen).map(|i| i as f64)
            })
            .collect()
    }
}

impl Problem for SubFrontProblem<'_> {
    fn genes(&self) -> &[Gene] {
        &self.genes
    }

    fn evaluate(&self, chromosome: &[f64]) -> Result<PortfolioSolution, EvolutionError> {
        let solutions = self
            .site_ids
            .iter()
            .zip(self.fronts.iter().zip(self.genes.iter().zip(chromosome)))
            .map(|(site_id, (front, (gene, value)))| {
                let index = gene.clip(*value) as usize;
                (site_id.to_string(), front[index].clone())
            })
            .collect::<BTreeMap<_, _>>();
        Ok(PortfolioSolution::from_site_solutions(solutions, self.constraints))
    }
}

/// SeparatedNSGA2 followed by an NSGA2 pass that recombines the site fronts
/// under the portfolio-wide constraints.
#[derive(Debug, Clone, Default)]
pub struct SeparatedNsga2xNsga2 {
    separated: SeparatedNsga2,
    portfolio: Nsga2,
}

impl SeparatedNsga2xNsga2 {
    pub fn new(config: SeparatedNsga2xNsga2Config) -> Self {
        SeparatedNsga2xNsga2 {
            separated: SeparatedNsga2::new(config.separated),
            portfolio: Nsga2::new(config.portfolio),
        }
    }
}

impl Algorithm for SeparatedNsga2xNsga2 {
    fn run(
        &self,
        objectives: &[Objective],
        constraints: &Constraints,
        portfolio: &[Site],
        existing_solutions: Option<&[PortfolioSolution]>,
        cache: &EvaluationCache,
    ) -> Result<OptimisationResult, EvolutionError> {
        if portfolio.is_empty() {
            return Err(EvolutionError::EmptyPortfolio);
        }
        let started = Instant::now();

        // stage two only recombines simulated site solutions, so every
        // fresh evaluation happens in the per-site passes
        let (site_fronts, n_evals) = self
            .separated
            .site_fronts(objectives, portfolio, existing_solutions, cache)?;
        let merged = self.separated.merge(portfolio, &site_fronts, objectives);

        let problem = SubFrontProblem::new(portfolio, &site_fronts, constraints);
        let mut seeds: Vec<Vec<f64>> = merged.iter().filter_map(|s| problem.encode(s)).collect();
        if let Some(existing) = existing_solutions {
            seeds.extend(existing.iter().filter_map(|s| problem.encode(s)));
        }

        let outcome = evolve(&problem, objectives, &self.portfolio.config, seeds, &|| n_evals)?;
        let solutions = select_pareto(&constrained_front(outcome.front, objectives), objectives);

        info!(
            sites = portfolio.len(),
            solutions = solutions.len(),
            evaluations = n_evals,
            "separated nsga2 x nsga2 finished"
        );
        OptimisationResult::new(
            solutions,
            n_evals,
            started.elapsed(),
            self.portfolio.config.record_history.then_some(outcome.history),
        )
    }
}
