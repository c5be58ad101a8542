use crate::evolution::algorithms::nsga2::{evolve, Nsga2Config};
use crate::evolution::algorithms::problem::{PortfolioProblem, Problem};
use crate::evolution::algorithms::{constrained_front, truncate_by_crowding, Algorithm};
use crate::evolution::cache::EvaluationCache;
use crate::evolution::objective::{Constraints, Objective};
use crate::evolution::result::OptimisationResult;
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Site, SiteSolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct SeparatedNsga2Config {
    /// Settings of every per-site pass. A seed is offset by the site position.
    pub site: Nsga2Config,
    /// Upper bound on the merged front carried from one site to the next.
    pub max_front_size: usize,
}

impl Default for SeparatedNsga2Config {
    fn default() -> Self {
        SeparatedNsga2Config {
            site: Nsga2Config::default(),
            max_front_size: 64,
        }
    }
}

impl SeparatedNsga2Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_front_size == 0 {
            return Err("max_front_size must be positive".into());
        }
        self.site.validate()
    }
}

/// Optimises each site on its own, then stitches the site fronts together.
#[derive(Debug, Clone, Default)]
pub struct SeparatedNsga2 {
    pub config: SeparatedNsga2Config,
}

impl SeparatedNsga2 {
    pub fn new(config: SeparatedNsga2Config) -> Self {
        SeparatedNsga2 { config }
    }

    /// Runs one NSGA2 pass per site under that site's own constraints and
    /// returns each site's front, in portfolio order, with the fresh
    /// evaluations spent across all passes.
    pub(crate) fn site_fronts(
        &self,
        objectives: &[Objective],
        portfolio: &[Site],
        existing_solutions: Option<&[PortfolioSolution]>,
        cache: &EvaluationCache,
    ) -> Result<(Vec<Vec<SiteSolution>>, usize), EvolutionError> {
        let no_constraints = Constraints::new();
        let mut fronts = Vec::with_capacity(portfolio.len());
        let mut evaluations = 0;

        for (position, site) in portfolio.iter().enumerate() {
            let problem = PortfolioProblem::new(std::slice::from_ref(site), &no_constraints, cache)?;
            let seeds = existing_solutions
                .map(|solutions| problem.encode_all(solutions))
                .unwrap_or_default();
            let config = Nsga2Config {
                seed: self.config.site.seed.map(|seed| seed.wrapping_add(position as u64)),
                ..self.config.site.clone()
            };

            let done = evaluations;
            let outcome = evolve(&problem, objectives, &config, seeds, &|| done + problem.evaluations())?;
            evaluations += problem.evaluations();

            // a one-site portfolio front carries exactly that site's solutions
            let front: Vec<SiteSolution> = constrained_front(outcome.front, objectives)
                .into_iter()
                .filter_map(|mut solution| solution.solutions.remove(&site.site_id))
                .collect();
            debug!(site_id = %site.site_id, front_size = front.len(), "site pass complete");

            if front.is_empty() {
                return Err(EvolutionError::InvalidResult(format!(
                    "site `{}` produced an empty front",
                    site.site_id
                )));
            }
            fronts.push(front);
        }

        Ok((fronts, evaluations))
    }

    /// Combines site fronts one site at a time. After every step only the
    /// non-dominated combinations survive, at most `max_front_size` of them.
    pub(crate) fn merge(
        &self,
        portfolio: &[Site],
        site_fronts: &[Vec<SiteSolution>],
        objectives: &[Objective],
    ) -> Vec<PortfolioSolution> {
        let no_constraints = Constraints::new();
        let mut merged: Vec<BTreeMap<String, SiteSolution>> = vec![BTreeMap::new()];

        for (site, front) in portfolio.iter().zip(site_fronts) {
            // extend every partial portfolio kept so far with each member of this site's front
            let combinations: Vec<PortfolioSolution> = merged
                .iter()
                .flat_map(|partial| {
                    front.iter().map(|site_solution| {
                        let mut solutions = partial.clone();
                        solutions.insert(site.site_id.clone(), site_solution.clone());
                        PortfolioSolution::from_site_solutions(solutions, &no_constraints)
                    })
                })
                .collect();

            // prune before the next site multiplies the count again
            let front = constrained_front(combinations, objectives);
            merged = truncate_by_crowding(front, objectives, self.config.max_front_size)
                .into_iter()
                .map(|solution| solution.solutions)
                .collect();
        }

        merged
            .into_iter()
            .map(|solutions| PortfolioSolution::from_site_solutions(solutions, &no_constraints))
            .collect()
    }
}

impl Algorithm for SeparatedNsga2 {
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

        let (site_fronts, n_evals) = self.site_fronts(objectives, portfolio, existing_solutions, cache)?;
        let merged = self.merge(portfolio, &site_fronts, objectives);

        // portfolio-wide constraints only apply once the sites are combined
        let judged: Vec<PortfolioSolution> = merged
            .into_iter()
            .map(|solution| PortfolioSolution::from_site_solutions(solution.solutions, constraints))
            .collect();
        let solutions = constrained_front(judged, objectives);

        info!(
            sites = portfolio.len(),
            solutions = solutions.len(),
            evaluations = n_evals,
            "separated nsga2 finished"
        );
        OptimisationResult::new(solutions, n_evals, started.elapsed(), None)
    }
}
