//! Outcome of one optimiser run and its per-generation history.

use crate::evolution::objective::{MetricValues, Objective};
use crate::evolution::EvolutionError;
use crate::portfolio::PortfolioSolution;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Summary of one generation, kept for convergence plots.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub generation: usize,
    /// Size of the first non-dominated front.
    pub front_size: usize,
    pub feasible_count: usize,
    /// Simulator calls made so far in this run.
    pub evaluations: usize,
    /// Best value reached for each requested objective, in its own direction.
    pub best_values: MetricValues,
}

impl GenerationSummary {
    pub fn from_population(
        generation: usize,
        population: &[PortfolioSolution],
        front_size: usize,
        evaluations: usize,
        objectives: &[Objective],
    ) -> Self {
        let best_values = objectives
            .iter()
            .filter_map(|objective| {
                population
                    .iter()
                    .map(|s| s.metric(*objective))
                    .filter(|v| !v.is_nan())
                    .min_by(|a, b| objective.as_cost(*a).total_cmp(&objective.as_cost(*b)))
                    .map(|best| (*objective, best))
            })
            .collect();
        GenerationSummary {
            generation,
            front_size,
            feasible_count: population.iter().filter(|s| s.is_feasible).count(),
            evaluations,
            best_values,
        }
    }
}

/// Final output of an algorithm run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OptimisationResult {
    solutions: Vec<PortfolioSolution>,
    n_evals: usize,
    exec_time: Duration,
    history: Option<Vec<GenerationSummary>>,
}

impl OptimisationResult {
    /// Fails unless at least one evaluation happened and time has passed.
    pub fn new(
        solutions: Vec<PortfolioSolution>,
        n_evals: usize,
        exec_time: Duration,
        history: Option<Vec<GenerationSummary>>,
    ) -> Result<Self, EvolutionError> {
        if n_evals == 0 {
            return Err(EvolutionError::InvalidResult(
                "number of evaluations must be positive".into(),
            ));
        }
        if exec_time.is_zero() {
            return Err(EvolutionError::InvalidResult(
                "execution time must be positive".into(),
            ));
        }
        Ok(OptimisationResult {
            solutions,
            n_evals,
            exec_time,
            history,
        })
    }

    pub fn solutions(&self) -> &[PortfolioSolution] {
        &self.solutions
    }

    pub fn into_solutions(self) -> Vec<PortfolioSolution> {
        self.solutions
    }

    pub fn n_evals(&self) -> usize {
        self.n_evals
    }

    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    pub fn history(&self) -> Option<&[GenerationSummary]> {
        self.history.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_evaluations() {
        let result = OptimisationResult::new(vec![], 0, Duration::from_secs(1), None);
        assert!(matches!(result, Err(EvolutionError::InvalidResult(_))));
    }

    #[test]
    fn test_rejects_zero_execution_time() {
        let result = OptimisationResult::new(vec![], 10, Duration::ZERO, None);
        assert!(matches!(result, Err(EvolutionError::InvalidResult(_))));
    }

    #[test]
    fn test_accepts_positive_values() {
        let result = OptimisationResult::new(vec![], 3, Duration::from_millis(5), None).unwrap();
        assert_eq!(result.n_evals(), 3);
        assert_eq!(result.exec_time(), Duration::from_millis(5));
        assert!(result.history().is_none());
    }
}
