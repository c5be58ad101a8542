//! The optimiser family and the registry that builds them from task
//! hyperparameters.

use crate::config::ConfigurationError;
use crate::evolution::cache::EvaluationCache;
use crate::evolution::objective::{Constraints, Objective};
use crate::evolution::pareto::{build_pareto_fronts, crowding_distances, select_pareto};
use crate::evolution::result::OptimisationResult;
use crate::evolution::EvolutionError;
use crate::portfolio::{PortfolioSolution, Site};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod genetic;
pub mod grid_search;
pub mod nested;
pub mod nsga2;
pub mod operators;
pub mod problem;
pub mod search_space;
pub mod separated;

pub use genetic::{GeneticAlgorithm, GeneticAlgorithmConfig};
pub use grid_search::{GridSearch, GridSearchConfig};
pub use nested::{SeparatedNsga2xNsga2, SeparatedNsga2xNsga2Config};
pub use nsga2::{Nsga2, Nsga2Config};
pub use separated::{SeparatedNsga2, SeparatedNsga2Config};

/// Common contract of every optimiser.
///
/// `existing_solutions` warm-starts the search where the algorithm supports
/// it. Every simulator call must go through `cache`; the reported `n_evals`
/// is the number of fresh simulator calls made during the run.
pub trait Algorithm: Send + Sync {
    fn run(
        &self,
        objectives: &[Objective],
        constraints: &Constraints,
        portfolio: &[Site],
        existing_solutions: Option<&[PortfolioSolution]>,
        cache: &EvaluationCache,
    ) -> Result<OptimisationResult, EvolutionError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OptimiserId {
    #[serde(rename = "nsga2")]
    Nsga2,
    #[serde(rename = "separated_nsga2")]
    SeparatedNsga2,
    #[serde(rename = "separated_nsga2_x_nsga2")]
    SeparatedNsga2xNsga2,
    GeneticAlgorithm,
    GridSearch,
    Bayesian,
}

impl OptimiserId {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimiserId::Nsga2 => "nsga2",
            OptimiserId::SeparatedNsga2 => "separated_nsga2",
            OptimiserId::SeparatedNsga2xNsga2 => "separated_nsga2_x_nsga2",
            OptimiserId::GeneticAlgorithm => "genetic_algorithm",
            OptimiserId::GridSearch => "grid_search",
            OptimiserId::Bayesian => "bayesian",
        }
    }
}

impl OptimiserId {
    /// Where `max_concurrency` lives inside this optimiser's hyperparameters.
    fn concurrency_paths(&self) -> &'static [&'static [&'static str]] {
        match self {
            OptimiserId::SeparatedNsga2 => &[&["site"]],
            OptimiserId::SeparatedNsga2xNsga2 => &[&["separated", "site"], &["portfolio"]],
            OptimiserId::GridSearch | OptimiserId::Nsga2 | OptimiserId::GeneticAlgorithm => &[&[]],
            OptimiserId::Bayesian => &[],
        }
    }

    /// Fills in `max_concurrency` wherever the hyperparameters leave it unset.
    /// Anything other than an object (or `null`) is returned untouched.
    pub fn with_default_concurrency(&self, hyperparameters: &Value, max_concurrency: usize) -> Value {
        let mut value = match hyperparameters {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        for path in self.concurrency_paths() {
            let mut node = &mut value;
            for key in path.iter() {
                match node {
                    Value::Object(map) => {
                        node = map
                            .entry(key.to_string())
                            .or_insert_with(|| Value::Object(Default::default()));
                    }
                    _ => break,
                }
            }
            if let Value::Object(map) = node {
                map.entry("max_concurrency")
                    .or_insert_with(|| Value::from(max_concurrency));
            }
        }
        value
    }
}

impl fmt::Display for OptimiserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type AlgorithmConstructor =
    Arc<dyn Fn(&Value) -> Result<Box<dyn Algorithm>, ConfigurationError> + Send + Sync>;

type BuiltinConstructor = fn(&Value) -> Result<Box<dyn Algorithm>, ConfigurationError>;

/// Parses hyperparameters into a config. `null` means "all defaults".
pub fn parse_hyperparameters<C: DeserializeOwned>(
    optimiser: OptimiserId,
    hyperparameters: &Value,
) -> Result<C, ConfigurationError> {
    let value = match hyperparameters {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|source| ConfigurationError::MalformedHyperparameters { optimiser, source })
}

fn invalid(optimiser: OptimiserId) -> impl Fn(String) -> ConfigurationError {
    move |reason| ConfigurationError::InvalidHyperparameter { optimiser, reason }
}

fn build_nsga2(hyperparameters: &Value) -> Result<Box<dyn Algorithm>, ConfigurationError> {
    let config: Nsga2Config = parse_hyperparameters(OptimiserId::Nsga2, hyperparameters)?;
    config.validate().map_err(invalid(OptimiserId::Nsga2))?;
    Ok(Box::new(Nsga2::new(config)))
}

fn build_separated_nsga2(hyperparameters: &Value) -> Result<Box<dyn Algorithm>, ConfigurationError> {
    let config: SeparatedNsga2Config = parse_hyperparameters(OptimiserId::SeparatedNsga2, hyperparameters)?;
    config.validate().map_err(invalid(OptimiserId::SeparatedNsga2))?;
    Ok(Box::new(SeparatedNsga2::new(config)))
}

fn build_separated_nsga2_x_nsga2(hyperparameters: &Value) -> Result<Box<dyn Algorithm>, ConfigurationError> {
    let config: SeparatedNsga2xNsga2Config =
        parse_hyperparameters(OptimiserId::SeparatedNsga2xNsga2, hyperparameters)?;
    config.validate().map_err(invalid(OptimiserId::SeparatedNsga2xNsga2))?;
    Ok(Box::new(SeparatedNsga2xNsga2::new(config)))
}

fn build_genetic_algorithm(hyperparameters: &Value) -> Result<Box<dyn Algorithm>, ConfigurationError> {
    let config: GeneticAlgorithmConfig = parse_hyperparameters(OptimiserId::GeneticAlgorithm, hyperparameters)?;
    config.validate().map_err(invalid(OptimiserId::GeneticAlgorithm))?;
    Ok(Box::new(GeneticAlgorithm::new(config)))
}

fn build_grid_search(hyperparameters: &Value) -> Result<Box<dyn Algorithm>, ConfigurationError> {
    let config: GridSearchConfig = parse_hyperparameters(OptimiserId::GridSearch, hyperparameters)?;
    config.validate().map_err(invalid(OptimiserId::GridSearch))?;
    Ok(Box::new(GridSearch::new(config)))
}

/// Built-in optimisers. Bayesian is deliberately absent: the host registers it.
static BUILTIN: &[(OptimiserId, BuiltinConstructor)] = &[
    (OptimiserId::Nsga2, build_nsga2),
    (OptimiserId::SeparatedNsga2, build_separated_nsga2),
    (OptimiserId::SeparatedNsga2xNsga2, build_separated_nsga2_x_nsga2),
    (OptimiserId::GeneticAlgorithm, build_genetic_algorithm),
    (OptimiserId::GridSearch, build_grid_search),
];

/// Maps optimiser identifiers to constructors.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    constructors: HashMap<OptimiserId, AlgorithmConstructor>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        let constructors = BUILTIN
            .iter()
            .map(|&(id, constructor)| (id, Arc::new(constructor) as AlgorithmConstructor))
            .collect();
        AlgorithmRegistry { constructors }
    }
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constructor, replacing any existing one for `id`.
    pub fn register<F>(&mut self, id: OptimiserId, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Algorithm>, ConfigurationError> + Send + Sync + 'static,
    {
        self.constructors.insert(id, Arc::new(constructor));
    }

    pub fn is_registered(&self, id: OptimiserId) -> bool {
        self.constructors.contains_key(&id)
    }

    pub fn build(&self, id: OptimiserId, hyperparameters: &Value) -> Result<Box<dyn Algorithm>, ConfigurationError> {
        let constructor = self
            .constructors
            .get(&id)
            .ok_or(ConfigurationError::UnregisteredOptimiser(id))?;
        (constructor.as_ref())(hyperparameters)
    }
}

pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Best front under constrained dominance, collapsed to distinct
/// non-dominated points on `objectives`.
pub(crate) fn constrained_front(
    solutions: Vec<PortfolioSolution>,
    objectives: &[Objective],
) -> Vec<PortfolioSolution> {
    let costs: Vec<Vec<f64>> = solutions.iter().map(|s| s.costs(objectives)).collect();
    let violations: Vec<f64> = solutions.iter().map(|s| s.constraint_violation).collect();
    let first = match build_pareto_fronts(&costs, &violations).into_iter().next() {
        Some(front) => front,
        None => return vec![],
    };
    let members: Vec<PortfolioSolution> = first.into_iter().map(|i| solutions[i].clone()).collect();
    select_pareto(&members, objectives)
}

/// Keeps the `limit` least crowded solutions; boundary points always survive.
pub(crate) fn truncate_by_crowding(
    solutions: Vec<PortfolioSolution>,
    objectives: &[Objective],
    limit: usize,
) -> Vec<PortfolioSolution> {
    if solutions.len() <= limit {
        return solutions;
    }
    let costs: Vec<Vec<f64>> = solutions.iter().map(|s| s.costs(objectives)).collect();
    let everyone: Vec<usize> = (0..solutions.len()).collect();
    let distances = crowding_distances(&everyone, &costs);

    let mut order = everyone;
    order.sort_by(|&a, &b| distances[b].total_cmp(&distances[a]));
    order.truncate(limit);
    order.sort_unstable();

    let mut slots: Vec<Option<PortfolioSolution>> = solutions.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifiers_round_trip_through_serde() {
        for (id, name) in [
            (OptimiserId::Nsga2, "nsga2"),
            (OptimiserId::SeparatedNsga2, "separated_nsga2"),
            (OptimiserId::SeparatedNsga2xNsga2, "separated_nsga2_x_nsga2"),
            (OptimiserId::GeneticAlgorithm, "genetic_algorithm"),
            (OptimiserId::GridSearch, "grid_search"),
            (OptimiserId::Bayesian, "bayesian"),
        ] {
            assert_eq!(serde_json::to_value(id).unwrap(), json!(name));
            assert_eq!(id.to_string(), name);
        }
    }

    #[test]
    fn test_builtins_accept_empty_hyperparameters() {
        let registry = AlgorithmRegistry::new();
        for id in [
            OptimiserId::Nsga2,
            OptimiserId::SeparatedNsga2,
            OptimiserId::SeparatedNsga2xNsga2,
            OptimiserId::GeneticAlgorithm,
            OptimiserId::GridSearch,
        ] {
            assert!(registry.build(id, &Value::Null).is_ok(), "{id} should build");
            assert!(registry.build(id, &json!({})).is_ok(), "{id} should build");
        }
    }

    #[test]
    fn test_bayesian_needs_registration() {
        let mut registry = AlgorithmRegistry::new();
        assert!(matches!(
            registry.build(OptimiserId::Bayesian, &Value::Null),
            Err(ConfigurationError::UnregisteredOptimiser(OptimiserId::Bayesian))
        ));

        registry.register(OptimiserId::Bayesian, |_| Ok(Box::new(GridSearch::default())));
        assert!(registry.is_registered(OptimiserId::Bayesian));
        assert!(registry.build(OptimiserId::Bayesian, &Value::Null).is_ok());
    }

    #[test]
    fn test_default_concurrency_fills_missing_slots_only() {
        let filled = OptimiserId::SeparatedNsga2xNsga2.with_default_concurrency(
            &json!({"portfolio": {"max_concurrency": 2, "generations": 4}}),
            8,
        );
        assert_eq!(filled["separated"]["site"]["max_concurrency"], json!(8));
        assert_eq!(filled["portfolio"]["max_concurrency"], json!(2));
        assert_eq!(filled["portfolio"]["generations"], json!(4));

        let flat = OptimiserId::Nsga2.with_default_concurrency(&Value::Null, 3);
        assert_eq!(flat, json!({"max_concurrency": 3}));
        assert!(AlgorithmRegistry::new().build(OptimiserId::SeparatedNsga2xNsga2, &filled).is_ok());
    }

    #[test]
    fn test_malformed_hyperparameters_are_rejected() {
        let registry = AlgorithmRegistry::new();
        assert!(matches!(
            registry.build(OptimiserId::Nsga2, &json!({"population_size": "lots"})),
            Err(ConfigurationError::MalformedHyperparameters { .. })
        ));
        assert!(matches!(
            registry.build(OptimiserId::Nsga2, &json!({"unknown_knob": 1})),
            Err(ConfigurationError::MalformedHyperparameters { .. })
        ));
        assert!(matches!(
            registry.build(OptimiserId::GridSearch, &json!({"max_evaluations": 0})),
            Err(ConfigurationError::InvalidHyperparameter { .. })
        ));
    }
}
