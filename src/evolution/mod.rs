use thiserror::Error;

pub mod algorithms;
pub mod cache;
pub mod metrics;
pub mod objective;
pub mod pareto;
pub mod result;

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("Invalid population parameters were passed: {0}")]
    BadPopulationParameter(String),
    #[error("The portfolio has no sites to optimise.")]
    EmptyPortfolio,
    #[error("Site `{site_id}` has an invalid range for `{asset}.{attribute}`: {reason}")]
    InvalidSiteRange {
        site_id: String,
        asset: String,
        attribute: String,
        reason: String,
    },
    #[error("At least one objective must be requested.")]
    NoObjectives,
    #[error("Simulation failed for site `{site_id}`")]
    Simulation {
        site_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Invalid optimisation result: {0}")]
    InvalidResult(String),
    #[error("Could not build the evaluation thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
