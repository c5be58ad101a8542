use crate::consts::DEFAULT_QUEUE_CAPACITY;
use crate::evolution::algorithms::OptimiserId;
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Queue capacity must be positive.")]
    NonPositiveCapacity,
    #[error("Malformed hyperparameters for optimiser `{optimiser}`")]
    MalformedHyperparameters {
        optimiser: OptimiserId,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid hyperparameter for optimiser `{optimiser}`: {reason}")]
    InvalidHyperparameter { optimiser: OptimiserId, reason: String },
    #[error("No implementation is registered for optimiser `{0}`.")]
    UnregisteredOptimiser(OptimiserId),
    #[error("Environment variable {var} has an invalid value `{value}`.")]
    InvalidEnv { var: String, value: String },
}

/// Service settings, read from the environment (and `.env` when present).
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub queue_capacity: usize,
    pub simulator_url: String,
    /// No result store URL means results stay in memory.
    pub result_store_url: Option<String>,
    pub max_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            simulator_url: "http://localhost:8760".into(),
            result_store_url: None,
            max_concurrency: num_cpus::get(),
        }
    }
}

fn parse_var<T: FromStr>(var: &str, value: String) -> Result<T, ConfigurationError> {
    value.trim().parse().map_err(|_| ConfigurationError::InvalidEnv {
        var: var.to_string(),
        value,
    })
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let defaults = ServiceConfig::default();

        let queue_capacity = match lookup("QUEUE_CAPACITY") {
            Some(value) => parse_var("QUEUE_CAPACITY", value)?,
            None => defaults.queue_capacity,
        };
        if queue_capacity == 0 {
            return Err(ConfigurationError::NonPositiveCapacity);
        }
        let max_concurrency = match lookup("MAX_CONCURRENCY") {
            Some(value) => parse_var("MAX_CONCURRENCY", value)?,
            None => defaults.max_concurrency,
        };
        if max_concurrency == 0 {
            return Err(ConfigurationError::InvalidEnv {
                var: "MAX_CONCURRENCY".into(),
                value: "0".into(),
            });
        }

        Ok(ServiceConfig {
            queue_capacity,
            simulator_url: lookup("SIMULATOR_URL").unwrap_or(defaults.simulator_url),
            result_store_url: lookup("RESULT_STORE_URL").filter(|url| !url.is_empty()),
            max_concurrency,
        })
    }
}
