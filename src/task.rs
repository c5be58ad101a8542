//! Optimisation tasks and their admission into the work queue.

use crate::evolution::algorithms::OptimiserId;
use crate::evolution::objective::{Constraints, Objective};
use crate::portfolio::{PortfolioSolution, Site};
use crate::queue::{QueueError, WorkQueue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptimiserSpec {
    pub id: OptimiserId,
    /// Free-form settings parsed by the optimiser itself. `null` means defaults.
    #[serde(default)]
    pub hyperparameters: Value,
}

impl OptimiserSpec {
    pub fn new(id: OptimiserId, hyperparameters: Value) -> Self {
        OptimiserSpec { id, hyperparameters }
    }
}

/// One optimisation request. Consumed once by a task processor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    #[serde(default = "Uuid::new_v4")]
    pub task_id: Uuid,
    pub client_id: String,
    pub objectives: Vec<Objective>,
    pub optimiser: OptimiserSpec,
    pub portfolio: Vec<Site>,
    /// Constraints over the aggregated portfolio metrics.
    #[serde(default)]
    pub constraints: Constraints,
    /// Known solutions used to warm-start the search.
    #[serde(default)]
    pub existing_solutions: Option<Vec<PortfolioSolution>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        client_id: impl Into<String>,
        objectives: Vec<Objective>,
        optimiser: OptimiserSpec,
        portfolio: Vec<Site>,
    ) -> Self {
        Task {
            task_id: Uuid::new_v4(),
            client_id: client_id.into(),
            objectives,
            optimiser,
            portfolio,
            constraints: Constraints::new(),
            existing_solutions: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_existing_solutions(mut self, solutions: Vec<PortfolioSolution>) -> Self {
        self.existing_solutions = Some(solutions);
        self
    }
}

/// Knows which dataset bundles the simulator can read.
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    async fn bundle_exists(&self, site_id: &str, bundle_id: &str) -> anyhow::Result<bool>;
}

/// Catalog backed by a fixed set of bundle ids. `None` accepts every bundle.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    bundles: Option<HashSet<String>>,
}

impl InMemoryCatalog {
    pub fn new(bundles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        InMemoryCatalog {
            bundles: Some(bundles.into_iter().map(Into::into).collect()),
        }
    }

    pub fn permissive() -> Self {
        InMemoryCatalog { bundles: None }
    }
}

#[async_trait]
impl DatasetCatalog for InMemoryCatalog {
    async fn bundle_exists(&self, _site_id: &str, bundle_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .bundles
            .as_ref()
            .map_or(true, |bundles| bundles.contains(bundle_id)))
    }
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Dataset bundle `{bundle_id}` for site `{site_id}` is not available.")]
    DataUnavailable { site_id: String, bundle_id: String },
    #[error("Could not reach the dataset catalog")]
    Catalog(#[source] anyhow::Error),
    #[error("Invalid task: {0}")]
    InvalidTask(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Checks that every site's data exists, then enqueues the task.
///
/// Waits while the queue is full.
pub async fn submit_task(
    queue: &WorkQueue,
    catalog: &dyn DatasetCatalog,
    task: Task,
) -> Result<Uuid, SubmissionError> {
    if task.objectives.is_empty() {
        return Err(SubmissionError::InvalidTask("no objectives requested".into()));
    }
    if task.portfolio.is_empty() {
        return Err(SubmissionError::InvalidTask("portfolio has no sites".into()));
    }

    for site in &task.portfolio {
        let exists = catalog
            .bundle_exists(&site.site_id, &site.bundle_id)
            .await
            .map_err(SubmissionError::Catalog)?;
        if !exists {
            return Err(SubmissionError::DataUnavailable {
                site_id: site.site_id.clone(),
                bundle_id: site.bundle_id.clone(),
            });
        }
    }

    let task_id = task.task_id;
    let client_id = task.client_id.clone();
    queue.put(task).await?;
    info!(%task_id, %client_id, "task queued");
    Ok(task_id)
}
