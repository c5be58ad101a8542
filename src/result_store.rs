use crate::evolution::objective::Objective;
use crate::evolution::result::{GenerationSummary, OptimisationResult};
use crate::portfolio::PortfolioSolution;
use crate::task::Task;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What gets transmitted once a task finishes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResultPayload {
    pub task_id: Uuid,
    pub client_id: String,
    pub objectives: Vec<Objective>,
    pub solutions: Vec<PortfolioSolution>,
    pub n_evals: usize,
    pub exec_time: Duration,
    #[serde(default)]
    pub history: Option<Vec<GenerationSummary>>,
    pub completed_at: DateTime<Utc>,
}

impl ResultPayload {
    pub fn new(task: &Task, result: OptimisationResult) -> Self {
        let n_evals = result.n_evals();
        let exec_time = result.exec_time();
        let history = result.history().map(<[GenerationSummary]>::to_vec);
        ResultPayload {
            task_id: task.task_id,
            client_id: task.client_id.clone(),
            objectives: task.objectives.clone(),
            solutions: result.into_solutions(),
            n_evals,
            exec_time,
            history,
            completed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn store(&self, payload: ResultPayload) -> Result<()>;
}

/// Posts results as JSON to `{base_url}/results`.
pub struct HttpResultStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResultStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpResultStore {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ResultStore for HttpResultStore {
    async fn store(&self, payload: ResultPayload) -> Result<()> {
        let url = format!("{}/results", self.base_url.trim_end_matches('/'));
        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach result store at {url}"))?
            .error_for_status()
            .with_context(|| format!("Result store rejected task {}", payload.task_id))?;
        Ok(())
    }
}

/// Keeps every payload in memory. Used for local runs and tests.
#[derive(Clone, Default)]
pub struct InMemoryResultStore {
    payloads: Arc<RwLock<Vec<ResultPayload>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payloads(&self) -> Vec<ResultPayload> {
        self.payloads.read().await.clone()
    }

    pub async fn get(&self, task_id: Uuid) -> Option<ResultPayload> {
        self.payloads
            .read()
            .await
            .iter()
            .find(|p| p.task_id == task_id)
            .cloned()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn store(&self, payload: ResultPayload) -> Result<()> {
        self.payloads.write().await.push(payload);
        Ok(())
    }
}
