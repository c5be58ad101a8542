//! The worker loop: dequeue, optimise, transmit, clean up.

use crate::evolution::algorithms::AlgorithmRegistry;
use crate::evolution::cache::EvaluationCache;
use crate::queue::WorkQueue;
use crate::result_store::{ResultPayload, ResultStore};
use crate::simulator::Simulator;
use crate::task::Task;
use anyhow::{Context, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs queued tasks one at a time against its own evaluation cache.
pub struct TaskProcessor {
    queue: Arc<WorkQueue>,
    registry: Arc<AlgorithmRegistry>,
    store: Arc<dyn ResultStore>,
    cache: Arc<EvaluationCache>,
    max_concurrency: Option<usize>,
}

impl TaskProcessor {
    pub fn new(
        queue: Arc<WorkQueue>,
        registry: Arc<AlgorithmRegistry>,
        simulator: Arc<dyn Simulator>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        TaskProcessor {
            queue,
            registry,
            store,
            cache: Arc::new(EvaluationCache::new(simulator)),
            max_concurrency: None,
        }
    }

    /// Default evaluation parallelism for tasks that do not set their own.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    /// Builds the optimiser, runs it off the async executor and hands the
    /// result to the store.
    async fn execute(&self, task: Task) -> Result<()> {
        let optimiser = task.optimiser.id;
        let hyperparameters = match self.max_concurrency {
            Some(n) => optimiser.with_default_concurrency(&task.optimiser.hyperparameters, n),
            None => task.optimiser.hyperparameters.clone(),
        };
        let algorithm = self.registry.build(optimiser, &hyperparameters)?;

        let cache = Arc::clone(&self.cache);
        let (task, result) = tokio::task::spawn_blocking(move || {
            let result = algorithm.run(
                &task.objectives,
                &task.constraints,
                &task.portfolio,
                task.existing_solutions.as_deref(),
                &cache,
            );
            (task, result)
        })
        .await
        .context("Optimiser aborted")?;
        let result = result.context("Optimisation failed")?;

        info!(
            solutions = result.solutions().len(),
            n_evals = result.n_evals(),
            exec_time_ms = result.exec_time().as_millis() as u64,
            "optimisation finished"
        );
        self.store
            .store(ResultPayload::new(&task, result))
            .await
            .context("Failed to transmit results")
    }

    /// Processes one task that `get` already handed out. Failures are logged
    /// and end the task; the cache is cleared and the entry removed either way.
    pub async fn process(&self, task: Task) {
        let task_id = task.task_id;
        let span = info_span!(
            "task",
            %task_id,
            client_id = %task.client_id,
            optimiser = %task.optimiser.id
        );

        async {
            if let Err(err) = self.queue.mark_running(task_id) {
                warn!(error = %err, "skipping task");
            } else {
                info!("task started");
                let outcome = AssertUnwindSafe(self.execute(task)).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => info!("task complete"),
                    Ok(Err(err)) => error!(error = ?err, "task failed"),
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".into());
                        error!(panic = %reason, "task panicked");
                    }
                }
            }
            self.cache.clear();
            self.queue.mark_task_done(task_id);
        }
        .instrument(span)
        .await
    }

    /// Waits for the next task and processes it.
    pub async fn process_next(&self) -> Uuid {
        let task = self.queue.get().await;
        let task_id = task.task_id;
        self.process(task).await;
        task_id
    }

    pub async fn run(&self) {
        self.run_until(futures::future::pending()).await
    }

    /// Processes tasks until `shutdown` resolves. A task in progress is
    /// finished first.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let task = tokio::select! {
                _ = &mut shutdown => {
                    info!("task processor shutting down");
                    return;
                }
                task = self.queue.get() => task,
            };
            self.process(task).await;
        }
    }
}
