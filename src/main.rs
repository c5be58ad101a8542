use anyhow::Context;
use hestia::config::ServiceConfig;
use hestia::result_store::{HttpResultStore, InMemoryResultStore, ResultStore};
use hestia::simulator::HttpSimulator;
use hestia::task::{submit_task, InMemoryCatalog, Task};
use hestia::{AlgorithmRegistry, TaskProcessor, WorkQueue};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Starts a task processor and submits every task JSON file given on the
/// command line. Runs until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let queue = Arc::new(WorkQueue::new(config.queue_capacity)?);
    let simulator = Arc::new(HttpSimulator::new(config.simulator_url.clone())?);
    let store: Arc<dyn ResultStore> = match &config.result_store_url {
        Some(url) => Arc::new(HttpResultStore::new(url.clone())),
        None => {
            info!("RESULT_STORE_URL not set, keeping results in memory");
            Arc::new(InMemoryResultStore::new())
        }
    };
    let processor = TaskProcessor::new(
        Arc::clone(&queue),
        Arc::new(AlgorithmRegistry::new()),
        simulator,
        store,
    )
    .with_max_concurrency(config.max_concurrency);

    let worker = tokio::spawn(async move {
        processor
            .run_until(async {
                tokio::signal::ctrl_c().await.ok();
            })
            .await
    });

    let catalog = InMemoryCatalog::permissive();
    for path in std::env::args().skip(1) {
        let task: Task = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read task file {path}"))
            .and_then(|raw| serde_json::from_str(&raw).with_context(|| format!("Malformed task file {path}")))?;
        match submit_task(&queue, &catalog, task).await {
            Ok(task_id) => info!(%task_id, %path, "submitted"),
            Err(err) => error!(error = %err, %path, "submission rejected"),
        }
    }

    info!(
        capacity = config.queue_capacity,
        simulator = %config.simulator_url,
        "processor running, press Ctrl-C to stop"
    );
    worker.await?;
    Ok(())
}
