mod common;

use common::{heat_pump_site, solar_site, SyntheticSimulator};
use hestia::result_store::InMemoryResultStore;
use hestia::task::{submit_task, InMemoryCatalog, OptimiserSpec, SubmissionError};
use hestia::{AlgorithmRegistry, Objective, OptimiserId, Task, TaskProcessor, TaskState, WorkQueue};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    queue: Arc<WorkQueue>,
    store: InMemoryResultStore,
    simulator: Arc<SyntheticSimulator>,
    processor: TaskProcessor,
}

fn harness() -> Harness {
    let queue = Arc::new(WorkQueue::new(8).unwrap());
    let store = InMemoryResultStore::new();
    let simulator = Arc::new(SyntheticSimulator::new());
    let processor = TaskProcessor::new(
        Arc::clone(&queue),
        Arc::new(AlgorithmRegistry::new()),
        simulator.clone(),
        Arc::new(store.clone()),
    )
    .with_max_concurrency(2);
    Harness {
        queue,
        store,
        simulator,
        processor,
    }
}

fn nsga2_task(bundle_id: &str) -> Task {
    Task::new(
        "client-7",
        vec![Objective::CostBalance, Objective::Capex],
        OptimiserSpec::new(
            OptimiserId::Nsga2,
            json!({"population_size": 6, "generations": 2, "seed": 1}),
        ),
        vec![heat_pump_site(bundle_id), solar_site("bundle-b")],
    )
}

#[tokio::test]
async fn test_successful_task_is_transmitted_and_cleaned_up() {
    let h = harness();
    let catalog = InMemoryCatalog::permissive();
    let task_id = submit_task(&h.queue, &catalog, nsga2_task("bundle-a")).await.unwrap();
    assert_eq!(h.queue.state(task_id), Some(TaskState::Queued));

    assert_eq!(h.processor.process_next().await, task_id);

    let payload = h.store.get(task_id).await.expect("result transmitted");
    assert_eq!(payload.client_id, "client-7");
    assert!(!payload.solutions.is_empty());
    assert!(payload.n_evals > 0);
    assert!(payload.n_evals <= 6 * 2);
    assert_eq!(payload.history.map(|history| history.len()), Some(2));
    assert_eq!(h.queue.qsize(), 0);
    assert!(h.processor.cache().is_empty());
    assert!(h.simulator.calls() > 0);
}

#[tokio::test]
async fn test_failures_are_isolated_to_their_task() {
    let h = harness();
    let catalog = InMemoryCatalog::permissive();
    let failing = submit_task(&h.queue, &catalog, nsga2_task("broken")).await.unwrap();
    let panicking = submit_task(&h.queue, &catalog, nsga2_task("panic")).await.unwrap();
    let healthy = submit_task(&h.queue, &catalog, nsga2_task("bundle-a")).await.unwrap();

    for _ in 0..3 {
        h.processor.process_next().await;
    }

    assert!(h.store.get(failing).await.is_none());
    assert!(h.store.get(panicking).await.is_none());
    assert!(h.store.get(healthy).await.is_some());
    assert_eq!(h.queue.qsize(), 0);
    assert!(h.processor.cache().is_empty());
}

#[tokio::test]
async fn test_bad_optimiser_configuration_abandons_task() {
    let h = harness();
    let catalog = InMemoryCatalog::permissive();
    let mut bayesian = nsga2_task("bundle-a");
    bayesian.optimiser = OptimiserSpec::new(OptimiserId::Bayesian, json!(null));
    let mut malformed = nsga2_task("bundle-a");
    malformed.optimiser.hyperparameters = json!({"population_size": "many"});

    let bayesian_id = submit_task(&h.queue, &catalog, bayesian).await.unwrap();
    let malformed_id = submit_task(&h.queue, &catalog, malformed).await.unwrap();
    h.processor.process_next().await;
    h.processor.process_next().await;

    assert!(h.store.get(bayesian_id).await.is_none());
    assert!(h.store.get(malformed_id).await.is_none());
    assert_eq!(h.queue.qsize(), 0);
    assert_eq!(h.simulator.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_task_is_never_run() {
    let h = harness();
    let catalog = InMemoryCatalog::permissive();
    let cancelled = submit_task(&h.queue, &catalog, nsga2_task("bundle-a")).await.unwrap();
    let kept = submit_task(&h.queue, &catalog, nsga2_task("bundle-a")).await.unwrap();
    h.queue.cancel(cancelled).unwrap();

    assert_eq!(h.processor.process_next().await, kept);
    assert!(h.store.get(cancelled).await.is_none());
    assert!(h.store.get(kept).await.is_some());
    assert_eq!(h.queue.qsize(), 0);
}

#[tokio::test]
async fn test_unknown_bundle_never_reaches_the_queue() {
    let h = harness();
    let catalog = InMemoryCatalog::new(["bundle-b"]);
    let result = submit_task(&h.queue, &catalog, nsga2_task("bundle-a")).await;
    assert!(matches!(result, Err(SubmissionError::DataUnavailable { .. })));
    assert_eq!(h.queue.qsize(), 0);
}

#[tokio::test]
async fn test_run_until_stops_on_shutdown() {
    let h = harness();
    let catalog = InMemoryCatalog::permissive();
    let task_id = submit_task(&h.queue, &catalog, nsga2_task("bundle-a")).await.unwrap();

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let queue = Arc::clone(&h.queue);
    let store = h.store.clone();
    let processor = h.processor;
    let worker = tokio::spawn(async move {
        processor
            .run_until(async {
                stopped.await.ok();
            })
            .await
    });

    for _ in 0..200 {
        if queue.qsize() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(store.get(task_id).await.is_some());
    assert_eq!(queue.qsize(), 0);

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("processor stops after shutdown")
        .unwrap();
}
