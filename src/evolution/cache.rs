//! Per-task memo of simulator results.

use crate::portfolio::Scenario;
use crate::simulator::{RawSimulationResult, Simulator};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Slot = Arc<OnceCell<RawSimulationResult>>;

/// Memoises simulator calls by scenario content for the duration of one task.
///
/// Concurrent requests for the same scenario share a single simulator call:
/// the first caller runs it while the others block on the same slot. A
/// failed call leaves the slot empty, so the next request retries it.
pub struct EvaluationCache {
    simulator: Arc<dyn Simulator>,
    slots: Mutex<HashMap<Scenario, Slot>>,
    evaluations: AtomicUsize,
}

impl EvaluationCache {
    pub fn new(simulator: Arc<dyn Simulator>) -> Self {
        EvaluationCache {
            simulator,
            slots: Mutex::new(HashMap::new()),
            evaluations: AtomicUsize::new(0),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Scenario, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn evaluate(&self, scenario: &Scenario) -> anyhow::Result<RawSimulationResult> {
        self.evaluate_tracked(scenario).map(|(result, _)| result)
    }

    /// Like [`evaluate`](Self::evaluate), also reporting whether this call
    /// ran the simulator rather than reading a stored result.
    pub fn evaluate_tracked(&self, scenario: &Scenario) -> anyhow::Result<(RawSimulationResult, bool)> {
        // Only hold the map lock long enough to find or create the slot.
        let slot = {
            let mut slots = self.slots();
            match slots.get(scenario) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot = Slot::default();
                    slots.insert(scenario.clone(), Arc::clone(&slot));
                    slot
                }
            }
        };

        let mut fresh = false;
        let result = slot.get_or_try_init(|| {
            fresh = true;
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            debug!(site_id = %scenario.site_id, "cache miss, calling simulator");
            self.simulator.simulate(scenario)
        })?;
        Ok((result.clone(), fresh))
    }

    /// Number of simulator calls made since construction.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots().values().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut slots = self.slots();
        debug!(entries = slots.len(), "clearing evaluation cache");
        slots.clear();
    }
}
