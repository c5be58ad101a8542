//! Bounded FIFO of submitted tasks with per-task state.
//!
//! Capacity counts every tracked entry, running and cancelled ones included,
//! until the entry is removed by [`WorkQueue::mark_task_done`] or swept by
//! [`WorkQueue::get`].

use crate::config::ConfigurationError;
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Queued,
    Running,
    Cancelled,
}

/// Status view of one tracked task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub task_id: Uuid,
    pub client_id: String,
    pub state: TaskState,
    pub added_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Cannot change the state of task {task_id}: {reason}")]
    InvalidTransition { task_id: Uuid, reason: String },
    #[error("Task {0} is already queued.")]
    DuplicateTask(Uuid),
    #[error("The queue has been closed.")]
    Closed,
}

struct Slot {
    entry: QueueEntry,
    task: Task,
}

#[derive(Default)]
struct Inner {
    /// Every tracked task, in submission order.
    slots: Vec<Slot>,
    /// Ids not yet handed out by `get`, oldest first.
    pending: VecDeque<Uuid>,
}

impl Inner {
    fn position(&self, task_id: Uuid) -> Option<usize> {
        self.slots.iter().position(|s| s.entry.task_id == task_id)
    }
}

pub struct WorkQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    /// One permit per free slot.
    free: Semaphore,
    available: Notify,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Result<Self, ConfigurationError> {
        if capacity == 0 {
            return Err(ConfigurationError::NonPositiveCapacity);
        }
        Ok(WorkQueue {
            inner: Mutex::new(Inner::default()),
            capacity,
            free: Semaphore::new(capacity),
            available: Notify::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes a tracked entry and frees its slot. Must be called with the lock held.
    fn remove(&self, inner: &mut Inner, task_id: Uuid) -> bool {
        match inner.position(task_id) {
            Some(index) => {
                inner.slots.remove(index);
                inner.pending.retain(|id| *id != task_id);
                self.free.add_permits(1);
                true
            }
            None => false,
        }
    }

    /// Adds `task` in the QUEUED state, waiting while the queue is full.
    pub async fn put(&self, task: Task) -> Result<(), QueueError> {
        let permit = self.free.acquire().await.map_err(|_| QueueError::Closed)?;

        {
            let mut inner = self.lock();
            if inner.position(task.task_id).is_some() {
                return Err(QueueError::DuplicateTask(task.task_id));
            }
            // the slot is now owned by the entry and handed back in `remove`
            permit.forget();
            let entry = QueueEntry {
                task_id: task.task_id,
                client_id: task.client_id.clone(),
                state: TaskState::Queued,
                added_at: Utc::now(),
            };
            inner.pending.push_back(entry.task_id);
            inner.slots.push(Slot { entry, task });
        }

        self.available.notify_one();
        Ok(())
    }

    fn try_get(&self) -> Option<Task> {
        let mut inner = self.lock();
        while let Some(task_id) = inner.pending.pop_front() {
            let state = inner
                .position(task_id)
                .map(|index| inner.slots[index].entry.state);
            match state {
                Some(TaskState::Cancelled) => {
                    debug!(%task_id, "sweeping cancelled task");
                    self.remove(&mut inner, task_id);
                }
                Some(TaskState::Queued) => {
                    return inner
                        .position(task_id)
                        .map(|index| inner.slots[index].task.clone());
                }
                _ => {}
            }
        }
        None
    }

    /// Waits for the oldest dispatchable task. Its state is left untouched;
    /// the caller marks it running.
    pub async fn get(&self) -> Task {
        loop {
            if let Some(task) = self.try_get() {
                return task;
            }
            self.available.notified().await;
        }
    }

    pub fn mark_running(&self, task_id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let index = inner
            .position(task_id)
            .ok_or_else(|| QueueError::InvalidTransition {
                task_id,
                reason: "task is not in the queue".into(),
            })?;
        let entry = &mut inner.slots[index].entry;
        match entry.state {
            TaskState::Queued => {
                entry.state = TaskState::Running;
                Ok(())
            }
            TaskState::Running => Err(QueueError::InvalidTransition {
                task_id,
                reason: "task is already running".into(),
            }),
            TaskState::Cancelled => Err(QueueError::InvalidTransition {
                task_id,
                reason: "task has been cancelled".into(),
            }),
        }
    }

    /// Cancels a task that has not started yet.
    pub fn cancel(&self, task_id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock();
        let index = inner
            .position(task_id)
            .ok_or_else(|| QueueError::InvalidTransition {
                task_id,
                reason: "task is not in the queue".into(),
            })?;
        let entry = &mut inner.slots[index].entry;
        match entry.state {
            TaskState::Queued => {
                entry.state = TaskState::Cancelled;
                Ok(())
            }
            TaskState::Running => Err(QueueError::InvalidTransition {
                task_id,
                reason: "task is already running".into(),
            }),
            TaskState::Cancelled => Err(QueueError::InvalidTransition {
                task_id,
                reason: "task has already been cancelled".into(),
            }),
        }
    }

    /// Forgets the task whatever its state. Unknown ids are ignored.
    pub fn mark_task_done(&self, task_id: Uuid) {
        let mut inner = self.lock();
        if self.remove(&mut inner, task_id) {
            debug!(%task_id, "task removed from queue");
        }
    }

    /// Tracked entries that are not cancelled, in submission order.
    pub fn uncancelled(&self) -> Vec<QueueEntry> {
        self.lock()
            .slots
            .iter()
            .filter(|s| s.entry.state != TaskState::Cancelled)
            .map(|s| s.entry.clone())
            .collect()
    }

    pub fn qsize(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn state(&self, task_id: Uuid) -> Option<TaskState> {
        let inner = self.lock();
        inner
            .position(task_id)
            .map(|index| inner.slots[index].entry.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::algorithms::OptimiserId;
    use crate::evolution::objective::Objective;
    use crate::task::OptimiserSpec;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn task() -> Task {
        Task::new(
            "client-1",
            vec![Objective::Capex],
            OptimiserSpec::new(OptimiserId::Nsga2, serde_json::Value::Null),
            vec![],
        )
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            WorkQueue::new(0),
            Err(ConfigurationError::NonPositiveCapacity)
        ));
        assert_eq!(WorkQueue::new(3).unwrap().capacity(), 3);
    }

    #[tokio::test]
    async fn test_get_is_fifo_and_leaves_state_alone() {
        let queue = WorkQueue::new(4).unwrap();
        let (first, second) = (task(), task());
        queue.put(first.clone()).await.unwrap();
        queue.put(second.clone()).await.unwrap();

        let got = queue.get().await;
        assert_eq!(got.task_id, first.task_id);
        assert_eq!(queue.state(first.task_id), Some(TaskState::Queued));
        assert_eq!(queue.get().await.task_id, second.task_id);
        assert_eq!(queue.qsize(), 2);
    }

    #[tokio::test]
    async fn test_cancel_transitions() {
        let queue = WorkQueue::new(4).unwrap();
        let (queued, running) = (task(), task());
        queue.put(queued.clone()).await.unwrap();
        queue.put(running.clone()).await.unwrap();
        queue.mark_running(running.task_id).unwrap();

        queue.cancel(queued.task_id).unwrap();
        assert_eq!(queue.state(queued.task_id), Some(TaskState::Cancelled));

        for task_id in [queued.task_id, running.task_id, Uuid::new_v4()] {
            assert!(matches!(
                queue.cancel(task_id),
                Err(QueueError::InvalidTransition { .. })
            ));
        }

        let remaining = queue.uncancelled();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, running.task_id);
        assert_eq!(remaining[0].state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_get_sweeps_cancelled_entries() {
        let queue = WorkQueue::new(4).unwrap();
        let (cancelled, live) = (task(), task());
        queue.put(cancelled.clone()).await.unwrap();
        queue.put(live.clone()).await.unwrap();
        queue.cancel(cancelled.task_id).unwrap();

        assert_eq!(queue.get().await.task_id, live.task_id);
        assert_eq!(queue.state(cancelled.task_id), None);
        assert_eq!(queue.qsize(), 1);
    }

    #[tokio::test]
    async fn test_mark_task_done_removes_entry() {
        let queue = WorkQueue::new(4).unwrap();
        let tasks: Vec<Task> = (0..3).map(|_| task()).collect();
        for t in &tasks {
            queue.put(t.clone()).await.unwrap();
        }
        queue.mark_running(tasks[1].task_id).unwrap();
        queue.mark_task_done(tasks[1].task_id);
        queue.mark_task_done(Uuid::new_v4());

        assert_eq!(queue.qsize(), 2);
        assert_eq!(queue.state(tasks[1].task_id), None);
        let ids: Vec<Uuid> = queue.uncancelled().iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec![tasks[0].task_id, tasks[2].task_id]);
    }

    #[tokio::test]
    async fn test_put_waits_for_free_capacity() {
        let queue = Arc::new(WorkQueue::new(1).unwrap());
        let first = task();
        queue.put(first.clone()).await.unwrap();

        let blocked = timeout(Duration::from_millis(50), queue.put(task())).await;
        assert!(blocked.is_err(), "put should wait while the queue is full");

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(task()).await })
        };
        queue.mark_task_done(first.task_id);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("put resumes once a slot frees up")
            .unwrap()
            .unwrap();
        assert_eq!(queue.qsize(), 1);
    }

    #[tokio::test]
    async fn test_get_waits_for_a_task() {
        let queue = Arc::new(WorkQueue::new(2).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let submitted = task();
        queue.put(submitted.clone()).await.unwrap();

        let got = timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(got.task_id, submitted.task_id);
    }
}
