//! In-flight effect task registry.
//!
//! Records are keyed by [`TaskId`] and removed exactly once on settlement,
//! so an id whose tasks have all settled leaves no residue. The lock is a
//! `parking_lot::Mutex` and is never held across an await point.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;

use tiller_core::{CancelId, CancelToken, Disposition, Origin, TaskId, TaskScope};

#[derive(Debug)]
struct TaskRecord {
    cancel_id: Option<CancelId>,
    origin: Origin,
    token: CancelToken,
}

/// Mapping from in-flight tasks to their cancellation identity and token.
///
/// Scoped to one store: cancellation requests and end-of-session accounting
/// only ever see the tasks that store spawned.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
    settled: Notify,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every task registered under `id`.
    ///
    /// Idempotent; a no-op for an unknown id. Does not wait for settlement.
    pub fn cancel_all(&self, id: &CancelId) {
        for record in self
            .records
            .lock()
            .values()
            .filter(|record| record.cancel_id.as_ref() == Some(id))
        {
            record.token.cancel();
        }
    }

    /// Signal cancellation to every registered task. Teardown path.
    pub fn cancel_everything(&self) {
        for record in self.records.lock().values() {
            record.token.cancel();
        }
    }

    /// Number of in-flight tasks.
    pub fn in_flight(&self) -> usize {
        self.records.lock().len()
    }

    /// True when no task is in flight.
    pub fn is_idle(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Declaration sites of every in-flight task.
    pub fn outstanding(&self) -> Vec<Origin> {
        self.records.lock().values().map(|r| r.origin).collect()
    }

    /// Declaration sites of in-flight tasks with no cancellation identity.
    pub fn outstanding_anonymous(&self) -> Vec<Origin> {
        self.records
            .lock()
            .values()
            .filter(|r| r.cancel_id.is_none())
            .map(|r| r.origin)
            .collect()
    }

    /// Resolves once every registered task has settled.
    pub async fn wait_idle(&self) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.records.lock().is_empty() {
                return;
            }
            settled.await;
        }
    }
}

impl TaskScope for TaskRegistry {
    fn register(&self, cancel_id: Option<CancelId>, origin: Origin, token: CancelToken) -> TaskId {
        let task = TaskId::fresh();
        self.records.lock().insert(
            task,
            TaskRecord {
                cancel_id,
                origin,
                token,
            },
        );
        tracing::trace!(%task, %origin, "effect task registered");
        task
    }

    fn settle(&self, task: TaskId, disposition: Disposition) {
        let removed = self.records.lock().remove(&task);
        if removed.is_some() {
            tracing::trace!(%task, ?disposition, "effect task settled");
        }
        self.settled.notify_waiters();
    }
}
