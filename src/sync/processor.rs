use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::network::dispatch::Dispatch;
use crate::storage::{QueueStore, QueuedAction, StorageError};

/// Failed attempts after which an action is dropped for good.
pub const MAX_RETRIES: u32 = 3;

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// `failed == 0`. Deferred actions do not count as failures.
    pub success: bool,
    pub synced: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn empty() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A run that did not happen or did not commit.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![message.into()],
            ..Self::default()
        }
    }
}

/// Drains the offline queue once through a dispatcher.
///
/// Not reentrant: callers make sure only one `run` is in flight per queue.
pub struct SyncProcessor {
    queue: Arc<QueueStore>,
    max_retries: u32,
}

impl SyncProcessor {
    pub fn new(queue: Arc<QueueStore>) -> Self {
        Self::with_max_retries(queue, MAX_RETRIES)
    }

    pub fn with_max_retries(queue: Arc<QueueStore>, max_retries: u32) -> Self {
        Self {
            queue,
            max_retries: max_retries.max(1),
        }
    }

    /// Dispatch every queued action in FIFO order and commit the outcome.
    ///
    /// Nothing is written until all actions were attempted. If that single
    /// write fails the error is returned and the persisted queue is exactly
    /// what it was before the run.
    pub async fn run(&self, dispatcher: &dyn Dispatch) -> Result<SyncResult, StorageError> {
        let snapshot = self.queue.read_all();
        if snapshot.is_empty() {
            return Ok(SyncResult::empty());
        }

        let total = snapshot.len();
        let mut result = SyncResult::default();
        let mut finished: HashSet<Uuid> = HashSet::new();
        let mut deferred: Vec<QueuedAction> = Vec::new();

        for mut action in snapshot {
            match dispatcher.dispatch(&action).await {
                Ok(()) => {
                    result.synced += 1;
                    finished.insert(action.id);
                }
                Err(e) => {
                    action.retries = action.retries.saturating_add(1);

                    if !e.is_retryable() {
                        log::error!("Dropping action {} ({}): {}", action.id, action.action.kind(), e);
                        result.failed += 1;
                        result.errors.push(format!("Action {} dropped: {}", action.id, e));
                        finished.insert(action.id);
                    } else if action.retries < self.max_retries {
                        log::warn!(
                            "Action {} ({}) failed, attempt {}/{}: {}",
                            action.id,
                            action.action.kind(),
                            action.retries,
                            self.max_retries,
                            e
                        );
                        deferred.push(action);
                    } else {
                        log::error!(
                            "Action {} ({}) failed after {} retries, dropping: {}",
                            action.id,
                            action.action.kind(),
                            self.max_retries,
                            e
                        );
                        result.failed += 1;
                        result.errors.push(format!(
                            "Action {} failed after {} retries: {}",
                            action.id, self.max_retries, e
                        ));
                        finished.insert(action.id);
                    }
                }
            }
        }

        let remaining = self.queue.commit(&finished, &deferred)?;
        result.success = result.failed == 0;

        log::info!(
            "Sync run finished: {} attempted, {} synced, {} deferred, {} dropped, {} left in queue",
            total,
            result.synced,
            deferred.len(),
            result.failed,
            remaining
        );
        Ok(result)
    }
}
