use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::Action;
use crate::storage::error::StorageError;
use crate::storage::kv::KeyValueStore;

/// Storage key holding the JSON array of pending actions.
pub const QUEUE_KEY: &str = "offline_queue";

/// Persistent representation of a mutation queued for later delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: Uuid,
    #[serde(flatten)]
    pub action: Action,
    pub created_at: DateTime<Utc>,
    /// Failed dispatch attempts so far. Only ever grows.
    pub retries: u32,
}

impl QueuedAction {
    fn new(action: Action) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            created_at: Utc::now(),
            retries: 0,
        }
    }
}

/// Durable FIFO of pending actions.
///
/// The whole list is kept in memory and written to a single storage key on
/// every change, so the persisted value is always a complete list. The
/// in-memory copy is only updated after the write succeeded, which keeps it
/// identical to what is on disk even when storage fails.
pub struct QueueStore {
    kv: Arc<dyn KeyValueStore>,
    queue: Mutex<Vec<QueuedAction>>,
}

impl QueueStore {
    /// Open the queue, loading whatever was persisted by a previous process.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let queue = match kv.get(QUEUE_KEY)? {
            Some(raw) => serde_json::from_str::<Vec<QueuedAction>>(&raw)?,
            None => Vec::new(),
        };

        if !queue.is_empty() {
            log::info!("Loaded {} pending actions from offline queue", queue.len());
        }

        Ok(Self {
            kv,
            queue: Mutex::new(queue),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedAction>> {
        // The guarded list is only ever swapped wholesale, so a poisoned
        // lock still holds a consistent value.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, list: &[QueuedAction]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(list)?;
        self.kv.set(QUEUE_KEY, &raw)
    }

    /// Append a new action and persist the full list before returning.
    pub fn enqueue(&self, action: Action) -> Result<QueuedAction, StorageError> {
        let entry = QueuedAction::new(action);

        let mut queue = self.lock();
        let mut next = queue.clone();
        next.push(entry.clone());

        if let Err(e) = self.persist(&next) {
            log::error!("Failed to persist {} action {}: {}", entry.action.kind(), entry.id, e);
            return Err(e);
        }
        *queue = next;

        log::debug!(
            "Queued {} action {} ({} pending)",
            entry.action.kind(),
            entry.id,
            queue.len()
        );
        Ok(entry)
    }

    /// Snapshot of the queue in insertion order.
    pub fn read_all(&self) -> Vec<QueuedAction> {
        self.lock().clone()
    }

    /// Make the persisted queue exactly `new_list`.
    pub fn replace_all(&self, new_list: Vec<QueuedAction>) -> Result<(), StorageError> {
        let mut queue = self.lock();
        self.persist(&new_list)?;
        *queue = new_list;
        Ok(())
    }

    /// Commit the outcome of a sync run against the current queue.
    ///
    /// `finished` holds ids that left the queue during the run (delivered or
    /// dropped); `deferred` holds actions with their updated retry counts.
    /// Actions enqueued after the run took its snapshot are kept untouched,
    /// and an action removed by `clear` meanwhile is not brought back.
    /// Returns the number of actions left in the queue.
    pub fn commit(
        &self,
        finished: &HashSet<Uuid>,
        deferred: &[QueuedAction],
    ) -> Result<usize, StorageError> {
        let retries: HashMap<Uuid, u32> = deferred.iter().map(|a| (a.id, a.retries)).collect();

        let mut queue = self.lock();
        let next: Vec<QueuedAction> = queue
            .iter()
            .filter(|a| !finished.contains(&a.id))
            .cloned()
            .map(|mut a| {
                if let Some(r) = retries.get(&a.id) {
                    a.retries = a.retries.max(*r);
                }
                a
            })
            .collect();

        self.persist(&next)?;
        *queue = next;
        Ok(queue.len())
    }

    /// Drop every pending action. Meant for explicit user resets.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut queue = self.lock();
        self.kv.remove(QUEUE_KEY)?;
        let dropped = queue.len();
        queue.clear();
        log::info!("Cleared offline queue ({} actions dropped)", dropped);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
