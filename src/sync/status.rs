use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the UI needs for the persistent sync indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Actions waiting in the offline queue.
    pub queued_count: usize,
    /// Last run that finished without permanently dropping anything.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last sync error, until dismissed or a later run succeeds.
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Whether a manual "Sync" affordance should be offered.
    pub fn can_sync_now(&self) -> bool {
        self.is_online && !self.is_syncing && self.queued_count > 0
    }

    /// One-line description for passive display.
    pub fn summary(&self) -> String {
        let state = if self.is_syncing {
            "syncing"
        } else if self.is_online {
            "online"
        } else {
            "offline"
        };

        let mut line = match self.queued_count {
            0 => state.to_string(),
            1 => format!("{state}, 1 action pending"),
            n => format!("{state}, {n} actions pending"),
        };
        if self.last_error.is_some() {
            line.push_str(", last sync failed");
        }
        line
    }
}
