pub mod coordinator;
pub mod processor;
pub mod status;

pub use coordinator::{should_auto_sync, SyncCoordinator, LAST_SYNC_KEY};
pub use processor::{SyncProcessor, SyncResult, MAX_RETRIES};
pub use status::SyncStatus;
