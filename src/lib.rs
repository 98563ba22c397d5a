// Local durable state
pub mod actions;
pub mod storage;
pub mod config;

// Delivery and reconciliation
pub mod network;
pub mod sync;

// Public exports
pub use actions::{Action, ActionKind};
pub use config::Config;
pub use network::{DispatchTable, NetworkMonitor};
pub use storage::{QueueStore, QueuedAction};
pub use sync::{SyncCoordinator, SyncResult, SyncStatus};
