mod error;
mod kv;
mod sled_store;

pub mod offline_queue;

pub use self::error::StorageError;
pub use self::kv::{KeyValueStore, MemoryStore};
pub use self::offline_queue::{QueueStore, QueuedAction, QUEUE_KEY};
pub use self::sled_store::SledStore;
