use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;

use crate::actions::Action;
use crate::config::SyncConfig;
use crate::network::connectivity::ConnectivityHandle;
use crate::network::dispatch::Dispatch;
use crate::storage::{KeyValueStore, QueueStore, QueuedAction, StorageError};
use crate::sync::processor::{SyncProcessor, SyncResult};
use crate::sync::status::SyncStatus;

/// Storage key holding the RFC 3339 time of the last successful run.
pub const LAST_SYNC_KEY: &str = "last_sync_time";

/// Automatic syncs are skipped if the last success is at most this old.
pub const STALE_AFTER_SECS: i64 = 5 * 60;

pub const OFFLINE_ERROR: &str = "Device is offline";
pub const IN_PROGRESS_ERROR: &str = "Sync already in progress";

/// True if the device never synced or the last success is older than five
/// minutes.
pub fn should_auto_sync(last_sync_time: Option<DateTime<Utc>>) -> bool {
    should_auto_sync_at(
        last_sync_time,
        Utc::now(),
        Duration::seconds(STALE_AFTER_SECS),
    )
}

pub fn should_auto_sync_at(
    last_sync_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> bool {
    match last_sync_time {
        None => true,
        Some(last) => now.signed_duration_since(last) > stale_after,
    }
}

/// Staleness window from a config value; values chrono cannot represent
/// mean "never stale".
fn stale_window(secs: u64) -> Duration {
    match i64::try_from(secs).ok().and_then(Duration::try_seconds) {
        Some(window) => window,
        None => {
            log::warn!("Staleness window of {}s is out of range, using the maximum", secs);
            Duration::MAX
        }
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_sync_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Holds the single-flight flag for as long as a run is in progress.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Decides when sync runs happen and makes sure only one runs at a time.
///
/// One instance is created at startup and shared (`Arc`) with the network
/// monitor, the periodic task and whatever UI layer issues manual syncs.
pub struct SyncCoordinator {
    queue: Arc<QueueStore>,
    kv: Arc<dyn KeyValueStore>,
    dispatcher: Arc<dyn Dispatch>,
    processor: SyncProcessor,
    connectivity: ConnectivityHandle,
    stale_after: Duration,
    syncing: AtomicBool,
    state: Mutex<CoordinatorState>,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<QueueStore>,
        kv: Arc<dyn KeyValueStore>,
        dispatcher: Arc<dyn Dispatch>,
        connectivity: ConnectivityHandle,
        config: &SyncConfig,
    ) -> Self {
        let last_sync_time = Self::load_last_sync_time(kv.as_ref());
        let processor = SyncProcessor::with_max_retries(Arc::clone(&queue), config.max_retries);

        Self {
            queue,
            kv,
            dispatcher,
            processor,
            connectivity,
            stale_after: stale_window(config.stale_after_secs),
            syncing: AtomicBool::new(false),
            state: Mutex::new(CoordinatorState {
                last_sync_time,
                last_error: None,
            }),
        }
    }

    fn load_last_sync_time(kv: &dyn KeyValueStore) -> Option<DateTime<Utc>> {
        let raw = match kv.get(LAST_SYNC_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Could not read last sync time: {}", e);
                return None;
            }
        };

        match DateTime::parse_from_rfc3339(&raw) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                log::warn!("Ignoring unparseable last sync time {:?}: {}", raw, e);
                None
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one sync pass now, unless offline or another pass is in flight.
    pub async fn sync(&self) -> SyncResult {
        if !self.connectivity.is_online() {
            log::debug!("Sync skipped: device is offline");
            return SyncResult::aborted(OFFLINE_ERROR);
        }

        let _flight = match InFlight::acquire(&self.syncing) {
            Some(guard) => guard,
            None => {
                log::debug!("Sync rejected: another run is in flight");
                return SyncResult::aborted(IN_PROGRESS_ERROR);
            }
        };

        let result = match self.processor.run(self.dispatcher.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Sync run could not commit its results: {}", e);
                SyncResult::aborted(format!("Failed to persist sync results: {e}"))
            }
        };

        if result.success {
            self.record_success(Utc::now());
        } else {
            self.state().last_error = Some(result.errors.join("; "));
        }

        result
    }

    /// The in-memory timestamp only moves once it is on disk, so it never
    /// disagrees with what a restarted process loads.
    fn record_success(&self, at: DateTime<Utc>) {
        let persisted = self.kv.set(LAST_SYNC_KEY, &at.to_rfc3339());

        let mut state = self.state();
        match persisted {
            Ok(()) => {
                state.last_sync_time = Some(at);
                state.last_error = None;
            }
            Err(e) => {
                log::error!("Failed to persist last sync time: {}", e);
                state.last_error = Some(format!("Failed to persist last sync time: {e}"));
            }
        }
    }

    /// Sync only when the staleness policy allows it. Returns `None` when the
    /// last success is still fresh.
    pub async fn sync_if_needed(&self) -> Option<SyncResult> {
        if !self.should_auto_sync() {
            log::debug!("Automatic sync skipped: last sync is recent");
            return None;
        }
        Some(self.sync().await)
    }

    pub fn should_auto_sync(&self) -> bool {
        should_auto_sync_at(self.last_sync_time(), Utc::now(), self.stale_after)
    }

    /// Dismiss the last error. Queue and timestamp are left alone.
    pub fn clear_error(&self) {
        self.state().last_error = None;
    }

    /// Record a mutation that could not be confirmed as delivered.
    pub fn enqueue(&self, action: Action) -> Result<QueuedAction, StorageError> {
        self.queue.enqueue(action)
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.state().last_sync_time
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            is_online: self.is_online(),
            is_syncing: self.is_syncing(),
            queued_count: self.queue.len(),
            last_sync_time: state.last_sync_time,
            last_error: state.last_error.clone(),
        }
    }

    /// Try an automatic sync on every tick while there is queued work.
    pub async fn run_periodic(self: Arc<Self>, every: std::time::Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if !self.is_online() || self.queued_count() == 0 {
                continue;
            }
            if let Some(result) = self.sync_if_needed().await {
                if !result.success {
                    log::warn!("Periodic sync failed: {}", result.errors.join("; "));
                }
            }
        }
    }
}
