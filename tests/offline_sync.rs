use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::{watch, Notify};

use quest_sync::actions::{Action, ProfilePatch};
use quest_sync::config::SyncConfig;
use quest_sync::network::{
    connectivity_channel, ApiClient, Dispatch, DispatchError, DispatchTable, Method,
    NetworkError, NetworkStatus, QuestCompleteHandler,
};
use quest_sync::storage::{KeyValueStore, MemoryStore, QueueStore, QueuedAction, QUEUE_KEY};
use quest_sync::sync::{SyncCoordinator, SyncProcessor, SyncResult, LAST_SYNC_KEY};

/// Fails every quest whose id is in the set, succeeds otherwise.
#[derive(Default)]
struct Scripted {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn failing(ids: &[&str]) -> Self {
        Self {
            failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatch for Scripted {
    async fn dispatch(&self, action: &QueuedAction) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let quest_id = match &action.action {
            Action::QuestComplete(c) => c.quest_id.clone(),
            _ => String::new(),
        };
        if self.failing.lock().unwrap().contains(&quest_id) {
            return Err(NetworkError::ConnectionError("connection reset".to_string()).into());
        }
        Ok(())
    }
}

/// Parks inside the first dispatch until released.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl Dispatch for Gate {
    async fn dispatch(&self, _action: &QueuedAction) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

struct AcceptAll;

#[async_trait]
impl ApiClient for AcceptAll {
    async fn call(&self, _method: Method, _path: &str, _body: Option<Value>) -> Result<(), NetworkError> {
        Ok(())
    }
}

struct Harness {
    kv: Arc<MemoryStore>,
    queue: Arc<QueueStore>,
    network: watch::Sender<NetworkStatus>,
    coordinator: Arc<SyncCoordinator>,
}

fn harness(dispatcher: Arc<dyn Dispatch>) -> Harness {
    harness_with_kv(Arc::new(MemoryStore::new()), dispatcher)
}

fn harness_with_kv(kv: Arc<MemoryStore>, dispatcher: Arc<dyn Dispatch>) -> Harness {
    let queue = Arc::new(QueueStore::open(kv.clone()).expect("open queue"));
    let (network, connectivity) = connectivity_channel();
    network.send_replace(NetworkStatus::Online);

    let coordinator = Arc::new(SyncCoordinator::new(
        Arc::clone(&queue),
        kv.clone(),
        dispatcher,
        connectivity,
        &SyncConfig::default(),
    ));

    Harness {
        kv,
        queue,
        network,
        coordinator,
    }
}

fn quest(id: &str) -> Action {
    Action::complete_quest(id, 1.0)
}

#[test]
fn read_all_preserves_insertion_order() {
    let kv = Arc::new(MemoryStore::new());
    let queue = QueueStore::open(kv).unwrap();

    let ids: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|q| queue.enqueue(quest(q)).unwrap().id)
        .collect();

    let read: Vec<_> = queue.read_all().into_iter().map(|a| a.id).collect();
    assert_eq!(read, ids);
}

#[tokio::test]
async fn run_on_empty_queue_is_a_no_op() {
    let kv = Arc::new(MemoryStore::new());
    let queue = Arc::new(QueueStore::open(kv.clone()).unwrap());

    let result = SyncProcessor::new(queue).run(&Scripted::default()).await.unwrap();

    assert_eq!(
        result,
        SyncResult {
            success: true,
            synced: 0,
            failed: 0,
            errors: vec![],
        }
    );
    assert_eq!(kv.write_count(), 0);
}

#[tokio::test]
async fn always_failing_action_is_dropped_after_three_attempts() {
    let dispatcher = Arc::new(Scripted::failing(&["doomed"]));
    let h = harness(dispatcher.clone());
    let queued = h.queue.enqueue(quest("doomed")).unwrap();

    for attempt in 1..=2u32 {
        let result = h.coordinator.sync().await;
        assert!(result.success, "deferred actions are not failures");
        assert_eq!(result.failed, 0);
        let left = h.queue.read_all();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].retries, attempt);
    }

    let result = h.coordinator.sync().await;
    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains(&queued.id.to_string()));
    assert!(result.errors[0].contains("failed after 3 retries"));
    assert!(h.queue.is_empty());
    assert_eq!(dispatcher.calls(), 3);

    // nothing left to retry
    let result = h.coordinator.sync().await;
    assert_eq!(result, SyncResult::empty());
    assert_eq!(dispatcher.calls(), 3);
}

#[tokio::test]
async fn partial_success_keeps_only_the_failed_action() {
    let h = harness(Arc::new(Scripted::failing(&["second"])));
    h.queue.enqueue(quest("first")).unwrap();
    let second = h.queue.enqueue(quest("second")).unwrap();
    h.queue.enqueue(quest("third")).unwrap();

    let result = h.coordinator.sync().await;

    assert_eq!(
        result,
        SyncResult {
            success: true,
            synced: 2,
            failed: 0,
            errors: vec![],
        }
    );
    let left = h.queue.read_all();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, second.id);
    assert_eq!(left[0].retries, second.retries + 1);
}

#[tokio::test]
async fn offline_sync_leaves_queue_untouched() {
    let dispatcher = Arc::new(Scripted::default());
    let h = harness(dispatcher.clone());
    h.queue.enqueue(quest("a")).unwrap();
    h.network.send_replace(NetworkStatus::Offline);

    let before = h.queue.read_all();
    let writes = h.kv.write_count();

    let result = h.coordinator.sync().await;

    assert_eq!(
        result,
        SyncResult {
            success: false,
            synced: 0,
            failed: 0,
            errors: vec!["Device is offline".to_string()],
        }
    );
    assert_eq!(h.queue.read_all(), before);
    assert_eq!(h.kv.write_count(), writes);
    assert_eq!(dispatcher.calls(), 0);
    assert!(h.coordinator.last_sync_time().is_none());
}

#[tokio::test]
async fn sync_if_needed_honours_the_staleness_window() {
    let kv = Arc::new(MemoryStore::new());
    let four_minutes_ago = Utc::now() - Duration::minutes(4);
    kv.set(LAST_SYNC_KEY, &four_minutes_ago.to_rfc3339()).unwrap();

    let dispatcher = Arc::new(Scripted::default());
    let h = harness_with_kv(kv.clone(), dispatcher.clone());
    h.queue.enqueue(quest("a")).unwrap();

    assert!(!h.coordinator.should_auto_sync());
    assert!(h.coordinator.sync_if_needed().await.is_none());
    assert_eq!(dispatcher.calls(), 0);

    let six_minutes_ago = Utc::now() - Duration::minutes(6);
    kv.set(LAST_SYNC_KEY, &six_minutes_ago.to_rfc3339()).unwrap();
    let h = harness_with_kv(kv, dispatcher.clone());

    let result = h.coordinator.sync_if_needed().await.expect("stale, should sync");
    assert_eq!(result.synced, 1);
    assert!(h.coordinator.sync_if_needed().await.is_none());
}

#[tokio::test]
async fn overlapping_syncs_run_the_processor_once() {
    let gate = Arc::new(Gate::default());
    let h = harness(gate.clone());
    h.queue.enqueue(quest("a")).unwrap();

    let first = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.sync().await })
    };
    gate.entered.notified().await;
    assert!(h.coordinator.is_syncing());
    assert!(h.coordinator.status().is_syncing);

    let second = h.coordinator.sync().await;
    assert!(!second.success);
    assert_eq!(second.errors, vec!["Sync already in progress".to_string()]);
    assert!(h.coordinator.last_error().is_none());

    gate.release.notify_one();
    let first = first.await.unwrap();

    assert_eq!(first.synced, 1);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    assert!(!h.coordinator.is_syncing());
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn action_enqueued_during_a_run_is_not_lost() {
    let gate = Arc::new(Gate::default());
    let h = harness(gate.clone());
    h.queue.enqueue(quest("early")).unwrap();

    let run = {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.sync().await })
    };
    gate.entered.notified().await;

    let late = h.coordinator.enqueue(quest("late")).unwrap();
    gate.release.notify_one();

    let result = run.await.unwrap();
    assert_eq!(result.synced, 1);

    let left = h.queue.read_all();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, late.id);
    assert_eq!(left[0].retries, 0);

    let reopened = QueueStore::open(h.kv.clone()).unwrap();
    assert_eq!(reopened.read_all(), left);
}

#[tokio::test]
async fn unregistered_kind_is_dropped_without_retry() {
    let table = DispatchTable::new().register(QuestCompleteHandler::new(Arc::new(AcceptAll)));
    let h = harness(Arc::new(table));

    let profile = Action::ProfileUpdate(ProfilePatch {
        display_name: Some("Robin".to_string()),
        ..ProfilePatch::default()
    });
    h.queue.enqueue(profile).unwrap();
    h.queue.enqueue(quest("q")).unwrap();

    let result = h.coordinator.sync().await;

    assert_eq!(result.failed, 1);
    assert_eq!(result.synced, 1);
    assert!(!result.success);
    assert!(result.errors[0].contains("ProfileUpdate"));
    assert!(h.queue.is_empty());

    let error = h.coordinator.last_error().expect("error surfaced");
    assert!(error.contains("No handler registered"));
    h.coordinator.clear_error();
    assert!(h.coordinator.last_error().is_none());
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn success_records_and_persists_last_sync_time() {
    let h = harness(Arc::new(Scripted::default()));
    h.queue.enqueue(quest("a")).unwrap();
    assert!(h.coordinator.last_sync_time().is_none());

    let before = Utc::now();
    assert!(h.coordinator.sync().await.success);

    let recorded = h.coordinator.last_sync_time().expect("timestamp recorded");
    assert!(recorded >= before);
    assert!(h.kv.get(LAST_SYNC_KEY).unwrap().is_some());

    let again = harness_with_kv(h.kv.clone(), Arc::new(Scripted::default()));
    assert_eq!(again.coordinator.last_sync_time(), Some(recorded));
}

#[tokio::test]
async fn failed_run_keeps_timestamp_and_sets_error() {
    let h = harness(Arc::new(Scripted::failing(&["bad"])));
    h.queue.enqueue(quest("bad")).unwrap();

    h.coordinator.sync().await;
    h.coordinator.sync().await;
    let stamp = h.coordinator.last_sync_time();
    assert!(stamp.is_some(), "runs that only defer still count as successful");
    assert!(h.coordinator.last_error().is_none());

    let result = h.coordinator.sync().await;
    assert!(!result.success);
    assert_eq!(h.coordinator.last_sync_time(), stamp);
    let error = h.coordinator.last_error().expect("error surfaced");
    assert!(error.contains("failed after 3 retries"));
}

#[tokio::test]
async fn commit_failure_does_not_advance_last_sync_time() {
    let h = harness(Arc::new(Scripted::default()));
    h.queue.enqueue(quest("a")).unwrap();
    let persisted = h.kv.get(QUEUE_KEY).unwrap();

    h.kv.fail_writes(true);
    let result = h.coordinator.sync().await;

    assert!(!result.success);
    assert_eq!(result.synced, 0);
    assert!(result.errors[0].starts_with("Failed to persist sync results"));
    assert!(h.coordinator.last_sync_time().is_none());
    assert!(h.coordinator.last_error().is_some());
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.kv.get(QUEUE_KEY).unwrap(), persisted);

    h.kv.fail_writes(false);
    assert!(h.coordinator.sync().await.success);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn status_reflects_queue_and_network() {
    let h = harness(Arc::new(Scripted::default()));
    h.queue.enqueue(quest("a")).unwrap();
    h.queue.enqueue(quest("b")).unwrap();

    let status = h.coordinator.status();
    assert!(status.is_online);
    assert_eq!(status.queued_count, 2);
    assert!(status.can_sync_now());

    h.network.send_replace(NetworkStatus::Offline);
    let status = h.coordinator.status();
    assert!(!status.can_sync_now());
    assert_eq!(status.summary(), "offline, 2 actions pending");
}
