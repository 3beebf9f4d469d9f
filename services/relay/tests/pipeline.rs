//! End-to-end relay pipeline scenarios

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replay_store::ReplayStore;
use support::*;
use tempfile::tempdir;
use tokio::sync::broadcast;
use transfer_manager::{LifecycleEvent, TransferListener};
use types::{ChainId, TransferResponse, TransferState};

async fn wait_for_state(
    manager: &Arc<transfer_manager::TransferManager>,
    id: &str,
    wanted: TransferState,
) -> TransferResponse {
    for _ in 0..200 {
        if let Ok(response) = manager.status_of(id) {
            if response.state == wanted {
                return response;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("request {id} never reached {wanted}");
}

/// Request id of the first acceptance seen on the lifecycle tap
async fn first_request_id(tap: &mut broadcast::Receiver<LifecycleEvent>) -> String {
    let event = tokio::time::timeout(Duration::from_secs(5), tap.recv())
        .await
        .expect("no acceptance within 5s")
        .expect("lifecycle tap closed");
    event.response.request_id
}

struct CompletionCounter {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

#[async_trait]
impl TransferListener for CompletionCounter {
    async fn on_completed(&self, _response: &TransferResponse) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    async fn on_failed(&self, _response: &TransferResponse) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

// Scenario: happy path. One burn event flows source -> normalize -> replay
// -> route -> accept -> submit -> confirmations -> Completed, and the
// listener fires exactly once.
#[tokio::test]
async fn happy_path_completes_exactly_once() {
    let dir = tempdir().unwrap();
    let replay = Arc::new(ReplayStore::open(dir.path().join("replay.log")).unwrap());
    let manager = wired_manager(16);
    let listener = Arc::new(CompletionCounter {
        completed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    });
    manager.subscribe(listener.clone());

    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::Succeed,
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();

    let source = Arc::new(ScriptedSource::new(
        ChainId::Internal,
        vec![burn_event("btx01", 100)],
    ));
    let mut tap = manager.subscribe_events();
    let engine = engine_with(manager.clone(), replay.clone(), source).await;
    engine.start().await.unwrap();

    let id = first_request_id(&mut tap).await;
    let done = wait_for_state(&manager, &id, TransferState::Completed).await;

    assert_eq!(done.required_confirmations, 3);
    assert!(done.destination_tx_id.is_some());
    assert!(done.confirmations >= 3);
    assert_eq!(destination.unique_submissions(), 1);
    assert_eq!(replay.stats().count, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.completed.load(Ordering::SeqCst), 1);
    assert_eq!(listener.failed.load(Ordering::SeqCst), 0);

    let stats = engine.stats().snapshot(manager.total_transactions() as u64);
    assert_eq!(stats.successful_relays, 1);
    assert_eq!(stats.total_transactions, 1);

    engine.shutdown().await;
}

// Scenario: duplicate. The same raw event twice produces one transfer and
// one duplicate counter increment; submit happens once.
#[tokio::test]
async fn duplicate_event_is_dropped_by_replay_protection() {
    let dir = tempdir().unwrap();
    let replay = Arc::new(ReplayStore::open(dir.path().join("replay.log")).unwrap());
    let manager = wired_manager(16);
    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::Succeed,
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();

    let source = Arc::new(ScriptedSource::new(
        ChainId::Internal,
        vec![burn_event("btx01", 100), burn_event("btx01", 100)],
    ));
    let mut tap = manager.subscribe_events();
    let engine = engine_with(manager.clone(), replay.clone(), source).await;
    engine.start().await.unwrap();

    let id = first_request_id(&mut tap).await;
    wait_for_state(&manager, &id, TransferState::Completed).await;

    assert_eq!(manager.total_transactions(), 1);
    assert_eq!(destination.unique_submissions(), 1);
    assert_eq!(replay.stats().count, 1);
    let stats = engine.stats().snapshot(manager.total_transactions() as u64);
    assert_eq!(stats.duplicate_events, 1);

    engine.shutdown().await;
}

// Scenario: malformed. An event without a recipient is dropped before the
// replay store; nothing is recorded and no transfer is created.
#[tokio::test]
async fn malformed_event_writes_nothing() {
    let dir = tempdir().unwrap();
    let replay = Arc::new(ReplayStore::open(dir.path().join("replay.log")).unwrap());
    let manager = wired_manager(16);
    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::Succeed,
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();

    let mut bad = burn_event("btx01", 100);
    bad.to = None;
    let mut foreign = burn_event("btx02", 101);
    foreign.kind = "governance-vote".to_string();

    let source = Arc::new(ScriptedSource::new(ChainId::Internal, vec![bad, foreign]));
    let delivered = source.delivered();
    let engine = engine_with(manager.clone(), replay.clone(), source).await;
    engine.start().await.unwrap();

    // Let the worker chew through the script.
    for _ in 0..100 {
        if delivered.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(replay.stats().count, 0);
    assert_eq!(manager.total_transactions(), 0);
    assert_eq!(destination.submit_calls(), 0);

    let stats = engine.stats().snapshot(0);
    assert_eq!(stats.processed_events_total, 2);
    // the malformed one counts as failed; the foreign kind is silently skipped
    assert_eq!(stats.failed_events, 1);

    engine.shutdown().await;
}

// Scenario: adapter failure. A permanently failing destination moves the
// transfer Pending -> Failed with the adapter's message, then rollback
// resolves it to RolledBack.
#[tokio::test]
async fn permanent_submit_failure_fails_then_rolls_back() {
    let dir = tempdir().unwrap();
    let replay = Arc::new(ReplayStore::open(dir.path().join("replay.log")).unwrap());
    let manager = wired_manager(16);
    let listener = Arc::new(CompletionCounter {
        completed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
    });
    manager.subscribe(listener.clone());
    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::FailPermanent("insufficient reserve".to_string()),
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();

    let source = Arc::new(ScriptedSource::new(
        ChainId::Internal,
        vec![burn_event("btx01", 100)],
    ));
    let mut tap = manager.subscribe_events();
    let engine = engine_with(manager.clone(), replay.clone(), source).await;
    engine.start().await.unwrap();

    let id = first_request_id(&mut tap).await;
    let done = wait_for_state(&manager, &id, TransferState::RolledBack).await;
    assert!(done.error.as_deref().unwrap_or("").contains("insufficient reserve"));
    assert!(destination.rollback_calls() >= 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(listener.failed.load(Ordering::SeqCst), 1);
    assert_eq!(listener.completed.load(Ordering::SeqCst), 0);

    engine.shutdown().await;
}

// Scenario: expiry with rollback. A destination that hangs forever lets the
// deadline pass; the sweep expires the transfer and rollback resolves it.
#[tokio::test]
async fn stuck_submission_expires_then_rolls_back() {
    let dir = tempdir().unwrap();
    let replay = Arc::new(ReplayStore::open(dir.path().join("replay.log")).unwrap());
    let manager = wired_manager(16);
    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::Hang,
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();

    let source = Arc::new(ScriptedSource::new(
        ChainId::Internal,
        vec![burn_event("btx01", 100)],
    ));
    let engine = Arc::new(relay_engine::RelayEngine::new(
        manager.clone(),
        replay.clone(),
        relay_engine::EngineConfig {
            // Deadline shorter than the hang: the sweep must win.
            event_deadline_window: chrono::Duration::milliseconds(300),
            ..fast_config()
        },
    ));
    let mut tap = manager.subscribe_events();
    engine.add_source(source).await;
    engine.start().await.unwrap();

    let id = first_request_id(&mut tap).await;
    let done = wait_for_state(&manager, &id, TransferState::RolledBack).await;
    assert_eq!(done.state, TransferState::RolledBack);
    assert!(destination.rollback_calls() >= 1);

    destination.release();
    engine.shutdown().await;
}

// Backpressure: with one submission slot occupied by a hanging destination
// and a one-slot intake, the worker suspends inside accept and the
// subscription stops being polled. Releasing the destination drains every
// queued event; none are lost.
#[tokio::test]
async fn saturated_intake_suspends_the_subscription() {
    let dir = tempdir().unwrap();
    let replay = Arc::new(ReplayStore::open(dir.path().join("replay.log")).unwrap());
    let manager = wired_manager(1);
    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::Hang,
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();

    let total_events = 6u64;
    let events: Vec<_> = (0..total_events)
        .map(|i| burn_event(&format!("btx{i:02}"), 100 + i))
        .collect();
    let source = Arc::new(ScriptedSource::new(ChainId::Internal, events));
    let delivered = source.delivered();

    let engine = Arc::new(relay_engine::RelayEngine::new(
        manager.clone(),
        replay.clone(),
        relay_engine::EngineConfig {
            submit_concurrency: 1,
            submit_timeout: Duration::from_secs(60),
            event_deadline_window: chrono::Duration::minutes(5),
            ..fast_config()
        },
    ));
    engine.add_source(source).await;
    engine.start().await.unwrap();

    // Give the pipeline time to saturate.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let stalled_at = delivered.load(Ordering::SeqCst);
    assert!(
        stalled_at < total_events as usize,
        "subscription was polled dry ({stalled_at}) despite a saturated intake"
    );

    // The stall is stable: no further polls while saturated.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), stalled_at);

    // Unblock the destination: every buffered event must come through.
    destination.release();
    for _ in 0..400 {
        if destination.unique_submissions() == total_events as usize {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(
        destination.unique_submissions(),
        total_events as usize,
        "events were lost under backpressure"
    );

    engine.shutdown().await;
}

// Crash safety: a replay store reopened after an ungraceful stop still
// refuses the fingerprint, and no second transfer is created (the pinned
// no-journal recovery policy).
#[tokio::test]
async fn reopened_store_still_blocks_the_event() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("replay.log");

    // First life: record the event, complete the transfer, drop everything
    // without any graceful store shutdown.
    {
        let replay = Arc::new(ReplayStore::open(&path).unwrap());
        let manager = wired_manager(16);
        let destination = Arc::new(MockDestination::new(
            ChainId::Ethereum,
            SubmitMode::Succeed,
            true,
        ));
        manager.register_handler(destination).unwrap();
        manager.start().unwrap();
        let source = Arc::new(ScriptedSource::new(
            ChainId::Internal,
            vec![burn_event("btx01", 100)],
        ));
        let mut tap = manager.subscribe_events();
        let engine = engine_with(manager.clone(), replay.clone(), source).await;
        engine.start().await.unwrap();
        let id = first_request_id(&mut tap).await;
        wait_for_state(&manager, &id, TransferState::Completed).await;
        engine.shutdown().await;
    }

    // Second life: same raw event replays as Duplicate; no transfer appears.
    let replay = Arc::new(ReplayStore::open(&path).unwrap());
    assert_eq!(replay.stats().count, 1);

    let manager = wired_manager(16);
    let destination = Arc::new(MockDestination::new(
        ChainId::Ethereum,
        SubmitMode::Succeed,
        true,
    ));
    manager.register_handler(destination.clone()).unwrap();
    manager.start().unwrap();
    let source = Arc::new(ScriptedSource::new(
        ChainId::Internal,
        vec![burn_event("btx01", 100)],
    ));
    let delivered = source.delivered();
    let engine = engine_with(manager.clone(), replay.clone(), source).await;
    engine.start().await.unwrap();

    for _ in 0..100 {
        if delivered.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = engine.stats().snapshot(manager.total_transactions() as u64);
    assert_eq!(stats.duplicate_events, 1);
    assert_eq!(manager.total_transactions(), 0);
    assert_eq!(destination.submit_calls(), 0);

    engine.shutdown().await;
}
