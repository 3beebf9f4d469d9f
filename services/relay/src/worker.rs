//! Source workers and the submission pump

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use adapter_service::{normalize, Backoff, ChainAdapter, NormalizeError, RawChainEvent};
use replay_store::{ReplayOutcome, ReplayRecord, ReplayStore, ReplayStoreError};
use transfer_manager::{StatePatch, TransferError, TransferManager};
use types::{TransferRequest, TransferState};

use crate::engine::{EngineConfig, RelayEngine};
use crate::stats::{HealthRegistry, RelayStats};
use crate::watcher::Outstanding;

/// Pump raw events from one source chain into the transfer manager
#[allow(clippy::too_many_arguments)]
pub(crate) async fn source_worker_loop(
    adapter: Arc<dyn ChainAdapter>,
    manager: Arc<TransferManager>,
    replay: Arc<ReplayStore>,
    stats: Arc<RelayStats>,
    health: Arc<HealthRegistry>,
    config: EngineConfig,
    fatal_tx: mpsc::UnboundedSender<ReplayStoreError>,
    mut shutdown: watch::Receiver<bool>,
) {
    let chain = adapter.chain_id();
    let chain_config = manager.chain_config(chain);
    let Some(chain_config) = chain_config else {
        error!("source worker for {chain} has no chain config; not starting");
        health.set_source(chain, false, Some("no chain config".to_string()));
        return;
    };

    info!("source worker for {chain} started");
    let mut checkpoint: Option<u64> = None;
    let mut resubscribe_backoff =
        Backoff::new(config.storage_backoff_base, config.storage_backoff_cap);

    'outer: loop {
        if *shutdown.borrow() {
            break;
        }

        let mut stream = match adapter.subscribe(checkpoint).await {
            Ok(stream) => {
                resubscribe_backoff.reset();
                stream
            }
            Err(e) => {
                warn!("subscribe on {chain} failed: {e}");
                health.set_source(chain, false, Some(format!("subscribe: {e}")));
                let delay = resubscribe_backoff.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown.changed() => break,
                }
            }
        };
        health.set_source(chain, true, None);

        loop {
            let raw = tokio::select! {
                raw = stream.next() => raw,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break 'outer;
                    }
                    continue;
                }
            };
            let Some(raw) = raw else {
                // Stream dropped; restart from the checkpoint.
                warn!("event stream on {chain} ended; resubscribing");
                break;
            };

            if let Some(block) = raw.block_height {
                checkpoint = Some(block.saturating_add(1));
            }

            if !process_event(
                &raw, &chain_config, &manager, &replay, &stats, &health, &config, &fatal_tx,
                &mut shutdown,
            )
            .await
            {
                break 'outer;
            }
        }
    }
    info!("source worker for {chain} stopped");
}

/// Handle one raw event end to end; `false` means the worker must stop
#[allow(clippy::too_many_arguments)]
async fn process_event(
    raw: &RawChainEvent,
    chain_config: &types::ChainConfig,
    manager: &Arc<TransferManager>,
    replay: &Arc<ReplayStore>,
    stats: &Arc<RelayStats>,
    health: &Arc<HealthRegistry>,
    config: &EngineConfig,
    fatal_tx: &mpsc::UnboundedSender<ReplayStoreError>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let chain = chain_config.chain_id;
    stats.record_processed();

    // Normalization errors are local to this worker.
    let event = match normalize(raw, chain_config, Utc::now().timestamp_millis()) {
        Ok(event) => event,
        Err(NormalizeError::Unrecognized) => {
            debug!("{chain}: skipping non-transfer event");
            return true;
        }
        Err(e @ NormalizeError::Malformed(_)) | Err(e @ NormalizeError::UnsupportedToken(_)) => {
            warn!("{chain}: dropping event: {e}");
            stats.record_failed();
            return true;
        }
    };

    // Replay protection: exactly one Fresh per fingerprint, ever.
    let fingerprint = event.fingerprint();
    let record = ReplayRecord {
        fingerprint,
        observed_at_ms: event.observed_at_ms,
        chain_id: event.chain_id,
        source_tx_id: event.tx_id.clone(),
        block_height: event.block_height,
    };

    let mut backoff = Backoff::new(config.storage_backoff_base, config.storage_backoff_cap);
    let degraded_since = Instant::now();
    loop {
        match replay.record_if_new(record.clone()) {
            Ok(ReplayOutcome::Fresh) => {
                health.set_source(chain, true, None);
                break;
            }
            Ok(ReplayOutcome::Duplicate) => {
                debug!("{chain}: duplicate event {fingerprint}");
                stats.record_duplicate();
                return true;
            }
            Err(e @ ReplayStoreError::StoreCorrupt(_)) => {
                error!("{chain}: replay store corrupt: {e}");
                let _ = fatal_tx.send(e);
                return false;
            }
            Err(ReplayStoreError::StorageUnavailable(reason)) => {
                if degraded_since.elapsed() >= config.storage_unhealthy_after {
                    health.set_source(chain, false, Some(format!("replay store: {reason}")));
                }
                let delay = backoff.next_delay();
                warn!("{chain}: replay store unavailable ({reason}); retrying in {delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return false;
                        }
                    }
                }
            }
        }
    }

    // Routing: the active pair for this token names the destination chain.
    let Some(pair) = manager.route(&event.token) else {
        warn!(
            "{chain}: no active pair for {}; event consumed without relay",
            event.token.symbol
        );
        stats.record_failed();
        return true;
    };

    let now = Utc::now();
    let request = TransferRequest {
        id: RelayEngine::request_id_for(&fingerprint),
        from_chain: event.chain_id,
        to_chain: pair.to_token.chain_id,
        from_address: event.from.clone(),
        to_address: event.to.clone(),
        token: event.token.clone(),
        amount: event.amount,
        fee: None,
        nonce: event.block_height,
        deadline: now + config.event_deadline_window,
        signature: None,
        created_at: now,
        updated_at: now,
    };

    // Bounded handoff: suspending here suspends the subscription read, which
    // is the backpressure contract.
    match manager.accept(request).await {
        Ok(_) => true,
        Err(TransferError::ValidationFailed { request_id, summary, .. }) => {
            warn!("{chain}: event transfer {request_id} rejected: {summary}");
            stats.record_failed();
            true
        }
        Err(TransferError::IntakeClosed) | Err(TransferError::NotRunning) => {
            info!("{chain}: manager gone; worker stopping");
            false
        }
        Err(e) => {
            warn!("{chain}: accept failed: {e}");
            stats.record_failed();
            true
        }
    }
}

/// Drain the manager's intake and drive destination submissions
///
/// Concurrency is bounded by `submit_concurrency`; with every slot busy the
/// pump stops receiving, the bounded intake fills, and source workers
/// suspend; that chain is the backpressure contract.
pub(crate) async fn submission_pump_loop(
    manager: Arc<TransferManager>,
    mut intake: mpsc::Receiver<TransferRequest>,
    outstanding: Arc<DashMap<String, Outstanding>>,
    stats: Arc<RelayStats>,
    config: EngineConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("submission pump started");
    let slots = Arc::new(tokio::sync::Semaphore::new(config.submit_concurrency.max(1)));
    loop {
        let request = tokio::select! {
            request = intake.recv() => request,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    // Drain whatever is already queued, then stop.
                    while let Ok(request) = intake.try_recv() {
                        spawn_submission(&manager, &outstanding, &stats, &config, request, None);
                    }
                    break;
                }
                continue;
            }
        };
        let Some(request) = request else { break };

        // The request in hand is never dropped: either a slot frees up or
        // shutdown flushes it permit-less.
        let permit = loop {
            tokio::select! {
                permit = slots.clone().acquire_owned() => {
                    break Some(permit.expect("semaphore never closed"));
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break None;
                    }
                }
            }
        };
        match permit {
            Some(permit) => {
                spawn_submission(&manager, &outstanding, &stats, &config, request, Some(permit));
            }
            None => {
                spawn_submission(&manager, &outstanding, &stats, &config, request, None);
                break;
            }
        }
    }
    info!("submission pump stopped");
}

fn spawn_submission(
    manager: &Arc<TransferManager>,
    outstanding: &Arc<DashMap<String, Outstanding>>,
    stats: &Arc<RelayStats>,
    config: &EngineConfig,
    request: TransferRequest,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
) {
    let manager = manager.clone();
    let outstanding = outstanding.clone();
    let stats = stats.clone();
    let config = config.clone();
    tokio::spawn(async move {
        submit_with_retry(manager, outstanding, stats, config, request).await;
        drop(permit);
    });
}

/// Submit one request, retrying transient failures with capped backoff
async fn submit_with_retry(
    manager: Arc<TransferManager>,
    outstanding: Arc<DashMap<String, Outstanding>>,
    stats: Arc<RelayStats>,
    config: EngineConfig,
    request: TransferRequest,
) {
    let Some(handler) = manager.handler(request.to_chain) else {
        warn!("no handler for {}; failing {}", request.to_chain, request.id);
        stats.record_failed();
        let _ = manager.update(
            &request.id,
            TransferState::Failed,
            StatePatch {
                error: Some(format!("no handler for {}", request.to_chain)),
                ..Default::default()
            },
        );
        return;
    };

    let mut backoff = Backoff::new(config.storage_backoff_base, config.storage_backoff_cap);
    loop {
        if request.is_expired_at(Utc::now()) {
            // The deadline sweep owns the Expired transition.
            debug!("submission of {} abandoned past deadline", request.id);
            return;
        }

        let attempt = tokio::time::timeout(config.submit_timeout, handler.submit(&request)).await;
        match attempt {
            Ok(Ok(receipt)) => {
                debug!("submitted {} as {}", request.id, receipt.tx_id);
                let _ = manager.update(
                    &request.id,
                    TransferState::Submitted,
                    StatePatch {
                        destination_tx_id: Some(receipt.tx_id.clone()),
                        ..Default::default()
                    },
                );
                outstanding.insert(
                    request.id.clone(),
                    Outstanding::new(request.to_chain, receipt.tx_id),
                );
                return;
            }
            Ok(Err(adapter_service::AdapterError::AlreadySubmitted { tx_id, .. })) => {
                // Idempotency conflict resolved in our favour: the original
                // submission is the one we track.
                info!("{} was already submitted as {tx_id}", request.id);
                let _ = manager.update(
                    &request.id,
                    TransferState::Submitted,
                    StatePatch {
                        destination_tx_id: Some(tx_id.clone()),
                        ..Default::default()
                    },
                );
                outstanding.insert(request.id.clone(), Outstanding::new(request.to_chain, tx_id));
                return;
            }
            Ok(Err(e)) if e.is_transient() => {
                let delay = backoff.next_delay();
                warn!("transient submit failure for {} ({e}); retrying in {delay:?}", request.id);
                tokio::time::sleep(delay).await;
            }
            Err(_elapsed) => {
                let delay = backoff.next_delay();
                warn!(
                    "submit of {} timed out after {:?}; retrying in {delay:?}",
                    request.id, config.submit_timeout
                );
                tokio::time::sleep(delay).await;
            }
            Ok(Err(e)) => {
                warn!("permanent submit failure for {}: {e}", request.id);
                stats.record_failed();
                let failed = manager.update(
                    &request.id,
                    TransferState::Failed,
                    StatePatch {
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                );
                if failed.is_ok() {
                    // Reverse anything the destination may have partially done.
                    let rollback =
                        tokio::time::timeout(config.submit_timeout, handler.rollback(&request))
                            .await;
                    if matches!(rollback, Ok(Ok(()))) {
                        let _ = manager.update(
                            &request.id,
                            TransferState::RolledBack,
                            StatePatch::default(),
                        );
                    }
                }
                return;
            }
        }
    }
}
