//! Confirmation watchers
//!
//! One watcher per destination adapter owns the outstanding
//! `(request, tx)` pairs for that chain and polls them to a terminal state.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use adapter_service::TxState;
use transfer_manager::{StatePatch, TransferManager};
use types::{ChainId, TransferState};

use crate::engine::EngineConfig;
use crate::stats::{HealthRegistry, RelayStats};

/// One watched destination transaction
#[derive(Debug, Clone)]
pub(crate) struct Outstanding {
    pub chain: ChainId,
    pub tx_id: String,
    pub poll_failures: u32,
}

impl Outstanding {
    pub fn new(chain: ChainId, tx_id: String) -> Self {
        Self {
            chain,
            tx_id,
            poll_failures: 0,
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn watcher_loop(
    chain: ChainId,
    manager: Arc<TransferManager>,
    outstanding: Arc<DashMap<String, Outstanding>>,
    stats: Arc<RelayStats>,
    health: Arc<HealthRegistry>,
    config: EngineConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(adapter) = manager.handler(chain) else {
        warn!("confirmation watcher for {chain} has no handler; not starting");
        health.set_destination(chain, false, Some("no handler".to_string()));
        return;
    };

    info!("confirmation watcher for {chain} started");
    let mut ticker = interval(config.confirm_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let mine: Vec<(String, String)> = outstanding
            .iter()
            .filter(|entry| entry.chain == chain)
            .map(|entry| (entry.key().clone(), entry.tx_id.clone()))
            .collect();

        let mut tick_healthy = true;
        for (request_id, tx_id) in mine {
            let poll =
                tokio::time::timeout(config.submit_timeout, adapter.status(&tx_id)).await;

            match poll {
                Ok(Ok(status)) => {
                    if let Some(mut entry) = outstanding.get_mut(&request_id) {
                        entry.poll_failures = 0;
                    }
                    match status.state {
                        TxState::Pending => {
                            debug!(
                                "{request_id}: {tx_id} at {} confirmations",
                                status.confirmations
                            );
                            let _ = manager.update(
                                &request_id,
                                TransferState::Submitted,
                                StatePatch {
                                    confirmations: Some(status.confirmations),
                                    ..Default::default()
                                },
                            );
                        }
                        TxState::Confirmed => {
                            info!("{request_id}: {tx_id} reached finality");
                            let confirmed = manager.update(
                                &request_id,
                                TransferState::Confirmed,
                                StatePatch {
                                    confirmations: Some(status.confirmations),
                                    ..Default::default()
                                },
                            );
                            if confirmed.is_ok()
                                && manager
                                    .update(
                                        &request_id,
                                        TransferState::Completed,
                                        StatePatch::default(),
                                    )
                                    .is_ok()
                            {
                                stats.record_success();
                            }
                            outstanding.remove(&request_id);
                        }
                        TxState::Failed => {
                            warn!("{request_id}: {tx_id} failed on {chain}");
                            stats.record_failed();
                            fail_and_try_rollback(&manager, &config, &request_id, chain).await;
                            outstanding.remove(&request_id);
                        }
                    }
                }
                Ok(Err(e)) => {
                    // Transient and unknown-tx errors alike are counted; the
                    // failure limit converts a persistent error into Failed.
                    let ok = bump_poll_failure(
                        &outstanding,
                        &manager,
                        &stats,
                        &config,
                        &request_id,
                        chain,
                        &e.to_string(),
                    )
                    .await;
                    tick_healthy = tick_healthy && ok;
                }
                Err(_) => {
                    let ok = bump_poll_failure(
                        &outstanding,
                        &manager,
                        &stats,
                        &config,
                        &request_id,
                        chain,
                        "status poll timed out",
                    )
                    .await;
                    tick_healthy = tick_healthy && ok;
                }
            }
        }

        if tick_healthy {
            health.set_destination(chain, true, None);
        }
    }
    info!("confirmation watcher for {chain} stopped");
}

/// Transition to Failed and attempt a rollback through the handler
async fn fail_and_try_rollback(
    manager: &Arc<TransferManager>,
    config: &EngineConfig,
    request_id: &str,
    chain: ChainId,
) {
    let failed = manager.update(
        request_id,
        TransferState::Failed,
        StatePatch {
            error: Some(format!("destination {chain} reported failure")),
            ..Default::default()
        },
    );
    if failed.is_err() {
        return;
    }

    let Some(request) = manager.request_of(request_id) else {
        return;
    };
    let Some(handler) = manager.handler(chain) else {
        return;
    };
    let rollback = tokio::time::timeout(config.submit_timeout, handler.rollback(&request)).await;
    match rollback {
        Ok(Ok(())) => {
            let _ = manager.update(request_id, TransferState::RolledBack, StatePatch::default());
        }
        Ok(Err(e)) => warn!("rollback of {request_id} refused: {e}"),
        Err(_) => warn!("rollback of {request_id} timed out"),
    }
}

/// Count a transient poll failure; past the limit the transfer fails
async fn bump_poll_failure(
    outstanding: &Arc<DashMap<String, Outstanding>>,
    manager: &Arc<TransferManager>,
    stats: &Arc<RelayStats>,
    config: &EngineConfig,
    request_id: &str,
    chain: ChainId,
    reason: &str,
) -> bool {
    let failures = match outstanding.get_mut(request_id) {
        Some(mut entry) => {
            entry.poll_failures += 1;
            entry.poll_failures
        }
        None => return true,
    };
    warn!("{request_id}: poll failure {failures}/{} ({reason})", config.max_poll_failures);

    if failures >= config.max_poll_failures {
        stats.record_failed();
        fail_and_try_rollback(manager, config, request_id, chain).await;
        outstanding.remove(request_id);
        return false;
    }
    true
}
