//! Deadline sweep
//!
//! A periodic walk over non-terminal responses. Anything whose deadline has
//! passed transitions to `Expired`; when the destination handler supports
//! rollback, the expired transfer is reversed and resolved as `RolledBack`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use types::TransferState;

use crate::manager::{StatePatch, TransferManager};

pub(crate) async fn sweep_loop(manager: Arc<TransferManager>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(manager.config().sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("deadline sweep started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&manager).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("deadline sweep stopped");
                    return;
                }
            }
        }
    }
}

/// One pass over the non-terminal set; also called directly by tests
pub(crate) async fn sweep_once(manager: &Arc<TransferManager>) {
    let now = Utc::now();

    for response in manager.non_terminal() {
        let Some(request) = manager.request_of(&response.request_id) else {
            continue;
        };
        if !request.is_expired_at(now) {
            continue;
        }
        // Confirmed transfers are past the point of expiry; only the
        // pre-confirmation states can time out.
        if !matches!(
            response.state,
            TransferState::Pending | TransferState::Submitted
        ) {
            continue;
        }

        warn!(
            "transfer {} passed its deadline in state {}",
            response.request_id, response.state
        );
        if manager
            .update(&response.request_id, TransferState::Expired, StatePatch::default())
            .is_err()
        {
            // Lost the race against a concurrent transition; leave it be.
            continue;
        }

        // Reverse whatever the destination may have seen. An adapter that
        // refuses (Irreversible) leaves the transfer Expired.
        let Some(handler) = manager.handler(request.to_chain) else {
            debug!("no handler for {}; expiry stands", request.to_chain);
            continue;
        };
        let rollback = timeout(manager.config().adapter_timeout, handler.rollback(&request)).await;
        match rollback {
            Ok(Ok(())) => {
                info!("rolled back expired transfer {}", request.id);
                let _ = manager.update(
                    &request.id,
                    TransferState::RolledBack,
                    StatePatch::default(),
                );
            }
            Ok(Err(e)) => {
                warn!("rollback of {} refused: {e}", request.id);
            }
            Err(_) => {
                warn!(
                    "rollback of {} timed out after {:?}",
                    request.id,
                    manager.config().adapter_timeout
                );
            }
        }
    }
}
