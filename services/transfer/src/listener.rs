//! Lifecycle listeners and the dispatch task

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use types::{TransferResponse, TransferState};

/// One lifecycle transition, as published to listeners and the log stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// State before the transition; `None` for acceptance
    pub previous: Option<TransferState>,
    /// Full response after the transition
    pub response: TransferResponse,
}

/// Callbacks for transfer lifecycle milestones
///
/// Invoked from the manager's dispatcher task, in transition order per
/// request id. Implementations may suspend; they delay other listeners but
/// never the relay engine.
#[async_trait]
pub trait TransferListener: Send + Sync {
    async fn on_initiated(&self, _response: &TransferResponse) {}
    async fn on_confirmed(&self, _response: &TransferResponse) {}
    async fn on_completed(&self, _response: &TransferResponse) {}
    async fn on_failed(&self, _response: &TransferResponse) {}
    async fn on_rolled_back(&self, _response: &TransferResponse) {}
}

/// Drain lifecycle events, invoking listener callbacks and feeding the
/// broadcast tap consumed by the WebSocket log stream
pub(crate) async fn dispatch_loop(
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
    listeners: std::sync::Arc<parking_lot::RwLock<Vec<std::sync::Arc<dyn TransferListener>>>>,
    tap: broadcast::Sender<LifecycleEvent>,
) {
    while let Some(event) = events.recv().await {
        // Nobody listening on the tap is fine; broadcast just drops it.
        let _ = tap.send(event.clone());

        // Snapshot outside the await: a listener may subscribe further
        // listeners or call back into the manager.
        let snapshot: Vec<_> = listeners.read().clone();
        if snapshot.is_empty() {
            continue;
        }

        debug!(
            "dispatching {} -> {} for {}",
            event
                .previous
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string()),
            event.response.state,
            event.response.request_id
        );

        for listener in snapshot {
            invoke(listener.as_ref(), &event).await;
        }
    }
    debug!("lifecycle dispatcher stopped");
}

async fn invoke(listener: &dyn TransferListener, event: &LifecycleEvent) {
    match (event.previous, event.response.state) {
        (None, TransferState::Pending) => listener.on_initiated(&event.response).await,
        (_, TransferState::Confirmed) => listener.on_confirmed(&event.response).await,
        (_, TransferState::Completed) => listener.on_completed(&event.response).await,
        (_, TransferState::Failed) => listener.on_failed(&event.response).await,
        (_, TransferState::RolledBack) => listener.on_rolled_back(&event.response).await,
        // Submitted and Expired have no dedicated callback; they still reach
        // the broadcast tap above.
        _ => {}
    }
}
