//! Engine assembly and lifecycle

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use adapter_service::ChainAdapter;
use replay_store::{ReplayStore, ReplayStoreError};
use transfer_manager::TransferManager;
use types::TransferState;

use crate::stats::{HealthRegistry, RelayStats};
use crate::watcher::{watcher_loop, Outstanding};
use crate::worker::{source_worker_loop, submission_pump_loop};
use crate::RelayError;

/// Engine tuning, filled from `BRIDGE_*` environment variables by the binary
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for every destination adapter call
    pub submit_timeout: Duration,
    /// Tick of the confirmation watchers
    pub confirm_poll_interval: Duration,
    /// First delay of the replay-store retry backoff
    pub storage_backoff_base: Duration,
    /// Backoff cap for replay-store and submit retries
    pub storage_backoff_cap: Duration,
    /// After this long of continuous storage failure the source worker is
    /// reported unhealthy (it keeps retrying)
    pub storage_unhealthy_after: Duration,
    /// Deadline window stamped onto requests built from source events
    pub event_deadline_window: chrono::Duration,
    /// Concurrent destination submissions; when all slots are busy the
    /// intake fills and source workers suspend
    pub submit_concurrency: usize,
    /// Consecutive watcher poll errors before a transfer is failed
    pub max_poll_failures: u32,
    /// Grace period for in-flight work at shutdown
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(30),
            confirm_poll_interval: Duration::from_secs(5),
            storage_backoff_base: Duration::from_millis(100),
            storage_backoff_cap: Duration::from_secs(30),
            storage_unhealthy_after: Duration::from_secs(300),
            event_deadline_window: chrono::Duration::minutes(30),
            submit_concurrency: 8,
            max_poll_failures: 5,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// The relay engine: source workers, submission pump, confirmation watchers
pub struct RelayEngine {
    manager: Arc<TransferManager>,
    replay: Arc<ReplayStore>,
    config: EngineConfig,
    stats: Arc<RelayStats>,
    health: Arc<HealthRegistry>,
    outstanding: Arc<DashMap<String, Outstanding>>,
    sources: Mutex<Vec<Arc<dyn ChainAdapter>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    fatal_tx: mpsc::UnboundedSender<ReplayStoreError>,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<ReplayStoreError>>>,
}

impl RelayEngine {
    pub fn new(
        manager: Arc<TransferManager>,
        replay: Arc<ReplayStore>,
        config: EngineConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            manager,
            replay,
            config,
            stats: Arc::new(RelayStats::new()),
            health: Arc::new(HealthRegistry::new()),
            outstanding: Arc::new(DashMap::new()),
            sources: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        }
    }

    /// Register a source chain to pump events from
    pub async fn add_source(&self, adapter: Arc<dyn ChainAdapter>) {
        self.sources.lock().await.push(adapter);
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    pub fn health(&self) -> Arc<HealthRegistry> {
        self.health.clone()
    }

    pub fn manager(&self) -> Arc<TransferManager> {
        self.manager.clone()
    }

    pub fn replay(&self) -> Arc<ReplayStore> {
        self.replay.clone()
    }

    /// Receiver that yields if the replay store reports corruption; the
    /// hosting process exits with a distinct code on it
    pub async fn take_fatal(&self) -> Option<mpsc::UnboundedReceiver<ReplayStoreError>> {
        self.fatal_rx.lock().await.take()
    }

    /// Spawn all workers
    ///
    /// Requires a started manager (the intake channel is taken here). Also
    /// re-seeds the confirmation watchers with any `Submitted` transfers the
    /// manager still holds, so a restarted engine resumes watching.
    pub async fn start(&self) -> Result<(), RelayError> {
        let Some(intake) = self.manager.take_intake().await else {
            return Err(RelayError::AlreadyStarted);
        };

        let mut tasks = self.tasks.lock().await;

        // Re-seed outstanding submissions (engine restart with a live manager).
        for response in self.manager.non_terminal() {
            if response.state == TransferState::Submitted {
                if let (Some(tx_id), Some(request)) = (
                    response.destination_tx_id.clone(),
                    self.manager.request_of(&response.request_id),
                ) {
                    self.outstanding.insert(
                        response.request_id.clone(),
                        Outstanding::new(request.to_chain, tx_id),
                    );
                }
            }
        }

        // Submission pump.
        tasks.push(tokio::spawn(submission_pump_loop(
            self.manager.clone(),
            intake,
            self.outstanding.clone(),
            self.stats.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        )));

        // One worker per source chain.
        let sources = self.sources.lock().await.clone();
        for adapter in sources {
            let chain = adapter.chain_id();
            self.health.set_source(chain, true, None);
            tasks.push(tokio::spawn(source_worker_loop(
                adapter,
                self.manager.clone(),
                self.replay.clone(),
                self.stats.clone(),
                self.health.clone(),
                self.config.clone(),
                self.fatal_tx.clone(),
                self.shutdown_tx.subscribe(),
            )));
        }

        // One confirmation watcher per destination handler.
        for chain in self.manager.handler_chains() {
            self.health.set_destination(chain, true, None);
            tasks.push(tokio::spawn(watcher_loop(
                chain,
                self.manager.clone(),
                self.outstanding.clone(),
                self.stats.clone(),
                self.health.clone(),
                self.config.clone(),
                self.shutdown_tx.subscribe(),
            )));
        }

        info!("relay engine started: {} tasks", tasks.len());
        Ok(())
    }

    /// Signal shutdown, wait for workers up to the grace period, then abort
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.manager.shutdown();

        let mut tasks = self.tasks.lock().await;
        let grace = self.config.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        for mut task in tasks.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                warn!("worker did not stop within {grace:?}; aborting");
                task.abort();
            }
        }
        info!("relay engine stopped");
    }

    /// Deterministic request id for an event-driven transfer
    pub(crate) fn request_id_for(fingerprint: &types::Fingerprint) -> String {
        format!("evt-{}", &fingerprint.to_string()[..16])
    }
}
