//! The transfer manager

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{info, warn};

use adapter_service::ChainAdapter;
use types::{
    AddressValidator, ChainConfig, ChainId, SwapPair, TokenRef, TransferRequest, TransferResponse,
    TransferState, ValidationCode, ValidationIssue, ValidationResult,
};

use crate::fees::FeeCalculator;
use crate::listener::{dispatch_loop, LifecycleEvent, TransferListener};
use crate::sweep::sweep_loop;
use crate::TransferError;

/// Tuning knobs for the manager's background behaviour
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval of the deadline sweep
    pub sweep_interval: Duration,
    /// Timeout applied to adapter rollback calls from the sweep
    pub adapter_timeout: Duration,
    /// Bound of the submission intake channel
    pub intake_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            adapter_timeout: Duration::from_secs(30),
            intake_capacity: 256,
        }
    }
}

/// Fields the relay engine may patch alongside a state change
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub source_tx_id: Option<String>,
    pub destination_tx_id: Option<String>,
    pub confirmations: Option<u32>,
    pub error: Option<String>,
}

struct ManagerInner {
    config: ManagerConfig,
    running: AtomicBool,

    chains: RwLock<HashMap<ChainId, ChainConfig>>,
    validators: RwLock<HashMap<ChainId, Arc<dyn AddressValidator>>>,
    fee_calculators: RwLock<HashMap<ChainId, Arc<dyn FeeCalculator>>>,
    handlers: RwLock<HashMap<ChainId, Arc<dyn ChainAdapter>>>,
    pairs: RwLock<Vec<SwapPair>>,
    listeners: Arc<RwLock<Vec<Arc<dyn TransferListener>>>>,

    requests: DashMap<String, TransferRequest>,
    responses: DashMap<String, TransferResponse>,

    intake_tx: mpsc::Sender<TransferRequest>,
    intake_rx: Mutex<Option<mpsc::Receiver<TransferRequest>>>,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LifecycleEvent>>>,
    tap_tx: broadcast::Sender<LifecycleEvent>,
    shutdown_tx: watch::Sender<bool>,
}

/// Authoritative owner of the request/response tables
///
/// A cheap clonable handle over shared state: the tables are sharded maps
/// with per-id entry locks, registries freeze at `start()`, listener
/// dispatch runs on its own task.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<ManagerInner>,
}

impl TransferManager {
    pub fn new(config: ManagerConfig) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tap_tx, _) = broadcast::channel(1024);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ManagerInner {
                config,
                running: AtomicBool::new(false),
                chains: RwLock::new(HashMap::new()),
                validators: RwLock::new(HashMap::new()),
                fee_calculators: RwLock::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                pairs: RwLock::new(Vec::new()),
                listeners: Arc::new(RwLock::new(Vec::new())),
                requests: DashMap::new(),
                responses: DashMap::new(),
                intake_tx,
                intake_rx: Mutex::new(Some(intake_rx)),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                tap_tx,
                shutdown_tx,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Registration phase
    // ------------------------------------------------------------------

    fn ensure_not_running(&self) -> Result<(), TransferError> {
        if self.inner.running.load(Ordering::Acquire) {
            return Err(TransferError::AlreadyRunning);
        }
        Ok(())
    }

    pub fn register_chain(&self, config: ChainConfig) -> Result<(), TransferError> {
        self.ensure_not_running()?;
        config.validate()?;
        info!(
            "registered chain {} ({} confirmations)",
            config.chain_id, config.required_confirmations
        );
        self.inner.chains.write().insert(config.chain_id, config);
        Ok(())
    }

    pub fn register_validator(
        &self,
        validator: Arc<dyn AddressValidator>,
    ) -> Result<(), TransferError> {
        self.ensure_not_running()?;
        self.inner
            .validators
            .write()
            .insert(validator.chain_id(), validator);
        Ok(())
    }

    pub fn register_fee_calculator(
        &self,
        calculator: Arc<dyn FeeCalculator>,
    ) -> Result<(), TransferError> {
        self.ensure_not_running()?;
        self.inner
            .fee_calculators
            .write()
            .insert(calculator.chain_id(), calculator);
        Ok(())
    }

    pub fn register_handler(&self, handler: Arc<dyn ChainAdapter>) -> Result<(), TransferError> {
        self.ensure_not_running()?;
        info!("registered handler for {}", handler.chain_id());
        self.inner.handlers.write().insert(handler.chain_id(), handler);
        Ok(())
    }

    pub fn add_swap_pair(&self, pair: SwapPair) -> Result<(), TransferError> {
        self.ensure_not_running()?;
        pair.validate()?;
        self.inner.pairs.write().push(pair);
        Ok(())
    }

    /// Listeners may be added at any time, including after `start()`
    pub fn subscribe(&self, listener: Arc<dyn TransferListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Freeze registration and spawn the dispatcher and deadline sweep
    pub fn start(&self) -> Result<(), TransferError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(TransferError::AlreadyRunning);
        }

        let events_rx = self
            .inner
            .events_rx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .expect("start called once");
        tokio::spawn(dispatch_loop(
            events_rx,
            self.inner.listeners.clone(),
            self.inner.tap_tx.clone(),
        ));

        let manager = Arc::new(self.clone());
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(sweep_loop(manager, shutdown_rx));

        info!(
            "transfer manager started (sweep every {:?})",
            self.inner.config.sweep_interval
        );
        Ok(())
    }

    /// Stop background tasks; in-flight updates still apply
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    // ------------------------------------------------------------------
    // Accessors used by the relay engine and the API surface
    // ------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn chain_config(&self, chain: ChainId) -> Option<ChainConfig> {
        self.inner.chains.read().get(&chain).cloned()
    }

    pub fn handler(&self, chain: ChainId) -> Option<Arc<dyn ChainAdapter>> {
        self.inner.handlers.read().get(&chain).cloned()
    }

    pub fn handler_chains(&self) -> Vec<ChainId> {
        self.inner.handlers.read().keys().copied().collect()
    }

    pub fn pairs(&self) -> Vec<SwapPair> {
        self.inner.pairs.read().clone()
    }

    /// Routing rule: the first active pair whose source token matches
    pub fn route(&self, token: &TokenRef) -> Option<SwapPair> {
        self.inner
            .pairs
            .read()
            .iter()
            .find(|pair| pair.matches_source(token))
            .cloned()
    }

    /// The submission side of the intake channel; taken once by the engine
    pub async fn take_intake(&self) -> Option<mpsc::Receiver<TransferRequest>> {
        self.inner.intake_rx.lock().await.take()
    }

    /// Broadcast tap of every lifecycle transition
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.tap_tx.subscribe()
    }

    pub fn request_of(&self, id: &str) -> Option<TransferRequest> {
        self.inner.requests.get(id).map(|r| r.value().clone())
    }

    /// Responses not yet in a terminal state
    pub fn non_terminal(&self) -> Vec<TransferResponse> {
        self.inner
            .responses
            .iter()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.value().clone())
            .collect()
    }

    /// Total number of transfers ever accepted
    pub fn total_transactions(&self) -> usize {
        self.inner.responses.len()
    }

    // ------------------------------------------------------------------
    // Public contract
    // ------------------------------------------------------------------

    /// Validate a request against the current configuration
    ///
    /// Pure with respect to manager state: consults registries, mutates
    /// nothing. The clock is injected for testability; [`Self::validate`]
    /// binds it to wall time.
    pub fn validate_at(&self, request: &TransferRequest, now: DateTime<Utc>) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if request.from_chain == request.to_chain {
            errors.push(ValidationIssue::new(
                ValidationCode::SameChain,
                format!("source and destination are both {}", request.from_chain),
            ));
        }
        if request.amount.is_zero() {
            errors.push(ValidationIssue::new(
                ValidationCode::NonPositiveAmount,
                "amount must be positive",
            ));
        }
        if request.deadline <= now {
            errors.push(ValidationIssue::new(
                ValidationCode::PastDeadline,
                format!("deadline {} is in the past", request.deadline.to_rfc3339()),
            ));
        }

        {
            let validators = self.inner.validators.read();
            match validators.get(&request.from_chain) {
                Some(validator) => {
                    if let Err(e) = validator.canonicalize(&request.from_address) {
                        errors.push(ValidationIssue::new(
                            ValidationCode::InvalidFromAddress,
                            e.to_string(),
                        ));
                    }
                }
                None => warnings.push(ValidationIssue::new(
                    ValidationCode::NoChainConfig,
                    format!("no address validator for {}", request.from_chain),
                )),
            }
            match validators.get(&request.to_chain) {
                Some(validator) => {
                    if let Err(e) = validator.canonicalize(&request.to_address) {
                        errors.push(ValidationIssue::new(
                            ValidationCode::InvalidToAddress,
                            e.to_string(),
                        ));
                    }
                }
                None => warnings.push(ValidationIssue::new(
                    ValidationCode::NoChainConfig,
                    format!("no address validator for {}", request.to_chain),
                )),
            }
        }

        match self.route(&request.token) {
            Some(pair) if pair.to_token.chain_id == request.to_chain => {
                if request.amount < pair.min_amount {
                    errors.push(ValidationIssue::new(
                        ValidationCode::BelowMin,
                        format!("amount below pair minimum {}", pair.min_amount),
                    ));
                } else if request.amount > pair.max_amount {
                    errors.push(ValidationIssue::new(
                        ValidationCode::AboveMax,
                        format!("amount above pair maximum {}", pair.max_amount),
                    ));
                }
            }
            _ => {
                errors.push(ValidationIssue::new(
                    ValidationCode::UnsupportedPair,
                    format!(
                        "no active pair for {} from {} to {}",
                        request.token.symbol, request.from_chain, request.to_chain
                    ),
                ));
            }
        }

        let estimated_fee = {
            let calculators = self.inner.fee_calculators.read();
            match calculators.get(&request.from_chain) {
                Some(calculator) => {
                    let fee = calculator.estimate(&request.token, request.amount);
                    if fee.is_none() {
                        warnings.push(ValidationIssue::new(
                            ValidationCode::FeeUnavailable,
                            format!("no fee schedule for {}", request.token.symbol),
                        ));
                    }
                    fee
                }
                None => {
                    warnings.push(ValidationIssue::new(
                        ValidationCode::FeeUnavailable,
                        format!("no fee calculator for {}", request.from_chain),
                    ));
                    None
                }
            }
        };

        let estimated_duration_secs = {
            let chains = self.inner.chains.read();
            match chains.get(&request.to_chain) {
                Some(config) => Some(config.estimated_duration_secs()),
                None => {
                    warnings.push(ValidationIssue::new(
                        ValidationCode::NoChainConfig,
                        format!("no chain config for {}", request.to_chain),
                    ));
                    None
                }
            }
        };

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
            estimated_fee,
            estimated_duration_secs,
        }
    }

    pub fn validate(&self, request: &TransferRequest) -> ValidationResult {
        self.validate_at(request, Utc::now())
    }

    /// Accept a request: validate, record `Pending`, enqueue for submission
    ///
    /// Idempotent per request id: a second call returns the existing
    /// response without enqueuing a second submission.
    pub async fn accept(
        &self,
        mut request: TransferRequest,
    ) -> Result<TransferResponse, TransferError> {
        if !self.is_running() {
            return Err(TransferError::NotRunning);
        }

        if let Some(existing) = self.inner.responses.get(&request.id) {
            return Ok(existing.value().clone());
        }

        let now = Utc::now();
        let validation = self.validate_at(&request, now);
        if !validation.valid {
            let summary = validation
                .errors
                .iter()
                .map(|issue| format!("{:?}", issue.code))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(TransferError::ValidationFailed {
                request_id: request.id.clone(),
                summary,
                result: validation,
            });
        }

        if request.fee.is_none() {
            request.fee = validation.estimated_fee;
        }
        request.created_at = now;
        request.updated_at = now;

        let (required_confirmations, estimated_duration_secs) =
            match self.chain_config(request.to_chain) {
                Some(config) => (
                    config.required_confirmations,
                    config.estimated_duration_secs(),
                ),
                None => (1, 0),
            };

        let response = TransferResponse::pending(
            &request.id,
            required_confirmations,
            estimated_duration_secs,
            now,
        );

        // Entry-level guard: a concurrent accept of the same id resolves to
        // exactly one inserted response.
        use dashmap::mapref::entry::Entry;
        match self.inner.responses.entry(request.id.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(response.clone());
            }
        }
        self.inner.requests.insert(request.id.clone(), request.clone());

        let _ = self.inner.events_tx.send(LifecycleEvent {
            previous: None,
            response: response.clone(),
        });

        info!(
            "accepted transfer {} ({} {} {} -> {})",
            request.id, request.amount, request.token.symbol, request.from_chain, request.to_chain
        );

        // Bounded send: suspending here is the backpressure the source
        // worker relies on.
        self.inner
            .intake_tx
            .send(request)
            .await
            .map_err(|_| TransferError::IntakeClosed)?;

        Ok(response)
    }

    /// Current state of a request
    pub fn status_of(&self, id: &str) -> Result<TransferResponse, TransferError> {
        self.inner
            .responses
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| TransferError::UnknownRequest(id.to_string()))
    }

    /// Apply a state transition (relay engine only)
    ///
    /// Same-state calls are patch-only updates (confirmation progress) and
    /// emit no lifecycle event. Illegal transitions are rejected and logged.
    pub fn update(
        &self,
        id: &str,
        new_state: TransferState,
        patch: StatePatch,
    ) -> Result<TransferResponse, TransferError> {
        let mut entry = self
            .inner
            .responses
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownRequest(id.to_string()))?;

        let previous = entry.state;
        let now = Utc::now();

        if previous != new_state {
            if !previous.can_transition_to(new_state) {
                warn!("rejected transition {previous} -> {new_state} for {id}");
                return Err(TransferError::IllegalTransition {
                    request_id: id.to_string(),
                    from: previous,
                    to: new_state,
                });
            }
            entry.state = new_state;
        }

        if let Some(tx) = patch.source_tx_id {
            entry.source_tx_id = Some(tx);
        }
        if let Some(tx) = patch.destination_tx_id {
            entry.destination_tx_id = Some(tx);
        }
        if let Some(confirmations) = patch.confirmations {
            entry.confirmations = confirmations;
        }
        if let Some(error) = patch.error {
            entry.error = Some(error);
        }
        entry.updated_at = now;

        if previous != new_state && new_state.is_terminal() {
            entry.completed_at = Some(now);
            entry.actual_duration_secs =
                Some((now - entry.created_at).num_seconds().max(0) as u64);
        }

        let response = entry.clone();
        drop(entry);

        if previous != new_state {
            info!("transfer {id}: {previous} -> {new_state}");
            let _ = self.inner.events_tx.send(LifecycleEvent {
                previous: Some(previous),
                response: response.clone(),
            });
        }

        Ok(response)
    }
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}
