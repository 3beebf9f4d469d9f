//! Test doubles and wiring shared by the pipeline tests

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;

use adapter_service::{
    AdapterError, ChainAdapter, Confirmation, EventStream, RawChainEvent, SubmitReceipt, TxState,
    TxStatus,
};
use relay_engine::{EngineConfig, RelayEngine};
use replay_store::ReplayStore;
use transfer_manager::{FeeSchedule, FlatFeeCalculator, ManagerConfig, TransferManager};
use types::{
    ChainConfig, ChainId, EvmAddressValidator, InternalAddressValidator, SwapPair, TokenRef,
    TransferRequest, U256,
};

/// Source adapter that plays a fixed script of raw events, then idles
pub struct ScriptedSource {
    chain: ChainId,
    script: Mutex<Option<Vec<RawChainEvent>>>,
    delivered: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(chain: ChainId, events: Vec<RawChainEvent>) -> Self {
        Self {
            chain,
            script: Mutex::new(Some(events)),
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Events the worker has actually pulled off the stream
    pub fn delivered(&self) -> Arc<AtomicUsize> {
        self.delivered.clone()
    }
}

#[async_trait]
impl ChainAdapter for ScriptedSource {
    fn chain_id(&self) -> ChainId {
        self.chain
    }

    async fn subscribe(&self, _from_block: Option<u64>) -> adapter_service::Result<EventStream> {
        let events = self.script.lock().take().unwrap_or_default();
        let delivered = self.delivered.clone();
        let stream = futures::stream::iter(events)
            .map(move |event| {
                delivered.fetch_add(1, Ordering::SeqCst);
                event
            })
            .chain(futures::stream::pending());
        Ok(Box::pin(stream))
    }

    async fn submit(&self, _request: &TransferRequest) -> adapter_service::Result<SubmitReceipt> {
        Err(AdapterError::NotSupported {
            chain: self.chain,
            reason: "source only".to_string(),
        })
    }

    async fn status(&self, _tx_id: &str) -> adapter_service::Result<TxStatus> {
        Err(AdapterError::NotSupported {
            chain: self.chain,
            reason: "source only".to_string(),
        })
    }

    async fn confirm(&self, _tx_id: &str) -> adapter_service::Result<Confirmation> {
        Err(AdapterError::NotSupported {
            chain: self.chain,
            reason: "source only".to_string(),
        })
    }

    async fn rollback(&self, _request: &TransferRequest) -> adapter_service::Result<()> {
        Ok(())
    }
}

/// What the mock destination does on submit
#[derive(Debug, Clone)]
pub enum SubmitMode {
    /// Accept and confirm over successive polls
    Succeed,
    /// Permanent adapter failure with this message
    FailPermanent(String),
    /// Hang until [`MockDestination::release`] is called, then accept
    Hang,
}

/// Destination adapter with programmable behaviour
pub struct MockDestination {
    chain: ChainId,
    mode: Mutex<SubmitMode>,
    released: std::sync::atomic::AtomicBool,
    submit_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    rollback_ok: bool,
    required_confirmations: u32,
    txs: DashMap<String, AtomicU32>,
    by_request: DashMap<String, String>,
    next_tx: AtomicUsize,
}

impl MockDestination {
    pub fn new(chain: ChainId, mode: SubmitMode, rollback_ok: bool) -> Self {
        Self {
            chain,
            mode: Mutex::new(mode),
            released: std::sync::atomic::AtomicBool::new(false),
            submit_calls: AtomicUsize::new(0),
            rollback_calls: AtomicUsize::new(0),
            rollback_ok,
            required_confirmations: 3,
            txs: DashMap::new(),
            by_request: DashMap::new(),
            next_tx: AtomicUsize::new(1),
        }
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn unique_submissions(&self) -> usize {
        self.by_request.len()
    }

    pub fn rollback_calls(&self) -> usize {
        self.rollback_calls.load(Ordering::SeqCst)
    }

    /// Let hanging submissions proceed
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainAdapter for MockDestination {
    fn chain_id(&self) -> ChainId {
        self.chain
    }

    async fn subscribe(&self, _from_block: Option<u64>) -> adapter_service::Result<EventStream> {
        Ok(Box::pin(futures::stream::pending()))
    }

    async fn submit(&self, request: &TransferRequest) -> adapter_service::Result<SubmitReceipt> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let mode = self.mode.lock().clone();
        match mode {
            SubmitMode::FailPermanent(reason) => {
                return Err(AdapterError::SubmitFailed {
                    chain: self.chain,
                    reason,
                })
            }
            SubmitMode::Hang => {
                while !self.released.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
            SubmitMode::Succeed => {}
        }

        if let Some(existing) = self.by_request.get(&request.id) {
            return Ok(SubmitReceipt {
                tx_id: existing.value().clone(),
                state: TxState::Pending,
            });
        }
        let tx_id = format!("mtx{:04}", self.next_tx.fetch_add(1, Ordering::SeqCst));
        self.txs.insert(tx_id.clone(), AtomicU32::new(0));
        self.by_request.insert(request.id.clone(), tx_id.clone());
        Ok(SubmitReceipt {
            tx_id,
            state: TxState::Pending,
        })
    }

    async fn status(&self, tx_id: &str) -> adapter_service::Result<TxStatus> {
        let confs = self
            .txs
            .get(tx_id)
            .ok_or_else(|| AdapterError::UnknownTransaction {
                chain: self.chain,
                tx_id: tx_id.to_string(),
            })?
            .fetch_add(1, Ordering::SeqCst)
            + 1;
        let state = if confs >= self.required_confirmations {
            TxState::Confirmed
        } else {
            TxState::Pending
        };
        Ok(TxStatus {
            state,
            confirmations: confs,
        })
    }

    async fn confirm(&self, tx_id: &str) -> adapter_service::Result<Confirmation> {
        let status = self.status(tx_id).await?;
        Ok(Confirmation {
            confirmations: status.confirmations,
            is_final: status.state == TxState::Confirmed,
        })
    }

    async fn rollback(&self, _request: &TransferRequest) -> adapter_service::Result<()> {
        self.rollback_calls.fetch_add(1, Ordering::SeqCst);
        if self.rollback_ok {
            Ok(())
        } else {
            Err(AdapterError::Irreversible { chain: self.chain })
        }
    }
}

/// A manager wired for internal → ethereum transfers of WETH
pub fn wired_manager(intake_capacity: usize) -> Arc<TransferManager> {
    let manager = Arc::new(TransferManager::new(ManagerConfig {
        sweep_interval: Duration::from_millis(100),
        adapter_timeout: Duration::from_secs(2),
        intake_capacity,
    }));

    let wrapped = TokenRef::internal("WETH", "Wrapped Ether", 18);
    let native = TokenRef::native("ETH", "Ether", 18, ChainId::Ethereum);

    manager
        .register_chain(ChainConfig {
            chain_id: ChainId::Internal,
            required_confirmations: 1,
            block_time_secs: 1,
            supported_tokens: vec![wrapped.clone()],
            native_token: wrapped.clone(),
            is_testnet: true,
        })
        .unwrap();
    manager
        .register_chain(ChainConfig {
            chain_id: ChainId::Ethereum,
            required_confirmations: 3,
            block_time_secs: 1,
            supported_tokens: vec![native.clone()],
            native_token: native.clone(),
            is_testnet: true,
        })
        .unwrap();
    manager
        .register_validator(Arc::new(InternalAddressValidator))
        .unwrap();
    manager.register_validator(Arc::new(EvmAddressValidator)).unwrap();
    manager
        .register_fee_calculator(Arc::new(
            FlatFeeCalculator::new(ChainId::Internal)
                .with_schedule("WETH", FeeSchedule::new(U256::from(100u64), 30)),
        ))
        .unwrap();
    manager
        .add_swap_pair(SwapPair {
            from_token: wrapped,
            to_token: native,
            exchange_rate: 1.0,
            min_amount: U256::one(),
            max_amount: U256::from(10).pow(U256::from(24)),
            fee_percent: 0.003,
            active: true,
        })
        .unwrap();
    manager
}

/// Fast-tick engine config for tests
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        submit_timeout: Duration::from_secs(2),
        confirm_poll_interval: Duration::from_millis(50),
        storage_backoff_base: Duration::from_millis(10),
        storage_backoff_cap: Duration::from_millis(100),
        storage_unhealthy_after: Duration::from_secs(60),
        event_deadline_window: chrono::Duration::minutes(5),
        submit_concurrency: 8,
        max_poll_failures: 3,
        shutdown_grace: Duration::from_secs(1),
    }
}

/// A well-formed WETH burn event on the internal chain
pub fn burn_event(tx: &str, block: u64) -> RawChainEvent {
    let mut event = RawChainEvent::of_kind(ChainId::Internal, RawChainEvent::KIND_TRANSFER);
    event.tx_id = Some(tx.to_string());
    event.log_index = Some(0);
    event.from = Some("bh1234deadbeef".to_string());
    event.to = Some("0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string());
    event.token_symbol = Some("WETH".to_string());
    event.amount = Some("1000000000000000000".to_string());
    event.block_height = Some(block);
    event
}

/// Engine over a temp-dir replay store; returns the store path for reopen
pub async fn engine_with(
    manager: Arc<TransferManager>,
    replay: Arc<ReplayStore>,
    source: Arc<dyn ChainAdapter>,
) -> Arc<RelayEngine> {
    let engine = Arc::new(RelayEngine::new(manager, replay, fast_config()));
    engine.add_source(source).await;
    engine
}
