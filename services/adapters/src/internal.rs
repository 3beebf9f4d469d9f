//! Internal (host chain) reference adapter
//!
//! The bridge consumes its host blockchain through a minimal
//! mint/burn/balance capability set, modelled here by [`HostLedger`]. The
//! adapter mints on submission, advances confirmations deterministically on
//! every status poll, and burns back on rollback. Source-side events are
//! pushed through an [`InternalEventEmitter`], the host's burn hook, and
//! flow out of `subscribe` like any remote chain's stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::common::{
    ChainAdapter, Confirmation, EventStream, RawChainEvent, SubmitReceipt, TxState, TxStatus,
};
use crate::error::{AdapterError, Result};
use types::{ChainId, TransferRequest, U256};

/// Ledger-level failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance for {address}/{symbol}: have {have}, need {need}")]
    InsufficientBalance {
        address: String,
        symbol: String,
        have: U256,
        need: U256,
    },
}

/// Minimal mint/burn/balance view of the host chain
///
/// Balances are keyed by `(address, symbol)`; every mutation takes the
/// account's shard lock, so concurrent mints and burns never lose updates.
#[derive(Debug, Default)]
pub struct HostLedger {
    balances: DashMap<(String, String), U256>,
}

impl HostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account; returns the new balance
    pub fn mint(&self, address: &str, symbol: &str, amount: U256) -> U256 {
        let mut entry = self
            .balances
            .entry((address.to_string(), symbol.to_string()))
            .or_insert_with(U256::zero);
        *entry = entry.saturating_add(amount);
        *entry
    }

    /// Debit an account; fails without mutating when the balance is short
    pub fn burn(&self, address: &str, symbol: &str, amount: U256) -> std::result::Result<U256, LedgerError> {
        let mut entry = self
            .balances
            .entry((address.to_string(), symbol.to_string()))
            .or_insert_with(U256::zero);
        if *entry < amount {
            return Err(LedgerError::InsufficientBalance {
                address: address.to_string(),
                symbol: symbol.to_string(),
                have: *entry,
                need: amount,
            });
        }
        *entry -= amount;
        Ok(*entry)
    }

    pub fn balance(&self, address: &str, symbol: &str) -> U256 {
        self.balances
            .get(&(address.to_string(), symbol.to_string()))
            .map(|b| *b)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct InternalTx {
    request_id: String,
    to_address: String,
    symbol: String,
    amount: U256,
    confirmations: u32,
    state: TxState,
}

type SubscriberSlot = Arc<Mutex<Option<mpsc::Sender<RawChainEvent>>>>;

/// Handle for pushing host-chain transfer events into the subscription
///
/// Sends suspend when the subscriber's channel is full, which propagates
/// backpressure all the way to the host's burn hook.
#[derive(Clone)]
pub struct InternalEventEmitter {
    subscriber: SubscriberSlot,
    next_tx: Arc<AtomicU64>,
    next_block: Arc<AtomicU64>,
}

impl InternalEventEmitter {
    /// Emit a burn-side transfer event to the current subscriber
    ///
    /// Returns `false` when nobody is subscribed; the event is then lost to
    /// this stream (a later subscriber starts from its own checkpoint).
    pub async fn emit_transfer(
        &self,
        from: &str,
        to: &str,
        symbol: &str,
        amount: U256,
    ) -> bool {
        let sender = self.subscriber.lock().clone();
        let Some(sender) = sender else {
            warn!("internal event dropped: no active subscription");
            return false;
        };

        let seq = self.next_tx.fetch_add(1, Ordering::Relaxed);
        let block = self.next_block.fetch_add(1, Ordering::Relaxed);

        let mut event = RawChainEvent::of_kind(ChainId::Internal, RawChainEvent::KIND_TRANSFER);
        event.tx_id = Some(format!("btx{seq:016x}"));
        event.log_index = Some(0);
        event.from = Some(from.to_string());
        event.to = Some(to.to_string());
        event.token_symbol = Some(symbol.to_string());
        event.amount = Some(amount.to_string());
        event.block_height = Some(block);

        sender.send(event).await.is_ok()
    }
}

/// Reference adapter for the host chain
pub struct InternalChainAdapter {
    ledger: Arc<HostLedger>,
    txs: DashMap<String, InternalTx>,
    by_request: DashMap<String, String>,
    subscriber: SubscriberSlot,
    required_confirmations: u32,
    /// Confirmations gained per status/confirm poll
    confirmation_step: u32,
    subscription_capacity: usize,
    next_tx: Arc<AtomicU64>,
    next_block: Arc<AtomicU64>,
}

impl InternalChainAdapter {
    pub fn new(ledger: Arc<HostLedger>, required_confirmations: u32) -> Self {
        Self {
            ledger,
            txs: DashMap::new(),
            by_request: DashMap::new(),
            subscriber: Arc::new(Mutex::new(None)),
            required_confirmations,
            confirmation_step: 1,
            subscription_capacity: 256,
            next_tx: Arc::new(AtomicU64::new(1)),
            next_block: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Confirmations gained per poll (defaults to 1)
    pub fn with_confirmation_step(mut self, step: u32) -> Self {
        self.confirmation_step = step.max(1);
        self
    }

    /// Bound of the subscription channel (defaults to 256)
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }

    /// The host's burn hook: pushes source events into the subscription
    pub fn emitter(&self) -> InternalEventEmitter {
        InternalEventEmitter {
            subscriber: self.subscriber.clone(),
            next_tx: self.next_tx.clone(),
            next_block: self.next_block.clone(),
        }
    }

    fn advance(&self, tx_id: &str) -> Result<InternalTx> {
        let mut tx = self
            .txs
            .get_mut(tx_id)
            .ok_or_else(|| AdapterError::UnknownTransaction {
                chain: ChainId::Internal,
                tx_id: tx_id.to_string(),
            })?;
        if tx.state == TxState::Pending {
            tx.confirmations = tx.confirmations.saturating_add(self.confirmation_step);
            if tx.confirmations >= self.required_confirmations {
                tx.state = TxState::Confirmed;
            }
        }
        Ok(tx.clone())
    }
}

#[async_trait]
impl ChainAdapter for InternalChainAdapter {
    fn chain_id(&self) -> ChainId {
        ChainId::Internal
    }

    async fn subscribe(&self, _from_block: Option<u64>) -> Result<EventStream> {
        // The host pushes events; a block checkpoint has no meaning here.
        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        *self.subscriber.lock() = Some(tx);
        info!("internal adapter subscription started");

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn submit(&self, request: &TransferRequest) -> Result<SubmitReceipt> {
        use dashmap::mapref::entry::Entry;

        // Idempotent per request id: a resubmission returns the original
        // receipt instead of double-minting.
        match self.by_request.entry(request.id.clone()) {
            Entry::Occupied(existing) => {
                let tx_id = existing.get().clone();
                let tx = self.txs.get(&tx_id).ok_or_else(|| AdapterError::UnknownTransaction {
                    chain: ChainId::Internal,
                    tx_id: tx_id.clone(),
                })?;
                debug!("resubmission of {} resolved to {}", request.id, tx_id);
                Ok(SubmitReceipt {
                    tx_id,
                    state: tx.state,
                })
            }
            Entry::Vacant(slot) => {
                let seq = self.next_tx.fetch_add(1, Ordering::Relaxed);
                let tx_id = format!("itx{seq:016x}");

                self.ledger
                    .mint(&request.to_address, &request.token.symbol, request.amount);
                self.txs.insert(
                    tx_id.clone(),
                    InternalTx {
                        request_id: request.id.clone(),
                        to_address: request.to_address.clone(),
                        symbol: request.token.symbol.clone(),
                        amount: request.amount,
                        confirmations: 0,
                        state: TxState::Pending,
                    },
                );
                slot.insert(tx_id.clone());
                info!(
                    "minted {} {} to {} for request {} as {}",
                    request.amount, request.token.symbol, request.to_address, request.id, tx_id
                );
                Ok(SubmitReceipt {
                    tx_id,
                    state: TxState::Pending,
                })
            }
        }
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus> {
        let tx = self.advance(tx_id)?;
        Ok(TxStatus {
            state: tx.state,
            confirmations: tx.confirmations,
        })
    }

    async fn confirm(&self, tx_id: &str) -> Result<Confirmation> {
        let tx = self.advance(tx_id)?;
        Ok(Confirmation {
            confirmations: tx.confirmations,
            is_final: tx.confirmations >= self.required_confirmations,
        })
    }

    async fn rollback(&self, request: &TransferRequest) -> Result<()> {
        let Some(tx_id) = self.by_request.get(&request.id).map(|t| t.value().clone()) else {
            // Nothing was minted for this request; the rollback is a no-op.
            debug!("rollback of {}: nothing submitted", request.id);
            return Ok(());
        };

        let mut tx = self
            .txs
            .get_mut(&tx_id)
            .ok_or_else(|| AdapterError::UnknownTransaction {
                chain: ChainId::Internal,
                tx_id: tx_id.clone(),
            })?;

        if tx.state == TxState::Failed {
            return Ok(()); // already reversed
        }

        self.ledger
            .burn(&tx.to_address, &tx.symbol, tx.amount)
            .map_err(|e| AdapterError::SubmitFailed {
                chain: ChainId::Internal,
                reason: format!("rollback burn failed: {e}"),
            })?;
        tx.state = TxState::Failed;
        info!("rolled back {} ({} burned from {})", tx.request_id, tx.amount, tx.to_address);
        Ok(())
    }
}
