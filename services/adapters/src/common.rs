//! Core adapter capability set and shared event types

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use types::{ChainId, TransferRequest};

/// Lazy infinite stream of raw events from one source chain
///
/// The stream ends when the underlying transport drops; callers restart it
/// from their block checkpoint via [`ChainAdapter::subscribe`].
pub type EventStream = Pin<Box<dyn Stream<Item = RawChainEvent> + Send>>;

/// Adapter-level view of a submitted transaction's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    /// In the mempool or below the confirmation threshold
    Pending,
    /// At or past the chain's required confirmations
    Confirmed,
    /// Dropped, reverted, or rejected
    Failed,
}

/// Result of a destination-side submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Transaction id assigned by the destination chain
    pub tx_id: String,
    /// State immediately after submission
    pub state: TxState,
}

/// Point-in-time status of a destination transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    pub state: TxState,
    pub confirmations: u32,
}

/// Confirmation progress, promoted to terminal at the required depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub confirmations: u32,
    pub is_final: bool,
}

/// A chain event before normalization
///
/// Adapters fill in what their chain exposes; the normalizer decides whether
/// the result is a bridge transfer and rejects anything incomplete. Field
/// absence is meaningful: a missing `to` is a malformed transfer, a foreign
/// `kind` is simply not ours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChainEvent {
    /// Chain the event was observed on
    pub chain_id: ChainId,
    /// Adapter-specific event discriminator; bridge transfers use
    /// [`RawChainEvent::KIND_TRANSFER`]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    /// Amount in base units, decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
}

impl RawChainEvent {
    /// Discriminator for bridge token transfers
    pub const KIND_TRANSFER: &'static str = "transfer";

    /// Empty event of a given kind; tests and adapters fill the rest
    pub fn of_kind(chain_id: ChainId, kind: &str) -> Self {
        Self {
            chain_id,
            kind: kind.to_string(),
            tx_id: None,
            log_index: None,
            from: None,
            to: None,
            token_symbol: None,
            contract_address: None,
            amount: None,
            block_height: None,
        }
    }
}

/// Capability set every chain integration implements
///
/// One adapter object encapsulates all communication with one chain. The
/// engine never special-cases a chain: anything chain-specific belongs
/// behind this trait. Connection lifetimes are scoped to the adapter object
/// and released when it drops.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Which chain this adapter serves
    fn chain_id(&self) -> ChainId;

    /// Start a raw-event stream, optionally from a block checkpoint
    ///
    /// The returned stream is not required to be thread-safe; starting a new
    /// stream after the previous one was cancelled or dropped is always
    /// permitted.
    async fn subscribe(&self, from_block: Option<u64>) -> Result<EventStream>;

    /// Initiate the destination-side action for an accepted request
    ///
    /// Idempotent per `request.id`: resubmission either returns the original
    /// receipt or fails with [`AdapterError::AlreadySubmitted`](crate::AdapterError::AlreadySubmitted).
    async fn submit(&self, request: &TransferRequest) -> Result<SubmitReceipt>;

    /// Non-blocking progress check for a submitted transaction
    async fn status(&self, tx_id: &str) -> Result<TxStatus>;

    /// Like [`status`](Self::status), promoted to terminal once the chain's
    /// required confirmation depth is reached
    async fn confirm(&self, tx_id: &str) -> Result<Confirmation>;

    /// Reverse a submitted transfer after failure or expiry
    ///
    /// Adapters may refuse with [`AdapterError::Irreversible`](crate::AdapterError::Irreversible).
    async fn rollback(&self, request: &TransferRequest) -> Result<()>;
}
