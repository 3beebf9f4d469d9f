//! # Spanbridge Chain Adapters
//!
//! ## Purpose
//!
//! Everything that talks to a chain lives behind the [`ChainAdapter`]
//! capability set: an infinite raw-event subscription on the source side and
//! submit/status/confirm/rollback on the destination side. The relay engine
//! treats every adapter as a failure-prone collaborator: each call is
//! wrapped in an explicit timeout by the caller and retried with capped
//! backoff.
//!
//! ## Integration Points
//!
//! - **Input sources**: WebSocket JSON-RPC subscriptions (ethereum), the
//!   in-process host ledger (internal)
//! - **Output**: [`RawChainEvent`]s into the normalizer, transaction receipts
//!   back to the relay engine
//! - **Consumers**: `relay-engine` source workers and confirmation watchers
//!
//! ## Stateless transformation principles
//!
//! Adapters hold connection state and their own submission index, nothing
//! else. They do not validate transfers, compute fees, or track lifecycle;
//! that is the transfer manager's job. The normalizer here is a pure
//! function from raw event + chain config to a canonical
//! [`TransferEvent`](types::TransferEvent).

pub mod backoff;
pub mod common;
pub mod error;
pub mod ethereum;
pub mod internal;
pub mod normalizer;

pub use backoff::Backoff;
pub use common::{
    ChainAdapter, Confirmation, EventStream, RawChainEvent, SubmitReceipt, TxState, TxStatus,
};
pub use error::{AdapterError, Result};
pub use ethereum::{EthereumAdapter, EthereumAdapterConfig};
pub use internal::{HostLedger, InternalChainAdapter, InternalEventEmitter};
pub use normalizer::{normalize, NormalizeError};
