//! # Spanbridge Transfer Manager
//!
//! ## Purpose
//!
//! The authoritative registry of in-flight transfers. Owns the
//! request/response tables exclusively, enforces the lifecycle state machine,
//! computes fees, and fans lifecycle notifications out to listeners from a
//! dedicated dispatcher task so a slow listener never blocks the relay.
//!
//! ## Integration Points
//!
//! - **Input**: `accept` from the API surface and from relay source workers
//! - **Output**: a bounded intake channel the relay engine drains for
//!   submission, plus listener callbacks and a broadcast tap for the
//!   `/ws/logs` stream
//! - **Configuration**: builder-style `register_*` calls, frozen by `start()`
//!
//! ## Message Flow
//!
//! 1. Registration phase: chains, validators, fee calculators, handlers,
//!    swap pairs
//! 2. `start()` freezes registration and spawns the dispatcher and the
//!    deadline sweep
//! 3. `accept` validates, records a `Pending` response, and enqueues for
//!    submission; the engine drives every later transition through `update`

pub mod fees;
pub mod listener;
mod manager;
mod sweep;

pub use fees::{FeeCalculator, FeeSchedule, FlatFeeCalculator};
pub use listener::{LifecycleEvent, TransferListener};
pub use manager::{ManagerConfig, StatePatch, TransferManager};

use thiserror::Error;
use types::{ChainId, TransferState, ValidationResult};

/// Errors surfaced by the transfer manager
#[derive(Debug, Error)]
pub enum TransferError {
    /// State machine rejected the transition
    #[error("illegal transition {from} -> {to} for request {request_id}")]
    IllegalTransition {
        request_id: String,
        from: TransferState,
        to: TransferState,
    },

    /// Registration attempted after `start()`
    #[error("manager is already running; registration is frozen")]
    AlreadyRunning,

    /// Lifecycle operation before `start()`
    #[error("manager is not running")]
    NotRunning,

    /// No record for the request id
    #[error("unknown request: {0}")]
    UnknownRequest(String),

    /// Request failed validation at acceptance
    #[error("request {request_id} failed validation: {summary}")]
    ValidationFailed {
        request_id: String,
        summary: String,
        result: ValidationResult,
    },

    /// Destination chain has no registered handler
    #[error("no handler registered for chain {0}")]
    NoHandler(ChainId),

    /// Intake channel closed (engine gone during shutdown)
    #[error("intake channel closed")]
    IntakeClosed,

    /// Invalid configuration passed to a register call
    #[error(transparent)]
    Config(#[from] types::TypeError),
}
