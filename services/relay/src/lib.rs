//! # Spanbridge Relay Engine
//!
//! ## Purpose
//!
//! The dispatch loop between source chains and destination chains. One
//! worker per source chain pulls raw events, normalizes them, applies replay
//! protection, routes them, and hands accepted requests to the transfer
//! manager. A submission pump drives destination submissions with retry,
//! and one confirmation watcher per destination polls outstanding
//! transactions to completion.
//!
//! ## Message Flow
//!
//! ```text
//! source adapter → normalizer → replay check → route → manager.accept
//!                                                        │ (bounded intake)
//!                              submission pump ←─────────┘
//!                                    │ submit
//!                          confirmation watcher → manager.update → listeners
//! ```
//!
//! ## Error Handling
//!
//! - Normalization failures are dropped with a log line and a counter;
//!   they never reach the API surface.
//! - `Duplicate` is a counter, not an error.
//! - `StorageUnavailable` is retried with capped exponential backoff; past a
//!   threshold the worker is reported unhealthy but keeps retrying.
//! - `StoreCorrupt` is fatal: the engine surfaces it for the process to exit
//!   with a distinct code.
//! - Adapter errors are retried while transient; permanent failures
//!   transition the transfer to `Failed` and trigger a rollback attempt.

mod engine;
mod stats;
mod watcher;
mod worker;

pub use engine::{EngineConfig, RelayEngine};
pub use stats::{HealthRegistry, RelayStats, StatsSnapshot, WorkerHealth};

use thiserror::Error;

/// Engine-level failures
#[derive(Debug, Error)]
pub enum RelayError {
    /// Replay store corruption; fatal for the process
    #[error(transparent)]
    Store(#[from] replay_store::ReplayStoreError),

    /// Engine started twice or intake already taken
    #[error("relay engine already started")]
    AlreadyStarted,

    /// Manager was not started before the engine
    #[error(transparent)]
    Transfer(#[from] transfer_manager::TransferError),
}
