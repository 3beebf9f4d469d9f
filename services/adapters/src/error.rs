//! Error types for adapter operations

use thiserror::Error;
use types::ChainId;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Main error type for adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Call exceeded the per-adapter timeout
    #[error("adapter call timed out after {timeout_ms}ms on {chain}")]
    Timeout {
        /// Chain whose adapter timed out
        chain: ChainId,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Transport-level failure (connect, send, receive)
    #[error("connection failed for {chain}: {reason}")]
    ConnectionFailed {
        chain: ChainId,
        reason: String,
    },

    /// The chain rejected or lost the submission
    #[error("submission failed on {chain}: {reason}")]
    SubmitFailed {
        chain: ChainId,
        reason: String,
    },

    /// A request id was submitted twice with no recoverable receipt
    #[error("request {request_id} already submitted as {tx_id}")]
    AlreadySubmitted {
        request_id: String,
        tx_id: String,
    },

    /// Status queried for a transaction the adapter does not know
    #[error("transaction {tx_id} not found on {chain}")]
    UnknownTransaction {
        chain: ChainId,
        tx_id: String,
    },

    /// Adapter refuses to reverse the transfer
    #[error("rollback refused on {chain}: transfer is irreversible")]
    Irreversible {
        chain: ChainId,
    },

    /// Chain data could not be parsed
    #[error("parse error from {chain}: {reason}")]
    Parse {
        chain: ChainId,
        reason: String,
    },

    /// Operation is outside this adapter's capability set
    #[error("operation not supported by {chain} adapter: {reason}")]
    NotSupported {
        chain: ChainId,
        reason: String,
    },
}

impl AdapterError {
    /// Whether retrying with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Timeout { .. } | AdapterError::ConnectionFailed { .. }
        )
    }

    /// Whether the failure is final for the transfer
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            AdapterError::SubmitFailed { .. }
                | AdapterError::Irreversible { .. }
                | AdapterError::NotSupported { .. }
        )
    }
}
