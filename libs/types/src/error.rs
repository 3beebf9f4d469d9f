//! Error types shared across the type system

use thiserror::Error;

/// Errors raised while constructing or validating domain types
#[derive(Debug, Clone, Error)]
pub enum TypeError {
    /// Chain tag is not in the closed set recognised at build time
    #[error("unknown chain tag: {0}")]
    UnknownChain(String),

    /// Address failed per-chain canonicalization
    #[error("invalid {chain} address: {reason}")]
    InvalidAddress {
        /// Chain whose validator rejected the address
        chain: crate::chain::ChainId,
        /// What the validator objected to
        reason: String,
    },

    /// Chain configuration violates an invariant
    #[error("invalid chain config: {0}")]
    InvalidConfig(String),

    /// Swap pair violates an invariant
    #[error("invalid swap pair: {0}")]
    InvalidPair(String),

    /// Amount string could not be parsed as base units
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Transfer state tag is not recognised
    #[error("unknown transfer state: {0}")]
    UnknownState(String),
}
