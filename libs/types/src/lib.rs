//! # Spanbridge Shared Types
//!
//! Unified type system for the bridge core: chain identities, token
//! references, transfer events and their canonical fingerprint encoding,
//! request/response lifecycle records, and per-chain address validation.
//!
//! Every service crate consumes these types; the wire schema (JSON field
//! names) and the canonical fingerprint encoding defined here are protocol
//! surface, and changing either is a breaking protocol change.

pub mod address;
pub mod amount;
pub mod chain;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod pair;
pub mod token;
pub mod transfer;

// Re-export commonly used types
pub use address::{
    AddressValidator, EvmAddressValidator, InternalAddressValidator, SvmAddressValidator,
};
pub use chain::{ChainConfig, ChainId};
pub use error::TypeError;
pub use event::TransferEvent;
pub use fingerprint::Fingerprint;
pub use pair::SwapPair;
pub use token::{TokenRef, TokenStandard};
pub use transfer::{
    TransferRequest, TransferResponse, TransferState, ValidationCode, ValidationIssue,
    ValidationResult,
};

pub use primitive_types::U256;
