//! Normalized transfer events

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::amount;
use crate::chain::ChainId;
use crate::fingerprint::Fingerprint;
use crate::token::TokenRef;

/// A token transfer observed on a source chain, in canonical form
///
/// Produced by the event normalizer; `(chain_id, tx_id, log_index)` is
/// globally unique and `amount` is always positive. Consumed at most once;
/// the replay store enforces that downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Chain the event was observed on
    pub chain_id: ChainId,
    /// Source transaction id, in the chain's canonical text form
    pub tx_id: String,
    /// Position of the event within the transaction
    pub log_index: u32,
    /// Sender, canonicalized per-chain
    pub from: String,
    /// Recipient on the destination chain, canonicalized per-chain
    pub to: String,
    /// The transferred token, resolved against the chain config
    pub token: TokenRef,
    /// Amount in base units
    #[serde(with = "amount::serde_u256")]
    pub amount: U256,
    /// Block the transaction landed in
    pub block_height: u64,
    /// When the normalizer saw the event (epoch milliseconds)
    pub observed_at_ms: i64,
}

impl TransferEvent {
    /// Canonical digest of this event's identity fields
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}
