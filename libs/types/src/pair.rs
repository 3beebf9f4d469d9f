//! Operator-managed swap pairs

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::amount;
use crate::error::TypeError;
use crate::token::TokenRef;

/// One routable bridging pair
///
/// Relay routing matches a source event's token against `from_token` of the
/// active pairs; the matched pair's `to_token` chain is the destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPair {
    pub from_token: TokenRef,
    pub to_token: TokenRef,
    /// Destination units per source unit
    pub exchange_rate: f64,
    #[serde(with = "amount::serde_u256")]
    pub min_amount: U256,
    #[serde(with = "amount::serde_u256")]
    pub max_amount: U256,
    /// Bridge fee as a fraction of the amount (e.g. 0.003 = 30 bps)
    pub fee_percent: f64,
    pub active: bool,
}

impl SwapPair {
    /// Check the pair invariants
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.from_token.same_asset(&self.to_token) {
            return Err(TypeError::InvalidPair(format!(
                "{} -> {}: from and to are the same asset",
                self.from_token.symbol, self.to_token.symbol
            )));
        }
        if !(self.exchange_rate > 0.0) {
            return Err(TypeError::InvalidPair(format!(
                "{} -> {}: exchange rate must be positive",
                self.from_token.symbol, self.to_token.symbol
            )));
        }
        if self.min_amount > self.max_amount {
            return Err(TypeError::InvalidPair(format!(
                "{} -> {}: min amount exceeds max",
                self.from_token.symbol, self.to_token.symbol
            )));
        }
        if !(0.0..1.0).contains(&self.fee_percent) {
            return Err(TypeError::InvalidPair(format!(
                "{} -> {}: fee percent out of range",
                self.from_token.symbol, self.to_token.symbol
            )));
        }
        Ok(())
    }

    /// Whether this pair routes transfers of `token`
    pub fn matches_source(&self, token: &TokenRef) -> bool {
        self.active && self.from_token.same_asset(token)
    }

    /// Whether an amount is within the pair's bounds
    pub fn amount_in_bounds(&self, amount: U256) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}
