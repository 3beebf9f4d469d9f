//! Per-chain fee calculation
//!
//! Fees are `base + bridge_pct × amount`, expressed in the source token's
//! base units. All arithmetic is checked: an estimate that would overflow
//! the amount representation is reported as unavailable, never wrapped.

use std::collections::HashMap;

use types::{ChainId, TokenRef, U256};

/// Computes bridge fees for one source chain
pub trait FeeCalculator: Send + Sync {
    /// Chain this calculator serves
    fn chain_id(&self) -> ChainId;

    /// Fee in source-token base units; `None` when no schedule applies or
    /// the arithmetic would overflow
    fn estimate(&self, token: &TokenRef, amount: U256) -> Option<U256>;
}

/// `base + bps` schedule for one token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Flat component in base units
    pub base: U256,
    /// Percentage component in basis points (30 = 0.3%)
    pub bridge_bps: u32,
}

impl FeeSchedule {
    pub fn new(base: U256, bridge_bps: u32) -> Self {
        Self { base, bridge_bps }
    }

    fn apply(&self, amount: U256) -> Option<U256> {
        let pct = amount
            .checked_mul(U256::from(self.bridge_bps))?
            .checked_div(U256::from(10_000u64))?;
        self.base.checked_add(pct)
    }
}

/// Table-driven calculator: per-token schedules with an optional default
#[derive(Debug, Clone)]
pub struct FlatFeeCalculator {
    chain_id: ChainId,
    per_token: HashMap<String, FeeSchedule>,
    default: Option<FeeSchedule>,
}

impl FlatFeeCalculator {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            per_token: HashMap::new(),
            default: None,
        }
    }

    /// Schedule for one token symbol
    pub fn with_schedule(mut self, symbol: &str, schedule: FeeSchedule) -> Self {
        self.per_token.insert(symbol.to_string(), schedule);
        self
    }

    /// Fallback schedule for tokens without their own entry
    pub fn with_default(mut self, schedule: FeeSchedule) -> Self {
        self.default = Some(schedule);
        self
    }
}

impl FeeCalculator for FlatFeeCalculator {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn estimate(&self, token: &TokenRef, amount: U256) -> Option<U256> {
        self.per_token
            .get(&token.symbol)
            .or(self.default.as_ref())
            .and_then(|schedule| schedule.apply(amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth() -> TokenRef {
        TokenRef::native("ETH", "Ether", 18, ChainId::Ethereum)
    }

    #[test]
    fn fee_is_base_plus_percentage() {
        let calc = FlatFeeCalculator::new(ChainId::Ethereum)
            .with_schedule("ETH", FeeSchedule::new(U256::from(500u64), 30));

        // 0.3% of 1_000_000 = 3_000, plus base 500
        let fee = calc.estimate(&eth(), U256::from(1_000_000u64)).unwrap();
        assert_eq!(fee, U256::from(3_500u64));
    }

    #[test]
    fn unknown_token_falls_back_to_default() {
        let calc = FlatFeeCalculator::new(ChainId::Ethereum)
            .with_default(FeeSchedule::new(U256::zero(), 10));
        let fee = calc.estimate(&eth(), U256::from(20_000u64)).unwrap();
        assert_eq!(fee, U256::from(20u64));
    }

    #[test]
    fn no_schedule_means_unavailable() {
        let calc = FlatFeeCalculator::new(ChainId::Ethereum);
        assert_eq!(calc.estimate(&eth(), U256::from(100u64)), None);
    }

    #[test]
    fn overflow_is_unavailable_not_wrapped() {
        let calc = FlatFeeCalculator::new(ChainId::Ethereum)
            .with_schedule("ETH", FeeSchedule::new(U256::zero(), 10_000));
        assert!(calc.estimate(&eth(), U256::MAX).is_none());
    }

    #[test]
    fn zero_bps_charges_base_only() {
        let calc = FlatFeeCalculator::new(ChainId::Ethereum)
            .with_schedule("ETH", FeeSchedule::new(U256::from(42u64), 0));
        assert_eq!(
            calc.estimate(&eth(), U256::from(1_000_000u64)).unwrap(),
            U256::from(42u64)
        );
    }
}
