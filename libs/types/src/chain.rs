//! Chain identity and per-chain configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::token::TokenRef;

/// Identity tag for a supported chain
///
/// The closed set is fixed at build time; the string tag returned by
/// [`ChainId::as_str`] is the exact byte sequence used in the replay store
/// and in the canonical fingerprint encoding, so renaming a variant is a
/// breaking protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    /// EVM-style source/destination chain
    Ethereum,
    /// SVM-style source/destination chain
    Solana,
    /// The host chain this bridge is embedded in
    Internal,
}

impl ChainId {
    /// Canonical tag bytes for this chain
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Solana => "solana",
            ChainId::Internal => "internal",
        }
    }

    /// All chains in the closed set
    pub fn all() -> [ChainId; 3] {
        [ChainId::Ethereum, ChainId::Solana, ChainId::Internal]
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(ChainId::Ethereum),
            "solana" => Ok(ChainId::Solana),
            "internal" => Ok(ChainId::Internal),
            other => Err(TypeError::UnknownChain(other.to_string())),
        }
    }
}

/// Static configuration for one registered chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Which chain this config describes
    pub chain_id: ChainId,
    /// Confirmations after which a transaction is considered final
    pub required_confirmations: u32,
    /// Average block time in seconds
    pub block_time_secs: u64,
    /// Tokens the bridge accepts from / delivers to this chain
    pub supported_tokens: Vec<TokenRef>,
    /// The chain's gas/native token
    pub native_token: TokenRef,
    /// Whether this is a test network
    pub is_testnet: bool,
}

impl ChainConfig {
    /// Check the configuration invariants
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.required_confirmations < 1 {
            return Err(TypeError::InvalidConfig(format!(
                "{}: required_confirmations must be >= 1",
                self.chain_id
            )));
        }
        if self.block_time_secs == 0 {
            return Err(TypeError::InvalidConfig(format!(
                "{}: block_time_secs must be > 0",
                self.chain_id
            )));
        }
        for token in &self.supported_tokens {
            if token.chain_id != self.chain_id {
                return Err(TypeError::InvalidConfig(format!(
                    "{}: supported token {} belongs to {}",
                    self.chain_id, token.symbol, token.chain_id
                )));
            }
        }
        Ok(())
    }

    /// Worst-case time to finality on this chain
    pub fn finality_window(&self) -> Duration {
        Duration::from_secs(self.block_time_secs * self.required_confirmations as u64)
    }

    /// Estimated transfer duration when this chain is the destination
    pub fn estimated_duration_secs(&self) -> u64 {
        self.block_time_secs * self.required_confirmations as u64
    }

    /// Resolve a raw event's token against the supported set
    ///
    /// Contract-bearing tokens match on contract address (case-insensitive);
    /// native and internal tokens match on symbol.
    pub fn resolve_token(
        &self,
        symbol: Option<&str>,
        contract_address: Option<&str>,
    ) -> Option<&TokenRef> {
        if let Some(contract) = contract_address {
            if let Some(token) = self.supported_tokens.iter().find(|t| {
                t.contract_address
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(contract))
            }) {
                return Some(token);
            }
        }
        if let Some(symbol) = symbol {
            return self
                .supported_tokens
                .iter()
                .find(|t| t.contract_address.is_none() && t.symbol == symbol);
        }
        None
    }

    /// Whether a token is in the supported set
    pub fn supports_token(&self, token: &TokenRef) -> bool {
        self.supported_tokens.iter().any(|t| t.same_asset(token))
    }
}
