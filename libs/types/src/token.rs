//! Token references and standards

use serde::{Deserialize, Serialize};

use crate::chain::ChainId;

/// Which standard a bridged token follows on its home chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    /// The chain's gas token
    Native,
    /// EVM fungible token
    Erc20,
    /// SVM fungible token
    Spl,
    /// Host-chain ledger entry
    Internal,
}

/// Reference to one token on one chain
///
/// `(chain_id, contract_address)` is the uniqueness key for contract-bearing
/// tokens; native and internal tokens are keyed by `(chain_id, symbol)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRef {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub standard: TokenStandard,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub chain_id: ChainId,
    pub is_native: bool,
}

impl TokenRef {
    /// A chain's gas token
    pub fn native(symbol: &str, name: &str, decimals: u8, chain_id: ChainId) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            standard: TokenStandard::Native,
            contract_address: None,
            chain_id,
            is_native: true,
        }
    }

    /// An EVM fungible token
    pub fn erc20(symbol: &str, name: &str, decimals: u8, contract: &str, chain_id: ChainId) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            standard: TokenStandard::Erc20,
            contract_address: Some(contract.to_string()),
            chain_id,
            is_native: false,
        }
    }

    /// An SVM fungible token (mint address as contract)
    pub fn spl(symbol: &str, name: &str, decimals: u8, mint: &str, chain_id: ChainId) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            standard: TokenStandard::Spl,
            contract_address: Some(mint.to_string()),
            chain_id,
            is_native: false,
        }
    }

    /// A host-chain ledger token
    pub fn internal(symbol: &str, name: &str, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            standard: TokenStandard::Internal,
            contract_address: None,
            chain_id: ChainId::Internal,
            is_native: false,
        }
    }

    /// Whether two references denote the same asset
    ///
    /// Contract-bearing tokens compare by `(chain, contract)` ignoring hex
    /// case; the rest compare by `(chain, symbol)`.
    pub fn same_asset(&self, other: &TokenRef) -> bool {
        if self.chain_id != other.chain_id {
            return false;
        }
        match (&self.contract_address, &other.contract_address) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => self.symbol == other.symbol,
            _ => false,
        }
    }
}
