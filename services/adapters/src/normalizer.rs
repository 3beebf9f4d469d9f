//! Event normalization
//!
//! Turns adapter-specific [`RawChainEvent`]s into canonical
//! [`TransferEvent`]s. Pure: no I/O, the observation timestamp is injected
//! by the caller. Anything that fails here is dropped by the relay worker;
//! normalization errors never reach the API surface.

use thiserror::Error;

use crate::common::RawChainEvent;
use types::{address, amount, ChainConfig, ChainId, TransferEvent, U256};

/// Why an event could not be normalized
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// Not a bridge transfer; dropped silently
    #[error("event is not a bridge transfer")]
    Unrecognized,

    /// A required field is absent or unusable
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Token is not in the chain's supported set
    #[error("unsupported token: {0}")]
    UnsupportedToken(String),
}

fn missing(field: &str) -> NormalizeError {
    NormalizeError::Malformed(format!("missing {field}"))
}

/// Normalize one raw event against its source chain's configuration
///
/// The returned event satisfies every `TransferEvent` invariant: positive
/// amount, canonical addresses, a token from the supported set.
pub fn normalize(
    event: &RawChainEvent,
    config: &ChainConfig,
    now_ms: i64,
) -> Result<TransferEvent, NormalizeError> {
    if event.kind != RawChainEvent::KIND_TRANSFER {
        return Err(NormalizeError::Unrecognized);
    }

    let tx_id = event.tx_id.clone().ok_or_else(|| missing("tx_id"))?;
    let from_raw = event.from.as_deref().ok_or_else(|| missing("from"))?;
    let to_raw = event.to.as_deref().ok_or_else(|| missing("to"))?;
    let amount_raw = event.amount.as_deref().ok_or_else(|| missing("amount"))?;
    let block_height = event.block_height.ok_or_else(|| missing("block_height"))?;
    let log_index = event.log_index.unwrap_or(0);

    let token = config
        .resolve_token(event.token_symbol.as_deref(), event.contract_address.as_deref())
        .ok_or_else(|| {
            NormalizeError::UnsupportedToken(
                event
                    .contract_address
                    .clone()
                    .or_else(|| event.token_symbol.clone())
                    .unwrap_or_else(|| "<unidentified>".to_string()),
            )
        })?
        .clone();

    let amount: U256 = amount::parse(amount_raw)
        .map_err(|e| NormalizeError::Malformed(format!("amount: {e}")))?;
    if amount.is_zero() {
        return Err(NormalizeError::Malformed("amount must be positive".to_string()));
    }

    let from = address::validator_for(config.chain_id)
        .canonicalize(from_raw)
        .map_err(|e| NormalizeError::Malformed(format!("from address: {e}")))?;

    // The recipient lives on the destination chain, which is unknown until
    // routing; canonicalize with the first validator that accepts the form.
    let to = canonicalize_foreign(to_raw)
        .ok_or_else(|| NormalizeError::Malformed(format!("to address {to_raw:?} matches no chain")))?;

    Ok(TransferEvent {
        chain_id: config.chain_id,
        tx_id,
        log_index,
        from,
        to,
        token,
        amount,
        block_height,
        observed_at_ms: now_ms,
    })
}

/// Canonicalize an address whose chain is not yet known
///
/// Validators are probed in the fixed closed-set order, so the result is
/// deterministic for any input.
fn canonicalize_foreign(raw: &str) -> Option<String> {
    ChainId::all()
        .iter()
        .find_map(|chain| address::validator_for(*chain).canonicalize(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::TokenRef;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn eth_config() -> ChainConfig {
        let native = TokenRef::native("ETH", "Ether", 18, ChainId::Ethereum);
        ChainConfig {
            chain_id: ChainId::Ethereum,
            required_confirmations: 12,
            block_time_secs: 12,
            supported_tokens: vec![
                native.clone(),
                TokenRef::erc20(
                    "USDC",
                    "USD Coin",
                    6,
                    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                    ChainId::Ethereum,
                ),
            ],
            native_token: native,
            is_testnet: false,
        }
    }

    fn burn_event() -> RawChainEvent {
        let mut event = RawChainEvent::of_kind(ChainId::Ethereum, RawChainEvent::KIND_TRANSFER);
        event.tx_id = Some("0xa1".to_string());
        event.log_index = Some(0);
        event.from = Some("0x742d35cc6634c0532925a3b844bc454e4438f44e".to_string());
        event.to = Some("bh1234deadbeef".to_string());
        event.token_symbol = Some("ETH".to_string());
        event.amount = Some("1000000000000000000".to_string());
        event.block_height = Some(100);
        event
    }

    #[test]
    fn happy_path_produces_canonical_event() {
        let event = normalize(&burn_event(), &eth_config(), NOW_MS).unwrap();
        assert_eq!(event.chain_id, ChainId::Ethereum);
        assert_eq!(event.tx_id, "0xa1");
        assert_eq!(event.log_index, 0);
        // sender is checksummed, recipient is internal-canonical
        assert_eq!(event.from, "0x742d35Cc6634C0532925a3b844Bc454e4438f44e");
        assert_eq!(event.to, "bh1234deadbeef");
        assert!(event.token.is_native);
        assert_eq!(event.amount, U256::from(10).pow(U256::from(18)));
        assert_eq!(event.block_height, 100);
        assert_eq!(event.observed_at_ms, NOW_MS);
    }

    #[test]
    fn normalization_is_pure() {
        let a = normalize(&burn_event(), &eth_config(), NOW_MS).unwrap();
        let b = normalize(&burn_event(), &eth_config(), NOW_MS).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn foreign_kinds_are_unrecognized() {
        let event = RawChainEvent::of_kind(ChainId::Ethereum, "approval");
        assert_eq!(
            normalize(&event, &eth_config(), NOW_MS).unwrap_err(),
            NormalizeError::Unrecognized
        );
    }

    #[test]
    fn missing_recipient_is_malformed() {
        let mut event = burn_event();
        event.to = None;
        match normalize(&event, &eth_config(), NOW_MS).unwrap_err() {
            NormalizeError::Malformed(msg) => assert!(msg.contains("to")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_unsupported() {
        let mut event = burn_event();
        event.token_symbol = Some("PEPE".to_string());
        assert!(matches!(
            normalize(&event, &eth_config(), NOW_MS).unwrap_err(),
            NormalizeError::UnsupportedToken(_)
        ));
    }

    #[test]
    fn contract_match_resolves_erc20() {
        let mut event = burn_event();
        event.token_symbol = None;
        event.contract_address = Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string());
        event.amount = Some("2500000000".to_string());
        let normalized = normalize(&event, &eth_config(), NOW_MS).unwrap();
        assert_eq!(normalized.token.symbol, "USDC");
    }

    #[test]
    fn zero_amount_is_malformed() {
        let mut event = burn_event();
        event.amount = Some("0".to_string());
        assert!(matches!(
            normalize(&event, &eth_config(), NOW_MS).unwrap_err(),
            NormalizeError::Malformed(_)
        ));
    }

    #[test]
    fn garbage_sender_is_malformed() {
        let mut event = burn_event();
        event.from = Some("not-an-address".to_string());
        assert!(matches!(
            normalize(&event, &eth_config(), NOW_MS).unwrap_err(),
            NormalizeError::Malformed(_)
        ));
    }
}
