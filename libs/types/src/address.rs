//! Per-chain address canonicalization
//!
//! Two logically equal addresses must canonicalize to byte-identical strings;
//! the canonical form is what feeds the fingerprint encoding, so validators
//! here are protocol surface.

use sha3::{Digest, Keccak256};

use crate::chain::ChainId;
use crate::error::TypeError;

/// Canonicalizes and validates addresses for one chain
pub trait AddressValidator: Send + Sync {
    /// Chain this validator serves
    fn chain_id(&self) -> ChainId;

    /// Produce the canonical string form, or reject
    fn canonicalize(&self, address: &str) -> Result<String, TypeError>;

    /// Validity check without the canonical form
    fn is_valid(&self, address: &str) -> bool {
        self.canonicalize(address).is_ok()
    }
}

/// EVM-style addresses: `0x` + 40 hex chars, canonicalized to the
/// keccak-checksummed mixed-case form
#[derive(Debug, Clone, Copy, Default)]
pub struct EvmAddressValidator;

impl EvmAddressValidator {
    fn checksum(hex_lower: &str) -> String {
        let digest = Keccak256::digest(hex_lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in hex_lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl AddressValidator for EvmAddressValidator {
    fn chain_id(&self) -> ChainId {
        ChainId::Ethereum
    }

    fn canonicalize(&self, address: &str) -> Result<String, TypeError> {
        let hex_part = address.strip_prefix("0x").ok_or_else(|| TypeError::InvalidAddress {
            chain: ChainId::Ethereum,
            reason: "missing 0x prefix".to_string(),
        })?;
        if hex_part.len() != 40 {
            return Err(TypeError::InvalidAddress {
                chain: ChainId::Ethereum,
                reason: format!("expected 40 hex chars, got {}", hex_part.len()),
            });
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidAddress {
                chain: ChainId::Ethereum,
                reason: "non-hex character".to_string(),
            });
        }
        Ok(Self::checksum(&hex_part.to_ascii_lowercase()))
    }
}

/// SVM-style addresses: base58, 32-44 chars, case-significant, passed
/// through verbatim
#[derive(Debug, Clone, Copy, Default)]
pub struct SvmAddressValidator;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

impl AddressValidator for SvmAddressValidator {
    fn chain_id(&self) -> ChainId {
        ChainId::Solana
    }

    fn canonicalize(&self, address: &str) -> Result<String, TypeError> {
        if !(32..=44).contains(&address.len()) {
            return Err(TypeError::InvalidAddress {
                chain: ChainId::Solana,
                reason: format!("expected 32-44 base58 chars, got {}", address.len()),
            });
        }
        if let Some(bad) = address.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
            return Err(TypeError::InvalidAddress {
                chain: ChainId::Solana,
                reason: format!("invalid base58 character {bad:?}"),
            });
        }
        // Base58 is case-significant; the canonical form is the input itself.
        Ok(address.to_string())
    }
}

/// Host-chain addresses: `bh1` prefix + lowercase hex payload
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalAddressValidator;

impl AddressValidator for InternalAddressValidator {
    fn chain_id(&self) -> ChainId {
        ChainId::Internal
    }

    fn canonicalize(&self, address: &str) -> Result<String, TypeError> {
        let payload = address.strip_prefix("bh1").ok_or_else(|| TypeError::InvalidAddress {
            chain: ChainId::Internal,
            reason: "missing bh1 prefix".to_string(),
        })?;
        if payload.len() < 6 {
            return Err(TypeError::InvalidAddress {
                chain: ChainId::Internal,
                reason: "payload too short".to_string(),
            });
        }
        if !payload.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidAddress {
                chain: ChainId::Internal,
                reason: "non-hex payload character".to_string(),
            });
        }
        Ok(format!("bh1{}", payload.to_ascii_lowercase()))
    }
}

/// The validator for a chain in the closed set
pub fn validator_for(chain: ChainId) -> Box<dyn AddressValidator> {
    match chain {
        ChainId::Ethereum => Box::new(EvmAddressValidator),
        ChainId::Solana => Box::new(SvmAddressValidator),
        ChainId::Internal => Box::new(InternalAddressValidator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Checksum vectors from the EIP-55 reference set
    #[test]
    fn evm_checksum_reference_vectors() {
        let validator = EvmAddressValidator;
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let lower = expected.to_ascii_lowercase();
            assert_eq!(validator.canonicalize(&lower).unwrap(), expected);
            // Canonicalization is idempotent
            assert_eq!(validator.canonicalize(expected).unwrap(), expected);
        }
    }

    #[test]
    fn evm_rejects_malformed() {
        let validator = EvmAddressValidator;
        assert!(validator.canonicalize("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_err());
        assert!(validator.canonicalize("0x5aaeb6").is_err());
        assert!(validator
            .canonicalize("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaeg")
            .is_err());
    }

    #[test]
    fn equal_addresses_canonicalize_identically() {
        let validator = EvmAddressValidator;
        let a = validator
            .canonicalize("0x742D35CC6634C0532925A3B844BC454E4438F44E")
            .unwrap();
        let b = validator
            .canonicalize("0x742d35cc6634c0532925a3b844bc454e4438f44e")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn svm_validates_charset_and_length() {
        let validator = SvmAddressValidator;
        let ok = "4Nd1mYvEqPLjjrMUY8GmuAqcMBzxRLSD7VrQb1MGpsnk";
        assert_eq!(validator.canonicalize(ok).unwrap(), ok);
        // '0', 'O', 'I', 'l' are not base58
        assert!(validator
            .canonicalize("0Nd1mYvEqPLjjrMUY8GmuAqcMBzxRLSD7VrQb1MGpsnk")
            .is_err());
        assert!(validator.canonicalize("tooshort").is_err());
    }

    #[test]
    fn internal_lowercases_payload() {
        let validator = InternalAddressValidator;
        assert_eq!(
            validator.canonicalize("bh1DEADBEEF01").unwrap(),
            "bh1deadbeef01"
        );
        assert!(validator.canonicalize("xy1deadbeef").is_err());
        assert!(validator.canonicalize("bh1zz").is_err());
    }
}
