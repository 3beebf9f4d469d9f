//! Base-unit amount handling
//!
//! Amounts travel as integer base units (`U256`) internally and as decimal
//! strings on the wire, so an 18-decimal amount never loses precision to
//! floating point.

use primitive_types::U256;

use crate::error::TypeError;

/// Parse a wire decimal string into base units
pub fn parse(s: &str) -> Result<U256, TypeError> {
    if s.is_empty() {
        return Err(TypeError::InvalidAmount("empty amount string".to_string()));
    }
    U256::from_dec_str(s).map_err(|e| TypeError::InvalidAmount(format!("{s:?}: {e}")))
}

/// Minimal big-endian byte encoding of an amount
///
/// Leading zero bytes are stripped; zero encodes as the empty string. This is
/// the amount encoding used by the canonical fingerprint serialisation.
pub fn to_minimal_be_bytes(value: &U256) -> Vec<u8> {
    let mut bytes = [0u8; 32];
    for (i, limb) in value.0.iter().rev().enumerate() {
        bytes[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_be_bytes());
    }
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(32);
    bytes[first..].to_vec()
}

/// Serde adapter: `U256` as a decimal string
pub mod serde_u256 {
    use primitive_types::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<U256>` as an optional decimal string
pub mod serde_u256_opt {
    use primitive_types::U256;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => U256::from_dec_str(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
