//! Canonical event fingerprinting
//!
//! Every observed [`TransferEvent`](crate::event::TransferEvent) is identified
//! by a 32-byte Keccak-256 digest over a fixed canonical serialisation. The
//! replay store keys on this digest, so the encoding below is protocol
//! surface: any change to a tag value, a field width, or the field set is a
//! breaking protocol change.
//!
//! ## Canonical serialisation
//!
//! Fields are concatenated in tag order. Each field is a big-endian `u32` tag
//! followed by its payload:
//!
//! - strings: big-endian `u32` byte length, then UTF-8 bytes
//! - fixed-width integers: big-endian, 4 bytes (`u32`) or 8 bytes (`u64`/`i64`)
//! - amounts: big-endian `u32` byte length, then the minimum big-endian
//!   encoding of the integer (no leading zero bytes)
//! - timestamps: signed 64-bit epoch milliseconds (none participate today;
//!   the observation timestamp is metadata, not event identity)
//!
//! The digest covers the event identity: chain tag, transaction id, log
//! index, sender, recipient, token identity, amount, and block height.
//! `observed_at_ms` is deliberately excluded: re-observing the same
//! canonical event (a re-org replaying a transaction) must produce the same
//! fingerprint or replay protection is meaningless.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::amount;
use crate::event::TransferEvent;

// Field tags. Append-only: tags are never renumbered or reused.
const TAG_CHAIN: u32 = 1;
const TAG_TX_ID: u32 = 2;
const TAG_LOG_INDEX: u32 = 3;
const TAG_FROM: u32 = 4;
const TAG_TO: u32 = 5;
const TAG_TOKEN_SYMBOL: u32 = 6;
const TAG_TOKEN_STANDARD: u32 = 7;
const TAG_TOKEN_CONTRACT: u32 = 8;
const TAG_TOKEN_DECIMALS: u32 = 9;
const TAG_TOKEN_CHAIN: u32 = 10;
const TAG_AMOUNT: u32 = 11;
const TAG_BLOCK_HEIGHT: u32 = 12;

/// 256-bit digest identifying one canonical transfer event
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub const LEN: usize = 32;

    /// Compute the fingerprint of an event's canonical serialisation
    pub fn of(event: &TransferEvent) -> Self {
        let encoded = canonical_encoding(event);
        let digest = Keccak256::digest(&encoded);
        Fingerprint(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

impl FromStr for Fingerprint {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Fingerprint(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Produce the canonical byte serialisation of an event's identity fields
pub fn canonical_encoding(event: &TransferEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);

    put_str(&mut buf, TAG_CHAIN, event.chain_id.as_str());
    put_str(&mut buf, TAG_TX_ID, &event.tx_id);
    put_u32(&mut buf, TAG_LOG_INDEX, event.log_index);
    put_str(&mut buf, TAG_FROM, &event.from);
    put_str(&mut buf, TAG_TO, &event.to);

    put_str(&mut buf, TAG_TOKEN_SYMBOL, &event.token.symbol);
    put_str(&mut buf, TAG_TOKEN_STANDARD, standard_tag(event));
    // Absent contract encodes as a zero-length string, which is distinct from
    // any present contract because the tag is always written.
    put_str(
        &mut buf,
        TAG_TOKEN_CONTRACT,
        event.token.contract_address.as_deref().unwrap_or(""),
    );
    put_u32(&mut buf, TAG_TOKEN_DECIMALS, event.token.decimals as u32);
    put_str(&mut buf, TAG_TOKEN_CHAIN, event.token.chain_id.as_str());

    put_tag(&mut buf, TAG_AMOUNT);
    let amount_bytes = amount::to_minimal_be_bytes(&event.amount);
    buf.extend_from_slice(&(amount_bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(&amount_bytes);

    put_u64(&mut buf, TAG_BLOCK_HEIGHT, event.block_height);

    buf
}

fn standard_tag(event: &TransferEvent) -> &'static str {
    use crate::token::TokenStandard::*;
    match event.token.standard {
        Native => "native",
        Erc20 => "erc20",
        Spl => "spl",
        Internal => "internal",
    }
}

fn put_tag(buf: &mut Vec<u8>, tag: u32) {
    buf.extend_from_slice(&tag.to_be_bytes());
}

fn put_str(buf: &mut Vec<u8>, tag: u32, value: &str) {
    put_tag(buf, tag);
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn put_u32(buf: &mut Vec<u8>, tag: u32, value: u32) {
    put_tag(buf, tag);
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_u64(buf: &mut Vec<u8>, tag: u32, value: u64) {
    put_tag(buf, tag);
    buf.extend_from_slice(&value.to_be_bytes());
}
