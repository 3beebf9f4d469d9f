//! # Replay Protection Store
//!
//! Durable index of event fingerprints that have already been processed.
//! Answers exactly one question, "have we seen this fingerprint?", with an
//! atomic check-and-record, backed by an append-only log so the answer
//! survives a process kill.
//!
//! ## On-disk layout
//!
//! A single log file. 16-byte header: magic `BRFP`, schema version (u32 BE),
//! reserved word, crc32 of the first 12 bytes. Then length-prefixed records,
//! each `len (u32 BE) ‖ payload ‖ crc32(payload) (u32 BE)`. Payload:
//! fingerprint (32 raw bytes), observed-at epoch-ms (i64 BE), chain tag
//! (length-prefixed UTF-8), source tx id (length-prefixed UTF-8), block
//! height (u64 BE).
//!
//! A record is fsynced before [`ReplayOutcome::Fresh`] is returned, so a
//! crash between recording and downstream submission still yields
//! `Duplicate` after restart. A torn trailing record (crash mid-append,
//! before `Fresh` was ever returned) is truncated on open; a checksum
//! mismatch on a complete record or a header/schema mismatch is corruption
//! and fatal for the process.

mod store;

pub use store::{ReplayOutcome, ReplayRecord, ReplayStats, ReplayStore, ReplayStoreError};
