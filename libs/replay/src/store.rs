//! Append-only fingerprint store implementation

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use types::{ChainId, Fingerprint};

const MAGIC: &[u8; 4] = b"BRFP";
const SCHEMA_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

// Hard sanity bound on a single record; a length prefix beyond this is
// treated as corruption rather than an allocation request.
const MAX_RECORD_LEN: u32 = 4096;

/// Result of an atomic check-and-record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Fingerprint was not present and has been durably recorded
    Fresh,
    /// Fingerprint was already recorded
    Duplicate,
}

/// What the store remembers about one fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    pub fingerprint: Fingerprint,
    pub observed_at_ms: i64,
    pub chain_id: ChainId,
    pub source_tx_id: String,
    pub block_height: u64,
}

/// Store-level counters for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub count: usize,
    pub oldest_observed_at_ms: Option<i64>,
}

/// Errors surfaced by the store
#[derive(Debug, Error)]
pub enum ReplayStoreError {
    /// Backing file cannot be written right now; retryable
    #[error("replay store unavailable: {0}")]
    StorageUnavailable(String),

    /// Persisted state fails integrity checks; fatal for the process
    #[error("replay store corrupt: {0}")]
    StoreCorrupt(String),
}

impl ReplayStoreError {
    /// Corruption is never retryable
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplayStoreError::StoreCorrupt(_))
    }
}

/// Durable fingerprint index with linearizable check-and-record
#[derive(Debug)]
pub struct ReplayStore {
    index: DashMap<Fingerprint, ReplayRecord>,
    log: Mutex<File>,
    path: PathBuf,
}

impl ReplayStore {
    /// Open (or create) the store at `path`
    ///
    /// Loads the entire log into the in-memory index. Returns
    /// [`ReplayStoreError::StoreCorrupt`] on a bad header, schema mismatch,
    /// or checksum failure; a torn trailing record is truncated and logged.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReplayStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
        }

        let exists = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;

        let index = DashMap::new();
        if exists && file_len(&file)? > 0 {
            let valid_len = load_log(&mut file, &index)?;
            let actual_len = file_len(&file)?;
            if valid_len < actual_len {
                warn!(
                    "truncating torn tail of replay log: {} -> {} bytes",
                    actual_len, valid_len
                );
                file.set_len(valid_len)
                    .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
            }
            info!("replay store loaded: {} fingerprints from {:?}", index.len(), path);
        } else {
            write_header(&mut file)?;
            info!("replay store initialized at {:?}", path);
        }

        file.seek(SeekFrom::End(0))
            .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;

        Ok(Self {
            index,
            log: Mutex::new(file),
            path,
        })
    }

    /// Atomically record a fingerprint if it is new
    ///
    /// Linearizable per fingerprint: concurrent callers racing on the same
    /// digest observe exactly one `Fresh`. The record hits disk (fsync)
    /// before `Fresh` is returned; an I/O failure surfaces as
    /// `StorageUnavailable` and leaves the fingerprint unrecorded.
    pub fn record_if_new(&self, record: ReplayRecord) -> Result<ReplayOutcome, ReplayStoreError> {
        // Lock order is log, then index shard; prune takes them in the same
        // order, so check-append-insert is one atomic step to every caller.
        let mut log = self.log.lock();
        match self.index.entry(record.fingerprint) {
            Entry::Occupied(_) => Ok(ReplayOutcome::Duplicate),
            Entry::Vacant(slot) => {
                append_record(&mut log, &record)
                    .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
                debug!("recorded fingerprint {}", record.fingerprint);
                slot.insert(record);
                Ok(ReplayOutcome::Fresh)
            }
        }
    }

    /// Read-only lookup
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<ReplayRecord> {
        self.index.get(fingerprint).map(|r| r.value().clone())
    }

    /// Drop records observed before `older_than_ms`
    ///
    /// Rewrites the log through a temporary file and atomically renames it
    /// into place, so a crash mid-prune leaves the previous log intact.
    pub fn prune(&self, older_than_ms: i64) -> Result<usize, ReplayStoreError> {
        let mut log = self.log.lock();

        let retained: Vec<ReplayRecord> = self
            .index
            .iter()
            .filter(|r| r.observed_at_ms >= older_than_ms)
            .map(|r| r.value().clone())
            .collect();
        let removed = self.index.len() - retained.len();
        if removed == 0 {
            return Ok(0);
        }

        let tmp_path = self.path.with_extension("log.tmp");
        let mut tmp = File::create(&tmp_path)
            .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
        write_header(&mut tmp)?;
        for record in &retained {
            append_record(&mut tmp, record)
                .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;

        *log = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
        log.seek(SeekFrom::End(0))
            .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;

        self.index.retain(|_, r| r.observed_at_ms >= older_than_ms);
        info!(
            "replay store pruned {} records, {} retained",
            removed,
            self.index.len()
        );
        Ok(removed)
    }

    /// Count and oldest observation timestamp
    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            count: self.index.len(),
            oldest_observed_at_ms: self.index.iter().map(|r| r.observed_at_ms).min(),
        }
    }

    /// Path of the backing log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn file_len(file: &File) -> Result<u64, ReplayStoreError> {
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))
}

fn write_header(file: &mut File) -> Result<(), ReplayStoreError> {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..8].copy_from_slice(&SCHEMA_VERSION.to_be_bytes());
    // bytes 8..12 reserved
    let crc = crc32fast::hash(&header[0..12]);
    header[12..16].copy_from_slice(&crc.to_be_bytes());
    file.write_all(&header)
        .and_then(|_| file.sync_data())
        .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))
}

fn append_record(file: &mut File, record: &ReplayRecord) -> io::Result<()> {
    let payload = encode_payload(record);
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_be_bytes());

    file.write_all(&frame)?;
    file.sync_data()
}

fn encode_payload(record: &ReplayRecord) -> Vec<u8> {
    let tag = record.chain_id.as_str().as_bytes();
    let tx = record.source_tx_id.as_bytes();

    let mut buf = Vec::with_capacity(32 + 8 + 4 + tag.len() + 4 + tx.len() + 8);
    buf.extend_from_slice(record.fingerprint.as_bytes());
    buf.extend_from_slice(&record.observed_at_ms.to_be_bytes());
    buf.extend_from_slice(&(tag.len() as u32).to_be_bytes());
    buf.extend_from_slice(tag);
    buf.extend_from_slice(&(tx.len() as u32).to_be_bytes());
    buf.extend_from_slice(tx);
    buf.extend_from_slice(&record.block_height.to_be_bytes());
    buf
}

fn corrupt(what: &str) -> ReplayStoreError {
    ReplayStoreError::StoreCorrupt(format!("bad record: {what}"))
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8], ReplayStoreError> {
    if cursor.len() < n {
        return Err(corrupt("short payload"));
    }
    let (head, rest) = cursor.split_at(n);
    *cursor = rest;
    Ok(head)
}

fn decode_payload(payload: &[u8]) -> Result<ReplayRecord, ReplayStoreError> {
    let mut cursor = payload;

    let mut fp = [0u8; 32];
    fp.copy_from_slice(take(&mut cursor, 32)?);
    let observed_at_ms = i64::from_be_bytes(take(&mut cursor, 8)?.try_into().unwrap());

    let tag_len = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
    let tag =
        std::str::from_utf8(take(&mut cursor, tag_len)?).map_err(|_| corrupt("chain tag utf8"))?;
    let chain_id: ChainId = tag.parse().map_err(|_| corrupt("unknown chain tag"))?;

    let tx_len = u32::from_be_bytes(take(&mut cursor, 4)?.try_into().unwrap()) as usize;
    let source_tx_id = std::str::from_utf8(take(&mut cursor, tx_len)?)
        .map_err(|_| corrupt("tx id utf8"))?
        .to_string();

    let block_height = u64::from_be_bytes(take(&mut cursor, 8)?.try_into().unwrap());

    if !cursor.is_empty() {
        return Err(corrupt("trailing bytes"));
    }

    Ok(ReplayRecord {
        fingerprint: Fingerprint::from_bytes(fp),
        observed_at_ms,
        chain_id,
        source_tx_id,
        block_height,
    })
}

/// Parse the whole log; returns the byte offset up to which the log is valid
fn load_log(
    file: &mut File,
    index: &DashMap<Fingerprint, ReplayRecord>,
) -> Result<u64, ReplayStoreError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| ReplayStoreError::StorageUnavailable(e.to_string()))?;

    if data.len() < HEADER_LEN {
        return Err(ReplayStoreError::StoreCorrupt(
            "log shorter than header".to_string(),
        ));
    }
    if &data[0..4] != MAGIC {
        return Err(ReplayStoreError::StoreCorrupt("bad magic".to_string()));
    }
    let crc_stored = u32::from_be_bytes(data[12..16].try_into().unwrap());
    if crc32fast::hash(&data[0..12]) != crc_stored {
        return Err(ReplayStoreError::StoreCorrupt("header checksum mismatch".to_string()));
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != SCHEMA_VERSION {
        return Err(ReplayStoreError::StoreCorrupt(format!(
            "schema version mismatch: found {version}, expected {SCHEMA_VERSION}"
        )));
    }

    let mut offset = HEADER_LEN;
    loop {
        if offset == data.len() {
            break; // clean end of log
        }
        if data.len() - offset < 4 {
            // torn length prefix
            break;
        }
        let len = u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap());
        if len > MAX_RECORD_LEN {
            return Err(ReplayStoreError::StoreCorrupt(format!(
                "record length {len} exceeds bound at offset {offset}"
            )));
        }
        let frame_end = offset + 4 + len as usize + 4;
        if frame_end > data.len() {
            // torn record body: the append never completed, so the caller
            // never saw Fresh for it
            break;
        }
        let payload = &data[offset + 4..offset + 4 + len as usize];
        let crc_stored =
            u32::from_be_bytes(data[offset + 4 + len as usize..frame_end].try_into().unwrap());
        if crc32fast::hash(payload) != crc_stored {
            return Err(ReplayStoreError::StoreCorrupt(format!(
                "record checksum mismatch at offset {offset}"
            )));
        }
        let record = decode_payload(payload)?;
        index.insert(record.fingerprint, record);
        offset = frame_end;
    }

    Ok(offset as u64)
}
