//! # Log Interface
//!
//! The node engine never touches storage directly: it appends and reads
//! records through [`LogManager`] and reports superseded records through the
//! same trait so the log's space-reclamation side can make progress. The
//! engine's half of the contract lives in [`codec`] (the versioned record
//! layout) and [`obsolete`] (the node-logging bridge).
//!
//! ## Record Framing
//!
//! [`MemLog`], the in-memory manager used by the tests, frames each record
//! the way an on-disk log would:
//!
//! ```text
//! ┌───────────────┬──────────────┬───────┬─────┬─────────────┐
//! │ crc64 (8, LE) │ len (4, LE)  │ flags │ pad │ payload ... │
//! └───────────────┴──────────────┴───────┴─────┴─────────────┘
//! ```
//!
//! The CRC covers the payload. Files rotate at a configured size, so LSNs
//! spread across several file numbers and exercise the compact per-slot LSN
//! representation.
//!
//! ## Missing Files
//!
//! A log cleaner may delete a file whose live records have all been migrated
//! forward. A read through a stale LSN then fails with [`LogFileMissing`],
//! which callers must treat as fatal unless the referencing slot is already
//! marked deleted.

pub mod codec;
pub mod obsolete;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{bail, ensure, Report, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::lsn::Lsn;

/// Record was appended outside a committed transaction scope; recovery must
/// not replay it until a covering non-provisional ancestor is seen.
pub const FLAG_PROVISIONAL: u8 = 0x01;

const CRC64: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_ECMA_182);

/// Append-only record store addressed by LSN.
pub trait LogManager: Send + Sync {
    /// Appends a record, returning its LSN.
    fn append(&self, payload: &[u8], provisional: bool) -> Result<Lsn>;

    /// Reads the record payload at `lsn`.
    fn read(&self, lsn: Lsn) -> Result<Vec<u8>>;

    /// Reports a superseded record for space reclamation. `size` is the
    /// payload size when known, zero otherwise.
    fn count_obsolete(&self, lsn: Lsn, size: u32);
}

/// Record-level lock acquisition, owned by the transaction layer above.
pub trait LockManager: Send + Sync {
    fn lock_record(&self, key: &[u8]) -> Result<()>;
    fn release_record(&self, key: &[u8]);

    /// Write-locks a freshly assigned record version for the current
    /// transaction, called after the version is logged.
    fn lock_lsn(&self, lsn: Lsn) -> Result<()>;
}

/// No-op lock manager for single-writer use and tests.
pub struct NullLockManager;

impl LockManager for NullLockManager {
    fn lock_record(&self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn release_record(&self, _key: &[u8]) {}

    fn lock_lsn(&self, _lsn: Lsn) -> Result<()> {
        Ok(())
    }
}

/// Typed read failure for a cleaned (deleted) log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFileMissing {
    pub file: u32,
}

impl fmt::Display for LogFileMissing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log file {} no longer exists", self.file)
    }
}

impl std::error::Error for LogFileMissing {}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct RecordHeader {
    crc: U64<LittleEndian>,
    len: U32<LittleEndian>,
    flags: u8,
    _pad: [u8; 3],
}

const HEADER_LEN: usize = std::mem::size_of::<RecordHeader>();

#[derive(Default)]
struct MemLogState {
    files: HashMap<u32, Vec<u8>>,
    current_file: u32,
    fail_next: bool,
}

/// In-memory [`LogManager`] with real framing, rotation and failure hooks.
pub struct MemLog {
    file_size: usize,
    state: Mutex<MemLogState>,
    obsolete_count: AtomicU64,
    obsolete_bytes: AtomicU64,
}

impl MemLog {
    pub fn new(file_size: usize) -> Self {
        Self {
            file_size,
            state: Mutex::new(MemLogState::default()),
            obsolete_count: AtomicU64::new(0),
            obsolete_bytes: AtomicU64::new(0),
        }
    }

    /// Simulates the log cleaner deleting a file.
    pub fn drop_file(&self, file: u32) {
        self.state.lock().files.remove(&file);
    }

    /// Arms a one-shot append failure (write-error injection).
    pub fn fail_next_append(&self) {
        self.state.lock().fail_next = true;
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// (record count, byte total) reported obsolete so far.
    pub fn obsolete_stats(&self) -> (u64, u64) {
        (
            self.obsolete_count.load(Ordering::Relaxed),
            self.obsolete_bytes.load(Ordering::Relaxed),
        )
    }

    /// Flags byte of the record at `lsn`; used by tests to check the
    /// provisional marker.
    pub fn record_flags(&self, lsn: Lsn) -> Result<u8> {
        let state = self.state.lock();
        let (header, _) = locate(&state, lsn)?;
        Ok(header.flags)
    }

    #[cfg(test)]
    fn corrupt_payload_byte(&self, lsn: Lsn) {
        let mut state = self.state.lock();
        let buf = state.files.get_mut(&lsn.file()).unwrap();
        buf[lsn.offset() as usize + HEADER_LEN] ^= 0xFF;
    }
}

fn locate<'a>(state: &'a MemLogState, lsn: Lsn) -> Result<(&'a RecordHeader, &'a [u8])> {
    ensure!(!lsn.is_null(), "read through a null LSN");
    let Some(buf) = state.files.get(&lsn.file()) else {
        return Err(Report::new(LogFileMissing { file: lsn.file() }));
    };
    let offset = lsn.offset() as usize;
    ensure!(
        offset + HEADER_LEN <= buf.len(),
        "LSN {lsn} points past the end of its file"
    );
    let header = RecordHeader::ref_from_bytes(&buf[offset..offset + HEADER_LEN])
        .map_err(|_| eyre::eyre!("unreadable record header at {lsn}"))?;
    let len = header.len.get() as usize;
    ensure!(
        offset + HEADER_LEN + len <= buf.len(),
        "record at {lsn} is truncated"
    );
    let payload = &buf[offset + HEADER_LEN..offset + HEADER_LEN + len];
    Ok((header, payload))
}

impl LogManager for MemLog {
    fn append(&self, payload: &[u8], provisional: bool) -> Result<Lsn> {
        let mut state = self.state.lock();
        if state.fail_next {
            state.fail_next = false;
            bail!("injected log write failure");
        }

        let record_len = HEADER_LEN + payload.len();
        let current = state.current_file;
        let full = state
            .files
            .get(&current)
            .is_some_and(|buf| !buf.is_empty() && buf.len() + record_len > self.file_size);
        if full {
            state.current_file += 1;
        }
        let file = state.current_file;

        let header = RecordHeader {
            crc: U64::new(CRC64.checksum(payload)),
            len: U32::new(payload.len() as u32),
            flags: if provisional { FLAG_PROVISIONAL } else { 0 },
            _pad: [0; 3],
        };
        let buf = state.files.entry(file).or_default();
        let offset = buf.len() as u32;
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(payload);
        Ok(Lsn::new(file, offset))
    }

    fn read(&self, lsn: Lsn) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let (header, payload) = locate(&state, lsn)?;
        ensure!(
            header.crc.get() == CRC64.checksum(payload),
            "checksum mismatch in record at {lsn}"
        );
        Ok(payload.to_vec())
    }

    fn count_obsolete(&self, lsn: Lsn, size: u32) {
        if lsn.is_null() {
            return;
        }
        self.obsolete_count.fetch_add(1, Ordering::Relaxed);
        self.obsolete_bytes
            .fetch_add(u64::from(size), Ordering::Relaxed);
    }
}
