//! # Log Sequence Numbers
//!
//! An LSN locates a persisted record in the append-only log as a
//! (file number, file offset) pair, packed into a single `u64` with the file
//! number in the high 32 bits. The all-ones value is the null sentinel: a
//! slot that has never been logged, or whose record has been made obsolete
//! and reclaimed.
//!
//! Nodes store per-slot LSNs in a compact 4-byte form where possible (see
//! [`crate::entry::lsns`]); this type is the full-width form used everywhere
//! else.

use std::fmt;

/// A (file number, file offset) locator for a persisted record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(u64);

impl Lsn {
    /// Sentinel for "no record": never a valid log position.
    pub const NULL: Lsn = Lsn(u64::MAX);

    /// Maximum file offset representable in the compact 3-byte slot form.
    pub const MAX_COMPACT_OFFSET: u32 = 0x00FF_FFFF;

    pub fn new(file: u32, offset: u32) -> Self {
        Self((u64::from(file) << 32) | u64::from(offset))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn file(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn offset(self) -> u32 {
        self.0 as u32
    }

    pub fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Lsn(NULL)")
        } else {
            write!(f, "Lsn({}/{})", self.file(), self.offset())
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "NULL")
        } else {
            write!(f, "{}/{}", self.file(), self.offset())
        }
    }
}
