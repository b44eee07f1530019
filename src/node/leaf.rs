//! # Leaf Nodes
//!
//! An LN holds a record's payload, or a deletion marker when the payload is
//! absent — a deleted record is still a real log entry (recovery must redo
//! the delete), so the marker is a first-class state, not a missing node.
//!
//! The transient last-logged size feeds obsolete-space accounting: when a
//! new version supersedes this one, the byte count handed to the
//! space-reclamation tracker is the size of the record actually on disk,
//! not the in-memory footprint.

use crate::node::NodeKind;

/// Leaf record: payload bytes or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ln {
    data: Option<Box<[u8]>>,
    last_logged_size: u32,
    vlsn: Option<u64>,
}

impl Ln {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            data: Some(payload.into_boxed_slice()),
            last_logged_size: 0,
            vlsn: None,
        }
    }

    /// Deletion marker: logged so recovery can redo the delete.
    pub fn new_deleted() -> Self {
        Self {
            data: None,
            last_logged_size: 0,
            vlsn: None,
        }
    }

    /// Leaf carrying a sequence-version, used by streams that need a total
    /// order over record versions.
    pub fn new_versioned(payload: Vec<u8>, vlsn: u64) -> Self {
        Self {
            data: Some(payload.into_boxed_slice()),
            last_logged_size: 0,
            vlsn: Some(vlsn),
        }
    }

    pub fn from_parts(data: Option<Box<[u8]>>, vlsn: Option<u64>) -> Self {
        Self {
            data,
            last_logged_size: 0,
            vlsn,
        }
    }

    pub fn kind(&self) -> NodeKind {
        if self.vlsn.is_some() {
            NodeKind::LeafVersioned
        } else {
            NodeKind::Leaf
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.data.is_none()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn vlsn(&self) -> Option<u64> {
        self.vlsn
    }

    pub fn last_logged_size(&self) -> u32 {
        self.last_logged_size
    }

    pub fn set_last_logged_size(&mut self, size: u32) {
        self.last_logged_size = size;
    }

    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.data.as_ref().map_or(0, |d| d.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_leaf() {
        let ln = Ln::new(b"payload".to_vec());
        assert!(!ln.is_deleted());
        assert_eq!(ln.data(), Some(&b"payload"[..]));
        assert_eq!(ln.kind(), NodeKind::Leaf);
        assert_eq!(ln.vlsn(), None);
    }

    #[test]
    fn deletion_marker_has_no_payload() {
        let ln = Ln::new_deleted();
        assert!(ln.is_deleted());
        assert_eq!(ln.data(), None);
    }

    #[test]
    fn versioned_leaf_reports_its_kind() {
        let ln = Ln::new_versioned(b"v".to_vec(), 42);
        assert_eq!(ln.kind(), NodeKind::LeafVersioned);
        assert_eq!(ln.vlsn(), Some(42));
    }

    #[test]
    fn last_logged_size_is_transient_bookkeeping() {
        let mut ln = Ln::new(b"abc".to_vec());
        assert_eq!(ln.last_logged_size(), 0);
        ln.set_last_logged_size(17);
        assert_eq!(ln.last_logged_size(), 17);
    }
}
