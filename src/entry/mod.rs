//! # Per-Slot Entry Representations
//!
//! Each internal node stores its entries column-wise in compact stores: keys
//! ([`keys::KeyStore`]), LSNs ([`lsns::LsnStore`]), cached child references
//! ([`children::ChildStore`]) and a per-slot state byte. The stores are
//! owned, versioned value types: every mutator consumes the store and
//! returns the possibly-new representation, which the owning node must
//! immediately adopt (and re-account its memory footprint).
//!
//! ## State Byte
//!
//! | Flag             | Meaning                                              |
//! |------------------|------------------------------------------------------|
//! | `DIRTY`          | Slot changed since the node's last full logged image |
//! | `KNOWN_DELETED`  | Record deletion is committed; authoritative          |
//! | `PENDING_DELETED`| Record deletion is provisional; abortable            |
//!
//! `KNOWN_DELETED` is the only state under which a slot's LSN may be null.
//! The two delete states are deliberately kept distinct: merging them has
//! been proposed but the transition rules differ (pending clears on abort,
//! known never reverts except through slot reuse on insert).

pub mod children;
pub mod keys;
pub mod lsns;

pub use children::ChildStore;
pub use keys::KeyStore;
pub use lsns::LsnStore;

/// Per-slot state flags.
pub mod state {
    /// Slot changed since the last full logged image.
    pub const DIRTY: u8 = 0x01;
    /// Deletion is committed; the slot's LSN may be null.
    pub const KNOWN_DELETED: u8 = 0x02;
    /// Deletion is provisional (transaction not yet resolved).
    pub const PENDING_DELETED: u8 = 0x04;

    const ALL: u8 = DIRTY | KNOWN_DELETED | PENDING_DELETED;

    pub fn is_dirty(s: u8) -> bool {
        s & DIRTY != 0
    }

    pub fn is_known_deleted(s: u8) -> bool {
        s & KNOWN_DELETED != 0
    }

    pub fn is_pending_deleted(s: u8) -> bool {
        s & PENDING_DELETED != 0
    }

    /// Deleted in either the committed or the provisional sense.
    pub fn is_deleted(s: u8) -> bool {
        s & (KNOWN_DELETED | PENDING_DELETED) != 0
    }

    pub fn is_valid(s: u8) -> bool {
        s & !ALL == 0
    }
}

#[cfg(test)]
mod tests {
    use super::state;

    #[test]
    fn flags_are_independent() {
        let s = state::DIRTY | state::PENDING_DELETED;
        assert!(state::is_dirty(s));
        assert!(state::is_pending_deleted(s));
        assert!(!state::is_known_deleted(s));
        assert!(state::is_deleted(s));
    }

    #[test]
    fn unknown_bits_are_invalid() {
        assert!(state::is_valid(0));
        assert!(state::is_valid(state::DIRTY | state::KNOWN_DELETED));
        assert!(!state::is_valid(0x80));
    }
}
