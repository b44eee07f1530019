//! # Node Variants
//!
//! The tree is built from a tagged node hierarchy rather than virtual
//! dispatch: [`NodeKind`] enumerates the variants and answers capability
//! queries, [`NodeBody`] holds the variant data, and [`Node`] wraps a body
//! with the concurrency envelope (identity, level, latch, pin counter).
//!
//! | Kind            | Body               | Role                              |
//! |-----------------|--------------------|-----------------------------------|
//! | `Internal`      | [`In`]             | upper internal node               |
//! | `Bottom`        | [`In`]             | bottom internal node (BIN)        |
//! | `BottomDelta`   | [`BinDelta`]       | fetched BIN delta, un-materialized|
//! | `Leaf`          | [`Ln`]             | payload or deletion marker        |
//! | `LeafVersioned` | [`Ln`]             | leaf with a sequence-version      |
//!
//! ## Latch Discipline
//!
//! A node's body may only be read while its latch is held and only be
//! mutated while it is held exclusively. `BottomDelta` bodies require the
//! exclusive mode even for reads: a lookup may trigger materialization,
//! which rewrites the body in place. The accessors debug-assert ownership;
//! the `unsafe impl Sync` below is sound exactly because every access path
//! in this crate goes through the latch.

mod bottom;
mod internal;
mod leaf;

pub use bottom::{BinDelta, BlindOutcome};
pub use internal::{In, InsertSlot, SlotMatch};
pub use leaf::Ln;

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};

use crate::latch::Latch;

/// Node variant tag with a small capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Internal,
    Bottom,
    BottomDelta,
    Leaf,
    LeafVersioned,
}

impl NodeKind {
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Leaf | Self::LeafVersioned)
    }

    /// Bottom internal level, directly above leaf data.
    pub fn is_bottom(self) -> bool {
        matches!(self, Self::Bottom | Self::BottomDelta)
    }

    /// May persist as an incremental delta image.
    pub fn supports_delta(self) -> bool {
        matches!(self, Self::Bottom | Self::BottomDelta)
    }

    /// Requires the exclusive latch mode even for reads.
    pub fn requires_exclusive_read(self) -> bool {
        matches!(self, Self::BottomDelta)
    }

    /// On-record tag byte.
    pub fn tag(self) -> u8 {
        match self {
            Self::Internal => 0,
            Self::Bottom => 1,
            Self::BottomDelta => 2,
            Self::Leaf => 3,
            Self::LeafVersioned => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Internal,
            1 => Self::Bottom,
            2 => Self::BottomDelta,
            3 => Self::Leaf,
            4 => Self::LeafVersioned,
            _ => bail!("unknown node kind tag: {tag}"),
        })
    }
}

/// Variant data of a node.
#[derive(Debug)]
pub enum NodeBody {
    In(In),
    Delta(BinDelta),
    Ln(Ln),
}

impl NodeBody {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::In(in_) => in_.kind(),
            Self::Delta(_) => NodeKind::BottomDelta,
            Self::Ln(ln) => ln.kind(),
        }
    }

    pub fn memory_size(&self) -> usize {
        let base = std::mem::size_of::<Node>();
        base + match self {
            Self::In(in_) => in_.memory_size(),
            Self::Delta(delta) => delta.memory_size(),
            Self::Ln(ln) => ln.memory_size(),
        }
    }

    pub fn as_in(&self) -> Result<&In> {
        match self {
            Self::In(in_) => Ok(in_),
            other => bail!("expected internal node body, found {:?}", other.kind()),
        }
    }

    pub fn as_in_mut(&mut self) -> Result<&mut In> {
        match self {
            Self::In(in_) => Ok(in_),
            other => bail!("expected internal node body, found {:?}", other.kind()),
        }
    }

    pub fn as_ln(&self) -> Result<&Ln> {
        match self {
            Self::Ln(ln) => Ok(ln),
            other => bail!("expected leaf body, found {:?}", other.kind()),
        }
    }
}

/// A node in the cache: identity, level, latch, and the latched body.
///
/// `level` is 0 for leaves, 1 for BINs, 2+ for upper INs. The pin counter is
/// advisory: it does not block latching, only eviction of a node that is the
/// target of an in-flight fetch.
pub struct Node {
    id: u64,
    level: u8,
    latch: Latch,
    pins: AtomicU32,
    visited: AtomicBool,
    body: UnsafeCell<NodeBody>,
}

// Body access is gated on the latch; counters are atomic.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub fn new(id: u64, level: u8, body: NodeBody) -> Arc<Self> {
        Arc::new(Self {
            id,
            level,
            latch: Latch::new(),
            pins: AtomicU32::new(0),
            visited: AtomicBool::new(false),
            body: UnsafeCell::new(body),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// Body access; the caller must hold the latch in either mode.
    pub fn body(&self) -> &NodeBody {
        debug_assert!(self.latch.is_owned(), "body read without latch");
        unsafe { &*self.body.get() }
    }

    /// Mutable body access; the caller must hold the latch exclusively.
    #[allow(clippy::mut_from_ref)]
    pub fn body_mut(&self) -> &mut NodeBody {
        debug_assert!(
            self.latch.is_owned_exclusive(),
            "body write without exclusive latch"
        );
        unsafe { &mut *self.body.get() }
    }

    /// Blocks concurrent eviction while a fetch targeting this node is in
    /// flight. Does not block latching.
    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin without pin");
    }

    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// Second-chance bit for the evictor: set on access, cleared (and
    /// reported) when the eviction hand passes.
    pub fn mark_visited(&self) {
        self.visited.store(true, Ordering::Relaxed);
    }

    pub fn take_visited(&self) -> bool {
        self.visited.swap(false, Ordering::Relaxed)
    }

    /// Memory footprint; requires the latch.
    pub fn memory_size(&self) -> usize {
        self.body().memory_size()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("pinned", &self.is_pinned())
            .field("latch", &self.latch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_capability_table() {
        assert!(NodeKind::Leaf.is_leaf());
        assert!(NodeKind::LeafVersioned.is_leaf());
        assert!(!NodeKind::Bottom.is_leaf());

        assert!(NodeKind::Bottom.is_bottom());
        assert!(NodeKind::BottomDelta.is_bottom());
        assert!(!NodeKind::Internal.is_bottom());

        assert!(NodeKind::Bottom.supports_delta());
        assert!(!NodeKind::Internal.supports_delta());

        assert!(NodeKind::BottomDelta.requires_exclusive_read());
        assert!(!NodeKind::Bottom.requires_exclusive_read());
    }

    #[test]
    fn kind_tag_round_trip() {
        for kind in [
            NodeKind::Internal,
            NodeKind::Bottom,
            NodeKind::BottomDelta,
            NodeKind::Leaf,
            NodeKind::LeafVersioned,
        ] {
            assert_eq!(NodeKind::from_tag(kind.tag()).unwrap(), kind);
        }
        assert!(NodeKind::from_tag(99).is_err());
    }

    #[test]
    fn pin_is_advisory_and_counted() {
        let node = Node::new(1, 0, NodeBody::Ln(Ln::new(b"x".to_vec())));
        assert!(!node.is_pinned());
        node.pin();
        node.pin();
        node.unpin();
        assert!(node.is_pinned());
        node.unpin();
        assert!(!node.is_pinned());
    }

    #[test]
    fn visited_bit_swaps() {
        let node = Node::new(1, 0, NodeBody::Ln(Ln::new_deleted()));
        assert!(!node.take_visited());
        node.mark_visited();
        assert!(node.take_visited());
        assert!(!node.take_visited());
    }
}
