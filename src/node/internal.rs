//! # Internal Nodes
//!
//! An [`In`] is an upper internal node or a BIN, holding a sorted entry
//! array stored column-wise: keys, LSNs, cached-child references, per-slot
//! state bytes, and per-slot last-logged sizes. The column stores are value
//! types with mutable representations (see [`crate::entry`]); every mutation
//! here takes the store out of the struct, runs the mutator, and adopts the
//! returned representation.
//!
//! ## Slot 0 of a Non-Bottom Node
//!
//! Entries are sorted by key with one exception: slot 0 of an upper internal
//! node is a virtual "always lowest" sentinel during non-exact search. Its
//! stored key bytes are real (they are logged and used as a split boundary),
//! but routing treats them as minus infinity so keys smaller than every
//! existing key descend to the leftmost child. Exact search (duplicate
//! detection) compares slot 0 normally.
//!
//! ## Identifier Key
//!
//! Every node carries an identifier key: some key that belongs in the node's
//! range. A split moves the half *not* containing the identifier key into
//! the sibling, so the original node object keeps its place in the parent
//! when possible. A split on a node without an identifier key is a
//! structural fault.

use std::cmp::Ordering;
use std::sync::Arc;

use bumpalo::Bump;
use eyre::{bail, ensure, Result};

use crate::config::EngineConfig;
use crate::entry::{state, ChildStore, KeyStore, LsnStore};
use crate::lsn::Lsn;
use crate::node::{Node, NodeKind};

/// Result of an entry search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMatch {
    pub index: usize,
    pub exact: bool,
}

/// Result of an entry insertion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSlot {
    Inserted(usize),
    /// An exact-key slot already exists; the caller resolves (slot reuse for
    /// deleted entries, duplicate error otherwise).
    Duplicate(usize),
}

/// Upper internal node or BIN: the sorted entry array.
#[derive(Debug)]
pub struct In {
    kind: NodeKind,
    pub(crate) ident_key: Option<Box<[u8]>>,
    pub(crate) is_root: bool,
    pub(crate) dirty: bool,
    capacity: usize,
    pub(crate) keys: KeyStore,
    pub(crate) lsns: LsnStore,
    pub(crate) states: Vec<u8>,
    pub(crate) sizes: Vec<u32>,
    pub(crate) children: ChildStore,
    pub(crate) last_full_lsn: Lsn,
    /// Entry count at the time of the last full logged image; carried into
    /// logged deltas as base metadata.
    pub(crate) last_full_count: u32,
    pub(crate) last_delta_lsn: Lsn,
    pub(crate) prohibit_next_delta: bool,
    /// Obsolete LSNs deferred by provisional logging, owed to the log once
    /// an ancestor is durably logged.
    pub(crate) provisional_obsolete: Vec<Lsn>,
}

impl In {
    pub fn new(kind: NodeKind, config: &EngineConfig) -> Self {
        assert!(
            matches!(kind, NodeKind::Internal | NodeKind::Bottom),
            "In body requires an internal kind, got {kind:?}"
        );
        Self {
            kind,
            ident_key: None,
            is_root: false,
            dirty: false,
            capacity: config.max_entries(kind.is_bottom()),
            keys: KeyStore::new(),
            lsns: LsnStore::new(config.disable_compact_lsns),
            states: Vec::new(),
            sizes: Vec::new(),
            children: ChildStore::new(),
            last_full_lsn: Lsn::NULL,
            last_full_count: 0,
            last_delta_lsn: Lsn::NULL,
            prohibit_next_delta: false,
            provisional_obsolete: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        kind: NodeKind,
        ident_key: Option<Box<[u8]>>,
        is_root: bool,
        capacity: usize,
        keys: KeyStore,
        lsns: LsnStore,
        states: Vec<u8>,
        sizes: Vec<u32>,
    ) -> Self {
        let n = states.len();
        Self {
            kind,
            ident_key,
            is_root,
            dirty: false,
            capacity,
            keys,
            lsns,
            states,
            sizes,
            children: ChildStore::new(),
            last_full_lsn: Lsn::NULL,
            last_full_count: 0,
            last_delta_lsn: Lsn::NULL,
            prohibit_next_delta: false,
            provisional_obsolete: Vec::with_capacity(0),
        }
        .tap_assert(n)
    }

    fn tap_assert(self, n: usize) -> Self {
        debug_assert_eq!(self.keys.len(), n);
        debug_assert_eq!(self.lsns.len(), n);
        debug_assert_eq!(self.sizes.len(), n);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn n_entries(&self) -> usize {
        self.states.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.n_entries() >= self.capacity
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn ident_key(&self) -> Option<&[u8]> {
        self.ident_key.as_deref()
    }

    pub fn last_full_lsn(&self) -> Lsn {
        self.last_full_lsn
    }

    pub fn last_delta_lsn(&self) -> Lsn {
        self.last_delta_lsn
    }

    pub fn key(&self, idx: usize) -> Vec<u8> {
        self.keys.key(idx)
    }

    pub fn entry_lsn(&self, idx: usize) -> Lsn {
        self.lsns.get(idx)
    }

    pub fn entry_state(&self, idx: usize) -> u8 {
        self.states[idx]
    }

    pub fn logged_size(&self, idx: usize) -> u32 {
        self.sizes[idx]
    }

    pub fn child(&self, idx: usize) -> Option<&Arc<Node>> {
        self.children.get(idx)
    }

    fn cmp_slot(&self, idx: usize, key: &[u8], config: &EngineConfig) -> Ordering {
        match &config.key_comparator {
            Some(cmp) => cmp(&self.keys.key(idx), key),
            None => self.keys.compare_bytewise(idx, key),
        }
    }

    /// Binary search for `key`.
    ///
    /// Non-exact search routes: the returned slot is the greatest entry at
    /// or below `key`, with slot 0 of a non-bottom node acting as a virtual
    /// lowest sentinel. `None` means the key lies below every considered
    /// entry (only possible on bottom nodes, exact searches, or an empty
    /// node).
    pub fn find_entry(&self, key: &[u8], exact: bool, config: &EngineConfig) -> Option<SlotMatch> {
        let n = self.n_entries();
        let virtual_slot0 = !exact && self.kind == NodeKind::Internal && n > 0;
        let lo = usize::from(virtual_slot0);

        let mut low = lo;
        let mut high = n;
        while low < high {
            let mid = low + (high - low) / 2;
            match self.cmp_slot(mid, key, config) {
                Ordering::Less => low = mid + 1,
                Ordering::Equal => return Some(SlotMatch { index: mid, exact: true }),
                Ordering::Greater => high = mid,
            }
        }

        // Entries [lo..low) sort strictly below the key.
        if low == lo {
            if virtual_slot0 {
                return Some(SlotMatch { index: 0, exact: false });
            }
            return None;
        }
        Some(SlotMatch {
            index: low - 1,
            exact: false,
        })
    }

    /// Inserts a sorted entry. Exact duplicates are reported, not resolved;
    /// a full node is the caller's fault (it must split first).
    pub fn insert_entry(
        &mut self,
        key: &[u8],
        lsn: Lsn,
        entry_state: u8,
        config: &EngineConfig,
    ) -> Result<InsertSlot> {
        let idx = match self.find_entry(key, true, config) {
            Some(m) if m.exact => return Ok(InsertSlot::Duplicate(m.index)),
            Some(m) => m.index + 1,
            None => 0,
        };
        ensure!(
            !self.is_full(),
            "insert into full node: {} entries at capacity {}",
            self.n_entries(),
            self.capacity
        );

        let n = self.n_entries();
        self.keys = std::mem::take(&mut self.keys).insert(idx, key);
        self.lsns = std::mem::take(&mut self.lsns).insert(idx, lsn);
        self.children = std::mem::take(&mut self.children).insert(idx);
        self.states.insert(idx, entry_state | state::DIRTY);
        self.sizes.insert(idx, 0);
        debug_assert_eq!(self.n_entries(), n + 1);

        if self.ident_key.is_none() {
            self.ident_key = Some(key.into());
        }
        self.dirty = true;
        Ok(InsertSlot::Inserted(idx))
    }

    /// Removes an entry, compacting the arrays. A structural removal forces
    /// the next logged image to be full: a delta cannot express "slot gone".
    pub fn delete_entry(&mut self, idx: usize) -> Result<()> {
        ensure!(
            idx < self.n_entries(),
            "delete index {idx} out of bounds ({} entries)",
            self.n_entries()
        );
        self.keys = std::mem::take(&mut self.keys).remove(idx);
        self.lsns = std::mem::take(&mut self.lsns).remove(idx);
        self.children = std::mem::take(&mut self.children).remove(idx).compact();
        self.states.remove(idx);
        self.sizes.remove(idx);
        self.prohibit_next_delta = true;
        self.dirty = true;
        Ok(())
    }

    /// In-place LSN replacement for one slot (record update, redo).
    pub fn update_entry_lsn(&mut self, idx: usize, lsn: Lsn, logged_size: u32) {
        self.lsns = std::mem::take(&mut self.lsns).set(idx, lsn);
        self.sizes[idx] = logged_size;
        self.states[idx] |= state::DIRTY;
        self.dirty = true;
    }

    /// Sets and clears state flags for one slot.
    pub fn update_entry_state(&mut self, idx: usize, set: u8, clear: u8) {
        debug_assert!(state::is_valid(set) && state::is_valid(clear));
        self.states[idx] = (self.states[idx] & !clear) | set | state::DIRTY;
        self.dirty = true;
    }

    /// Combined LSN + state replacement (cursor mutation, recovery undo).
    pub fn update_entry(&mut self, idx: usize, lsn: Lsn, logged_size: u32, set: u8, clear: u8) {
        self.update_entry_lsn(idx, lsn, logged_size);
        self.update_entry_state(idx, set, clear);
    }

    /// Key + LSN replacement for one slot; keeps sort order the caller's
    /// responsibility (used by slot reuse where the key is byte-equal under
    /// the configured comparator).
    pub fn update_entry_key(&mut self, idx: usize, key: &[u8], lsn: Lsn, logged_size: u32) {
        self.keys = std::mem::take(&mut self.keys).set(idx, key);
        self.update_entry_lsn(idx, lsn, logged_size);
    }

    /// Overwrites the whole state byte (delta merge).
    pub(crate) fn replace_state(&mut self, idx: usize, entry_state: u8) {
        self.states[idx] = entry_state;
    }

    /// Delta-merge insertion: replaces the slot on an exact hit, inserts
    /// otherwise, and tolerates a node at capacity (the merged image may
    /// transiently exceed it until the next split).
    pub(crate) fn merge_entry(
        &mut self,
        key: &[u8],
        lsn: Lsn,
        entry_state: u8,
        config: &EngineConfig,
    ) -> Result<usize> {
        ensure!(state::is_valid(entry_state), "invalid merged state byte {entry_state:#04x}");
        let idx = match self.find_entry(key, true, config) {
            Some(m) if m.exact => {
                self.keys = std::mem::take(&mut self.keys).set(m.index, key);
                self.lsns = std::mem::take(&mut self.lsns).set(m.index, lsn);
                self.sizes[m.index] = 0;
                self.replace_state(m.index, entry_state);
                return Ok(m.index);
            }
            Some(m) => m.index + 1,
            None => 0,
        };
        self.keys = std::mem::take(&mut self.keys).insert(idx, key);
        self.lsns = std::mem::take(&mut self.lsns).insert(idx, lsn);
        self.children = std::mem::take(&mut self.children).insert(idx);
        self.states.insert(idx, entry_state);
        self.sizes.insert(idx, 0);
        Ok(idx)
    }

    pub fn attach_child(&mut self, idx: usize, child: Arc<Node>) {
        let n = self.n_entries();
        debug_assert!(idx < n);
        self.children = std::mem::take(&mut self.children).set(idx, n, Some(child));
    }

    pub fn detach_child(&mut self, idx: usize) -> Option<Arc<Node>> {
        let n = self.n_entries();
        let detached = self.children.get(idx).cloned();
        self.children = std::mem::take(&mut self.children)
            .set(idx, n, None)
            .compact();
        detached
    }

    /// Number of slots changed since the last full logged image.
    pub fn dirty_slot_count(&self) -> usize {
        self.states.iter().filter(|s| state::is_dirty(**s)).count()
    }

    /// Whether the next log write may be a delta.
    pub fn can_log_delta(&self, config: &EngineConfig) -> bool {
        let dirty = self.dirty_slot_count();
        self.kind.supports_delta()
            && !self.prohibit_next_delta
            && !self.last_full_lsn.is_null()
            && dirty > 0
            && dirty <= config.delta_limit(self.capacity)
    }

    /// Clears per-slot dirty bits after a full image is logged.
    pub(crate) fn clear_dirty_flags(&mut self) {
        for s in &mut self.states {
            *s &= !state::DIRTY;
        }
    }

    /// Recomputes the shared key prefix by scanning all keys; called after
    /// bulk structural change (split, delta merge).
    pub fn recompute_key_prefix(&mut self) {
        self.keys = std::mem::take(&mut self.keys).recompute_prefix();
    }

    /// Splits this node's entries at `split_idx`, returning the new sibling
    /// and whether the sibling took the upper half. The half containing the
    /// identifier key stays in `self`.
    pub(crate) fn split_entries(
        &mut self,
        split_idx: usize,
        config: &EngineConfig,
    ) -> Result<(In, bool)> {
        let n = self.n_entries();
        ensure!(
            split_idx > 0 && split_idx < n,
            "split index {split_idx} out of range for {n} entries"
        );
        let ident = match &self.ident_key {
            Some(key) => key.clone(),
            None => bail!("split without an identifier key"),
        };

        let ident_idx = self
            .find_entry(&ident, false, config)
            .map_or(0, |m| m.index);
        let sibling_is_upper = ident_idx < split_idx;
        let range = if sibling_is_upper {
            split_idx..n
        } else {
            0..split_idx
        };

        // Scratch copies of the moved keys live in a per-split arena.
        let arena = Bump::new();
        let moved_keys: Vec<&[u8]> = range
            .clone()
            .map(|idx| arena.alloc_slice_copy(&self.key(idx)) as &[u8])
            .collect();
        let moved: Vec<(Lsn, u8, u32, Option<Arc<Node>>)> = range
            .clone()
            .map(|idx| {
                (
                    self.entry_lsn(idx),
                    self.entry_state(idx),
                    self.logged_size(idx),
                    self.children.get(idx).cloned(),
                )
            })
            .collect();

        for _ in range.clone() {
            self.keys = std::mem::take(&mut self.keys).remove(range.start);
            self.lsns = std::mem::take(&mut self.lsns).remove(range.start);
            self.children = std::mem::take(&mut self.children).remove(range.start);
            self.states.remove(range.start);
            self.sizes.remove(range.start);
        }
        self.children = std::mem::take(&mut self.children).compact();

        let mut sibling = In::new(self.kind, config);
        sibling.capacity = self.capacity;
        for (idx, (key, (lsn, entry_state, size, child))) in
            moved_keys.iter().zip(moved).enumerate()
        {
            sibling.keys = std::mem::take(&mut sibling.keys).insert(idx, key);
            sibling.lsns = std::mem::take(&mut sibling.lsns).insert(idx, lsn);
            sibling.children = std::mem::take(&mut sibling.children).insert(idx);
            sibling.states.push(entry_state | state::DIRTY);
            sibling.sizes.push(size);
            if let Some(child) = child {
                sibling.attach_child(idx, child);
            }
        }
        sibling.ident_key = Some(sibling.key(0).into_boxed_slice());
        sibling.dirty = true;
        sibling.prohibit_next_delta = true;

        // Both halves changed shape: full images next, fresh prefixes.
        self.prohibit_next_delta = true;
        self.dirty = true;
        for s in &mut self.states {
            *s |= state::DIRTY;
        }
        self.recompute_key_prefix();
        sibling.recompute_key_prefix();

        Ok((sibling, sibling_is_upper))
    }

    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.ident_key.as_ref().map_or(0, |k| k.len())
            + self.keys.memory_size()
            + self.lsns.memory_size()
            + self.children.memory_size()
            + self.states.len()
            + self.sizes.len() * 4
            + self.provisional_obsolete.len() * std::mem::size_of::<Lsn>()
    }

    /// Structural invariant sweep: sort order, state validity, and the
    /// null-LSN rule (null only under known-deleted).
    pub fn verify(&self, config: &EngineConfig) -> Result<()> {
        let n = self.n_entries();
        ensure!(
            n <= self.capacity,
            "entry count {n} exceeds capacity {}",
            self.capacity
        );
        ensure!(
            self.keys.len() == n && self.lsns.len() == n && self.sizes.len() == n,
            "column stores out of step: keys={} lsns={} sizes={} states={}",
            self.keys.len(),
            self.lsns.len(),
            self.sizes.len(),
            n
        );

        // Slot 0 of an upper IN is exempt from ordering (virtual lowest).
        let first_ordered = usize::from(self.kind == NodeKind::Internal);
        for idx in first_ordered + 1..n {
            let prev = self.keys.key(idx - 1);
            let cur = self.keys.key(idx);
            ensure!(
                config.compare(&prev, &cur) == Ordering::Less,
                "entries out of order at slot {idx}"
            );
        }

        for idx in 0..n {
            let s = self.states[idx];
            ensure!(state::is_valid(s), "invalid state byte {s:#04x} at slot {idx}");
            if self.lsns.get(idx).is_null() {
                ensure!(
                    state::is_known_deleted(s),
                    "null LSN at slot {idx} without known-deleted state"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Ln, NodeBody};

    fn config() -> EngineConfig {
        EngineConfig {
            in_max_entries: 8,
            bin_max_entries: 8,
            ..Default::default()
        }
    }

    fn bin_with(keys: &[&[u8]], config: &EngineConfig) -> In {
        let mut in_ = In::new(NodeKind::Bottom, config);
        for (i, key) in keys.iter().enumerate() {
            let slot = in_
                .insert_entry(key, Lsn::new(1, i as u32 + 1), 0, config)
                .unwrap();
            assert!(matches!(slot, InsertSlot::Inserted(_)));
        }
        in_
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let config = config();
        let in_ = bin_with(&[b"delta", b"alpha", b"charlie", b"bravo"], &config);
        assert_eq!(in_.n_entries(), 4);
        assert_eq!(in_.key(0), b"alpha");
        assert_eq!(in_.key(3), b"delta");
        in_.verify(&config).unwrap();
    }

    #[test]
    fn insert_reports_duplicates() {
        let config = config();
        let mut in_ = bin_with(&[b"a", b"b"], &config);
        let slot = in_.insert_entry(b"b", Lsn::new(2, 2), 0, &config).unwrap();
        assert_eq!(slot, InsertSlot::Duplicate(1));
        assert_eq!(in_.n_entries(), 2);
    }

    #[test]
    fn insert_into_full_node_fails() {
        let config = EngineConfig {
            bin_max_entries: 2,
            ..config()
        };
        let mut in_ = bin_with(&[b"a", b"b"], &config);
        let err = in_.insert_entry(b"c", Lsn::new(1, 9), 0, &config).unwrap_err();
        assert!(err.to_string().contains("full node"));
    }

    #[test]
    fn find_entry_exact_and_routing() {
        let config = config();
        let in_ = bin_with(&[b"b", b"d", b"f"], &config);

        assert_eq!(
            in_.find_entry(b"d", true, &config),
            Some(SlotMatch { index: 1, exact: true })
        );
        // Routing search lands on the greatest entry at or below the key.
        assert_eq!(
            in_.find_entry(b"e", false, &config),
            Some(SlotMatch { index: 1, exact: false })
        );
        // Below the lower bound of a bottom node: nothing.
        assert_eq!(in_.find_entry(b"a", false, &config), None);
        assert_eq!(in_.find_entry(b"a", true, &config), None);
    }

    #[test]
    fn upper_in_slot0_is_virtual_lowest() {
        let config = config();
        let mut in_ = In::new(NodeKind::Internal, &config);
        for (i, key) in [b"m", b"s"].iter().enumerate() {
            in_.insert_entry(*key, Lsn::new(1, i as u32 + 1), 0, &config)
                .unwrap();
        }

        // Non-exact below every key routes to slot 0.
        assert_eq!(
            in_.find_entry(b"a", false, &config),
            Some(SlotMatch { index: 0, exact: false })
        );
        // Exact search treats slot 0 as a real key.
        assert_eq!(in_.find_entry(b"a", true, &config), None);
        assert_eq!(
            in_.find_entry(b"m", true, &config),
            Some(SlotMatch { index: 0, exact: true })
        );
    }

    #[test]
    fn delete_entry_compacts_and_forces_full_image() {
        let config = config();
        let mut in_ = bin_with(&[b"a", b"b", b"c"], &config);
        assert!(!in_.prohibit_next_delta);

        in_.delete_entry(1).unwrap();
        assert_eq!(in_.n_entries(), 2);
        assert_eq!(in_.key(1), b"c");
        assert!(in_.prohibit_next_delta);
        in_.verify(&config).unwrap();
    }

    #[test]
    fn update_entry_marks_slot_dirty() {
        let config = config();
        let mut in_ = bin_with(&[b"a"], &config);
        in_.clear_dirty_flags();
        assert_eq!(in_.dirty_slot_count(), 0);

        in_.update_entry_lsn(0, Lsn::new(7, 7), 21);
        assert_eq!(in_.dirty_slot_count(), 1);
        assert_eq!(in_.entry_lsn(0), Lsn::new(7, 7));
        assert_eq!(in_.logged_size(0), 21);
    }

    #[test]
    fn update_entry_key_replaces_bytes_in_place() {
        let config = config();
        let mut in_ = bin_with(&[b"row:a", b"row:c"], &config);
        in_.update_entry_key(1, b"row:b", Lsn::new(4, 40), 9);
        assert_eq!(in_.key(1), b"row:b");
        assert_eq!(in_.entry_lsn(1), Lsn::new(4, 40));
        assert_eq!(in_.logged_size(1), 9);
        in_.verify(&config).unwrap();
    }

    #[test]
    fn state_transitions_preserve_other_flags() {
        let config = config();
        let mut in_ = bin_with(&[b"a"], &config);
        in_.update_entry_state(0, state::PENDING_DELETED, 0);
        assert!(state::is_pending_deleted(in_.entry_state(0)));

        // Commit: pending becomes known.
        in_.update_entry_state(0, state::KNOWN_DELETED, state::PENDING_DELETED);
        let s = in_.entry_state(0);
        assert!(state::is_known_deleted(s));
        assert!(!state::is_pending_deleted(s));
    }

    #[test]
    fn null_lsn_requires_known_deleted() {
        let config = config();
        let mut in_ = bin_with(&[b"a"], &config);
        in_.update_entry_lsn(0, Lsn::NULL, 0);
        assert!(in_.verify(&config).is_err());

        in_.update_entry_state(0, state::KNOWN_DELETED, 0);
        in_.verify(&config).unwrap();
    }

    #[test]
    fn attach_detach_child_round_trip() {
        let config = config();
        let mut in_ = bin_with(&[b"a", b"b"], &config);
        let child = Node::new(9, 0, NodeBody::Ln(Ln::new(b"v".to_vec())));

        in_.attach_child(1, Arc::clone(&child));
        assert_eq!(in_.child(1).unwrap().id(), 9);

        let detached = in_.detach_child(1).unwrap();
        assert_eq!(detached.id(), 9);
        assert!(in_.child(1).is_none());
        assert!(matches!(in_.children, ChildStore::Empty));
    }

    #[test]
    fn delta_eligibility_follows_the_rules() {
        let config = EngineConfig {
            bin_max_entries: 8,
            delta_max_dirty_percent: 25,
            ..Default::default()
        };
        let mut in_ = bin_with(&[b"a", b"b", b"c", b"d"], &config);

        // Never logged in full: no delta base.
        assert!(!in_.can_log_delta(&config));

        in_.last_full_lsn = Lsn::new(1, 1);
        in_.clear_dirty_flags();
        assert!(!in_.can_log_delta(&config), "no dirty slots");

        in_.update_entry_lsn(0, Lsn::new(2, 2), 5);
        assert!(in_.can_log_delta(&config));

        in_.update_entry_lsn(1, Lsn::new(2, 9), 5);
        in_.update_entry_lsn(2, Lsn::new(2, 14), 5);
        assert!(!in_.can_log_delta(&config), "3 dirty > 25% of 8");
    }

    #[test]
    fn split_moves_half_without_ident_key() {
        let config = config();
        let mut in_ = bin_with(&[b"a", b"b", b"c", b"d"], &config);
        // ident key is "a" (first insert), so the upper half moves out.
        let (sibling, upper) = in_.split_entries(2, &config).unwrap();
        assert!(upper);
        assert_eq!(in_.n_entries(), 2);
        assert_eq!(sibling.n_entries(), 2);
        assert_eq!(in_.key(0), b"a");
        assert_eq!(sibling.key(0), b"c");
        assert_eq!(sibling.ident_key(), Some(&b"c"[..]));
        assert!(in_.prohibit_next_delta && sibling.prohibit_next_delta);
        in_.verify(&config).unwrap();
        sibling.verify(&config).unwrap();
    }

    #[test]
    fn split_keeps_ident_half_in_place() {
        let config = config();
        let mut in_ = bin_with(&[b"a", b"b", b"c", b"d"], &config);
        in_.ident_key = Some(b"d".to_vec().into_boxed_slice());

        let (sibling, upper) = in_.split_entries(2, &config).unwrap();
        assert!(!upper, "ident key sits in the upper half; lower half moves");
        assert_eq!(in_.key(0), b"c");
        assert_eq!(sibling.key(0), b"a");
    }

    #[test]
    fn split_without_ident_key_is_a_fault() {
        let config = config();
        let mut in_ = bin_with(&[b"a", b"b"], &config);
        in_.ident_key = None;
        let err = in_.split_entries(1, &config).unwrap_err();
        assert!(err.to_string().contains("identifier key"));
    }
}
