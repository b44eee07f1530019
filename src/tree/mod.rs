//! # Tree Operations
//!
//! Descent, child faulting, and the record-level operations on bottom nodes.
//!
//! ## Latch Discipline
//!
//! Descents use exclusive lock coupling, strictly top-down: the parent's
//! latch is held while the child's is acquired, then released. No latch is
//! held across a blocking child fetch; instead the parent is pinned (which
//! blocks its eviction, not its latching), released, and re-latched after
//! the read. The observed (slot, LSN, key) triple is then revalidated: if
//! the slot moved, the entry is re-searched by key; if the same LSN cannot
//! be found, the fetched image is discarded and the operation restarts from
//! the root. Restart is a typed outcome here, not an error.
//!
//! ## Preemptive Splits
//!
//! A full child is split while the parent is still latched, so a parent is
//! never asked to absorb a boundary entry it has no room for. A full root is
//! split before descent begins. The only node that can transiently exceed
//! its capacity is a BIN inflated by a delta merge; the next descent that
//! sees it full splits it before inserting.
//!
//! ## Deletes
//!
//! A delete logs a deletion marker and flags the slot pending-deleted; the
//! caller (the transaction layer) later resolves it with [`Tree::commit_delete`]
//! (slot LSN goes null, state becomes known-deleted) or [`Tree::abort_delete`]
//! (the pre-delete LSN, which the delete returned, is restored).

mod split;

pub use split::SplitMode;

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::Result;
use parking_lot::RwLock;
use tracing::trace;

use crate::cache::Evictor;
use crate::entry::state;
use crate::env::Env;
use crate::log::codec::{self, DecodedNode};
use crate::log::obsolete;
use crate::lsn::Lsn;
use crate::node::{In, Ln, Node, NodeBody};
use crate::node::{BlindOutcome, NodeKind};

/// Restarts before the descent is declared stuck. Each restart means the
/// tree changed underfoot; a bounded workload settles in a handful.
const MAX_RESTARTS: usize = 100;

/// Result of [`Tree::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key existed as a deleted slot; the slot was reused.
    ReusedDeletedSlot,
    /// A live record already holds the key; nothing was written.
    AlreadyExists,
}

enum Fetch {
    /// Latched child plus the parent slot it currently occupies (the slot
    /// may differ from the one the caller searched if the parent changed
    /// during an unlatched fetch window).
    Child(Arc<Node>, usize),
    Restart,
}

enum Descent {
    Bin(Arc<Node>),
    Restart,
}

enum BinOp<T> {
    Done(T),
    Retry,
}

/// The node tree: a root pointer plus everything reachable through it.
pub struct Tree {
    env: Arc<Env>,
    root: RwLock<Arc<Node>>,
    evictor: Evictor,
}

impl Tree {
    /// Empty tree: the root starts as a root BIN one level above the leaves.
    pub fn new(env: Arc<Env>) -> Self {
        let mut root_in = In::new(NodeKind::Bottom, env.config());
        root_in.is_root = true;
        let body = NodeBody::In(root_in);
        let size = body.memory_size();
        let root = Node::new(env.next_node_id(), 1, body);
        env.in_list().insert(Arc::clone(&root));
        env.budget().add(size);
        Self {
            env,
            root: RwLock::new(root),
            evictor: Evictor::new(),
        }
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Current root node; the pointer may be swapped by a root split.
    pub fn root(&self) -> Arc<Node> {
        Arc::clone(&self.root.read())
    }

    /// Inserts a record. A key held by a deleted slot is reused; a live
    /// duplicate leaves the tree untouched.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        self.env.locks().lock_record(key)?;
        let outcome = self.run_on_bin(key, true, |bin| self.bin_insert(bin, key, value));
        self.env.locks().release_record(key);
        self.maybe_evict()?;
        outcome
    }

    /// Looks up the live payload for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.run_on_bin(key, false, |bin| self.bin_get(bin, key))
    }

    /// Overwrites the payload of a live record. Returns false when the key
    /// is absent or deleted.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.env.locks().lock_record(key)?;
        let outcome = self.run_on_bin(key, false, |bin| self.bin_update(bin, key, value));
        self.env.locks().release_record(key);
        outcome
    }

    /// Marks a live record pending-deleted and logs its deletion marker.
    /// Returns the pre-delete LSN, which [`Tree::abort_delete`] needs, or
    /// `None` when the key is absent or already deleted.
    pub fn delete(&self, key: &[u8]) -> Result<Option<Lsn>> {
        self.env.locks().lock_record(key)?;
        let outcome = self.run_on_bin(key, false, |bin| self.bin_delete(bin, key));
        self.env.locks().release_record(key);
        outcome
    }

    /// Resolves a pending delete as committed: the slot's LSN goes null and
    /// the state becomes known-deleted (the one state allowed a null LSN).
    /// `prior` is the LSN [`Tree::delete`] returned; its record and the
    /// deletion marker both become reclaimable.
    pub fn commit_delete(&self, key: &[u8], prior: Lsn) -> Result<bool> {
        self.run_on_bin(key, false, |bin| self.bin_resolve_delete(bin, key, prior, true))
    }

    /// Resolves a pending delete as aborted: restores `prior` and clears the
    /// pending state.
    pub fn abort_delete(&self, key: &[u8], prior: Lsn) -> Result<bool> {
        self.run_on_bin(key, false, |bin| self.bin_resolve_delete(bin, key, prior, false))
    }

    /// One forced eviction pass. Returns bytes freed; zero when usage is
    /// already under budget.
    pub fn evict(&self) -> Result<usize> {
        self.evictor.run(&self.env)
    }

    fn maybe_evict(&self) -> Result<()> {
        if self.env.budget().is_over() {
            self.evictor.run(&self.env)?;
        }
        Ok(())
    }

    /// Descends to the responsible BIN and runs `op` under its exclusive
    /// latch, restarting the descent when the op reports the node changed
    /// shape underneath it.
    fn run_on_bin<T>(
        &self,
        key: &[u8],
        for_insert: bool,
        op: impl Fn(&Arc<Node>) -> Result<BinOp<T>>,
    ) -> Result<T> {
        for _ in 0..MAX_RESTARTS {
            let bin = match self.try_descend(key, for_insert)? {
                Descent::Bin(bin) => bin,
                Descent::Restart => continue,
            };
            let result = op(&bin);
            bin.latch().release();
            match result? {
                BinOp::Done(value) => return Ok(value),
                BinOp::Retry => continue,
            }
        }
        Err(self.env.fatal("descent did not stabilize"))
    }

    fn try_descend(&self, key: &[u8], for_insert: bool) -> Result<Descent> {
        let env = &self.env;
        env.check_open()?;

        let root = self.root();
        root.latch().acquire_exclusive();
        if !Arc::ptr_eq(&root, &self.root.read()) {
            // Lost a race with a root split.
            root.latch().release();
            return Ok(Descent::Restart);
        }
        root.mark_visited();

        if for_insert && is_full_in(&root) {
            let result = split::split_root(env, self, &root);
            root.latch().release();
            result?;
            return Ok(Descent::Restart);
        }

        let mut node = root;
        loop {
            if node.body().kind().is_bottom() {
                return Ok(Descent::Bin(node));
            }
            match self.step_down(&node, key, for_insert) {
                Ok(Fetch::Child(child, _)) => {
                    node.latch().release();
                    node = child;
                }
                Ok(Fetch::Restart) => {
                    node.latch().release();
                    return Ok(Descent::Restart);
                }
                Err(err) => {
                    node.latch().release();
                    return Err(err);
                }
            }
        }
    }

    /// One routing step: pick the child slot, fault the child in, and split
    /// it first if the insert path found it full.
    fn step_down(&self, parent: &Arc<Node>, key: &[u8], for_insert: bool) -> Result<Fetch> {
        let env = &self.env;
        let in_ = parent.body().as_in()?;
        if in_.n_entries() == 0 {
            return Err(env.fatal("empty internal node during descent"));
        }
        let Some(found) = in_.find_entry(key, false, env.config()) else {
            return Err(env.fatal("routing search fell below an internal node"));
        };

        let (child, slot) = match self.fetch_child(parent, found.index)? {
            Fetch::Child(child, slot) => (child, slot),
            Fetch::Restart => return Ok(Fetch::Restart),
        };
        child.mark_visited();

        if for_insert && is_full_in(&child) {
            if is_full_in(parent) {
                // The parent filled up during a fetch window; the next
                // descent splits it before reaching this child.
                child.latch().release();
                return Ok(Fetch::Restart);
            }
            let mode = pick_split_mode(&child, key, env)?;
            let result = split::split_child(env, parent, slot, &child, mode);
            child.latch().release();
            result?;
            // Both halves are cached under the parent now; re-route.
            return Ok(Fetch::Restart);
        }
        Ok(Fetch::Child(child, slot))
    }

    /// Returns the child of `parent` at `idx`, exclusively latched. A miss
    /// releases the parent latch around the log read and revalidates the
    /// slot afterwards; a slot that changed beyond re-matching restarts the
    /// whole descent.
    fn fetch_child(&self, parent: &Arc<Node>, idx: usize) -> Result<Fetch> {
        let env = &self.env;
        let config = env.config();

        let in_ = parent.body().as_in()?;
        if let Some(child) = in_.child(idx) {
            let child = Arc::clone(child);
            child.latch().acquire_exclusive();
            return Ok(Fetch::Child(child, idx));
        }
        let lsn = in_.entry_lsn(idx);
        let key = in_.key(idx);
        if lsn.is_null() {
            if state::is_deleted(in_.entry_state(idx)) {
                return Err(env.fatal("descent through a deleted slot"));
            }
            return Err(env.fatal("fetch through a null LSN on a live slot"));
        }

        parent.pin();
        parent.latch().release();
        let read = env.log().read(lsn);
        parent.latch().acquire_exclusive();
        parent.unpin();

        let bytes = match read {
            Ok(bytes) => bytes,
            Err(err) => {
                // A cleaner may legally delete a file once its live records
                // are superseded; tolerable only when the slot went deleted
                // during the unlatched window.
                if err.downcast_ref::<crate::log::LogFileMissing>().is_some() {
                    let in_ = parent.body().as_in()?;
                    let deleted_now = match in_.find_entry(&key, true, config) {
                        Some(m) if m.exact => state::is_deleted(in_.entry_state(m.index)),
                        _ => false,
                    };
                    if deleted_now {
                        trace!(%lsn, "log file gone under a deleted slot, restarting");
                        return Ok(Fetch::Restart);
                    }
                }
                return Err(env.invalidate(err.wrap_err(format!("fetching child at {lsn}"))));
            }
        };
        let body = match codec::decode_node(&bytes)? {
            DecodedNode::In(mut fetched) => {
                fetched.last_full_lsn = lsn;
                NodeBody::In(fetched)
            }
            DecodedNode::Delta(mut fetched) => {
                fetched.last_delta_lsn = lsn;
                NodeBody::Delta(fetched)
            }
            DecodedNode::Ln(fetched) => NodeBody::Ln(fetched),
        };

        // Revalidate after the unlatched window.
        let in_ = parent.body().as_in()?;
        let same_slot = idx < in_.n_entries()
            && in_.entry_lsn(idx) == lsn
            && config.compare(&in_.key(idx), &key) == Ordering::Equal;
        let slot = if same_slot {
            Some(idx)
        } else {
            match in_.find_entry(&key, true, config) {
                Some(m) if m.exact && in_.entry_lsn(m.index) == lsn => Some(m.index),
                _ => None,
            }
        };
        let Some(slot) = slot else {
            trace!(%lsn, "fetched child went stale, restarting");
            return Ok(Fetch::Restart);
        };
        // Another descent may have attached the child during the window.
        if let Some(existing) = in_.child(slot) {
            let existing = Arc::clone(existing);
            existing.latch().acquire_exclusive();
            return Ok(Fetch::Child(existing, slot));
        }

        let level = parent.level().saturating_sub(1);
        let size = body.memory_size();
        let node = Node::new(env.next_node_id(), level, body);
        node.latch().acquire_exclusive();
        let parent_in = parent.body_mut().as_in_mut()?;
        parent_in.attach_child(slot, Arc::clone(&node));
        if level > 0 {
            env.in_list().insert(Arc::clone(&node));
        }
        env.budget().add(size);
        Ok(Fetch::Child(node, slot))
    }

    /// Replaces a delta body with the merged full BIN, in place, under the
    /// exclusive latch the caller already holds.
    fn materialize(&self, bin: &Arc<Node>) -> Result<()> {
        let merged = match bin.body() {
            NodeBody::Delta(delta) => delta.materialize(&self.env)?,
            _ => return Ok(()),
        };
        let old_size = bin.body().memory_size();
        *bin.body_mut() = NodeBody::In(merged);
        self.env.budget().sub(old_size);
        self.env.budget().add(bin.body().memory_size());
        trace!(node = bin.id(), "materialized bottom delta");
        Ok(())
    }

    fn bin_insert(&self, bin: &Arc<Node>, key: &[u8], value: &[u8]) -> Result<BinOp<InsertOutcome>> {
        let env = &self.env;
        let config = env.config();

        if matches!(bin.body(), NodeBody::Delta(_)) {
            if let Some(outcome) = self.delta_insert(bin, key, value)? {
                return Ok(BinOp::Done(outcome));
            }
            // Fell through: the delta was materialized below.
        }

        let in_ = bin.body_mut().as_in_mut()?;
        match in_.find_entry(key, true, config) {
            Some(m) if m.exact => {
                let s = in_.entry_state(m.index);
                if !state::is_deleted(s) {
                    return Ok(BinOp::Done(InsertOutcome::AlreadyExists));
                }
                let mut ln = Ln::new(value.to_vec());
                ln.set_last_logged_size(in_.logged_size(m.index));
                let prev = in_.entry_lsn(m.index);
                let logged = obsolete::log_ln(env, &mut ln, prev, false)?;
                env.locks().lock_lsn(logged.lsn)?;
                // The reused slot takes the caller's key bytes; a custom
                // comparator may equate distinct byte strings.
                in_.update_entry_key(m.index, key, logged.lsn, logged.size);
                in_.update_entry_state(
                    m.index,
                    0,
                    state::KNOWN_DELETED | state::PENDING_DELETED,
                );
                attach_leaf(env, in_, m.index, ln);
                Ok(BinOp::Done(InsertOutcome::ReusedDeletedSlot))
            }
            _ => {
                if in_.is_full() {
                    // A merged delta inflated this BIN past its capacity;
                    // the next descent splits it before retrying.
                    return Ok(BinOp::Retry);
                }
                let mut ln = Ln::new(value.to_vec());
                let logged = obsolete::log_ln(env, &mut ln, Lsn::NULL, false)?;
                env.locks().lock_lsn(logged.lsn)?;
                let idx = match in_.insert_entry(key, logged.lsn, 0, config) {
                    Ok(crate::node::InsertSlot::Inserted(idx)) => idx,
                    Ok(crate::node::InsertSlot::Duplicate(_)) => {
                        return Err(env.fatal("duplicate slot appeared during insert"));
                    }
                    Err(fault) => return Err(env.invalidate(fault)),
                };
                in_.update_entry_lsn(idx, logged.lsn, logged.size);
                attach_leaf(env, in_, idx, ln);
                Ok(BinOp::Done(InsertOutcome::Inserted))
            }
        }
    }

    /// Insert against a delta body without materializing, when provably
    /// safe. `None` means the delta was materialized and the caller should
    /// run the full-BIN path.
    fn delta_insert(&self, bin: &Arc<Node>, key: &[u8], value: &[u8]) -> Result<Option<InsertOutcome>> {
        let env = &self.env;
        let config = env.config();

        #[derive(Clone, Copy)]
        enum Plan {
            /// Deleted slot in the delta; carries its marker LSN.
            Reuse(Lsn),
            Fresh,
            Exists,
            Materialize,
        }
        let plan = {
            let NodeBody::Delta(delta) = bin.body() else {
                return Ok(None);
            };
            match delta.find(key, config) {
                Some(slot) if state::is_deleted(delta.slot_state(slot)) => {
                    Plan::Reuse(delta.slot_lsn(slot))
                }
                Some(_) => Plan::Exists,
                None if delta.can_blind_insert(key, config) => Plan::Fresh,
                None => Plan::Materialize,
            }
        };
        match plan {
            Plan::Exists => Ok(Some(InsertOutcome::AlreadyExists)),
            Plan::Materialize => {
                self.materialize(bin)?;
                Ok(None)
            }
            Plan::Reuse(_) | Plan::Fresh => {
                let prev = match plan {
                    Plan::Reuse(marker) => marker,
                    _ => Lsn::NULL,
                };
                let mut ln = Ln::new(value.to_vec());
                let logged = obsolete::log_ln(env, &mut ln, prev, false)?;
                env.locks().lock_lsn(logged.lsn)?;
                let NodeBody::Delta(delta) = bin.body_mut() else {
                    return Err(env.fatal("delta body changed during blind insert"));
                };
                match delta.blind_insert(key, logged.lsn, config) {
                    BlindOutcome::Applied(_) => Ok(Some(if matches!(plan, Plan::Reuse(_)) {
                        InsertOutcome::ReusedDeletedSlot
                    } else {
                        InsertOutcome::Inserted
                    })),
                    BlindOutcome::MustMaterialize => {
                        Err(env.fatal("blind insert refused after being admitted"))
                    }
                }
            }
        }
    }

    fn bin_get(&self, bin: &Arc<Node>, key: &[u8]) -> Result<BinOp<Option<Vec<u8>>>> {
        let env = &self.env;
        let config = env.config();

        if let NodeBody::Delta(delta) = bin.body() {
            match delta.find(key, config) {
                Some(slot) => {
                    if state::is_deleted(delta.slot_state(slot)) {
                        return Ok(BinOp::Done(None));
                    }
                    let lsn = delta.slot_lsn(slot);
                    return Ok(BinOp::Done(Some(self.read_leaf_payload(lsn)?)));
                }
                None => {
                    if delta.proves_absent(key) {
                        return Ok(BinOp::Done(None));
                    }
                    self.materialize(bin)?;
                }
            }
        }

        let in_ = bin.body().as_in()?;
        let Some(m) = in_.find_entry(key, true, config) else {
            return Ok(BinOp::Done(None));
        };
        if !m.exact || state::is_deleted(in_.entry_state(m.index)) {
            return Ok(BinOp::Done(None));
        }

        if let Some(child) = in_.child(m.index) {
            let child = Arc::clone(child);
            child.latch().acquire_shared();
            let data = child.body().as_ln().map(|ln| ln.data().map(<[u8]>::to_vec));
            child.latch().release();
            child.mark_visited();
            return match data? {
                Some(data) => Ok(BinOp::Done(Some(data))),
                None => Err(env.fatal("cached deletion marker on a live slot")),
            };
        }

        match self.fetch_child(bin, m.index)? {
            Fetch::Restart => Ok(BinOp::Retry),
            Fetch::Child(leaf, _) => {
                let data = leaf.body().as_ln().map(|ln| ln.data().map(<[u8]>::to_vec));
                leaf.latch().release();
                match data? {
                    Some(data) => Ok(BinOp::Done(Some(data))),
                    None => Err(env.fatal("deletion marker on a live slot")),
                }
            }
        }
    }

    /// Reads an LN payload straight from the log without attaching it.
    fn read_leaf_payload(&self, lsn: Lsn) -> Result<Vec<u8>> {
        let env = &self.env;
        let bytes = match env.log().read(lsn) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(env.invalidate(err.wrap_err(format!("fetching record at {lsn}"))))
            }
        };
        match codec::decode_node(&bytes)? {
            DecodedNode::Ln(ln) => match ln.data() {
                Some(data) => Ok(data.to_vec()),
                None => Err(env.fatal("deletion marker on a live slot")),
            },
            other => Err(env.fatal(format!(
                "expected a leaf record at {lsn}, found {:?}",
                other.kind()
            ))),
        }
    }

    fn bin_update(&self, bin: &Arc<Node>, key: &[u8], value: &[u8]) -> Result<BinOp<bool>> {
        let env = &self.env;
        let config = env.config();

        if let NodeBody::Delta(delta) = bin.body() {
            match delta.find(key, config) {
                Some(slot) if state::is_deleted(delta.slot_state(slot)) => {
                    return Ok(BinOp::Done(false));
                }
                Some(_) => {}
                None if delta.proves_absent(key) => return Ok(BinOp::Done(false)),
                None => {}
            }
            self.materialize(bin)?;
        }

        let in_ = bin.body_mut().as_in_mut()?;
        let Some(m) = in_.find_entry(key, true, config) else {
            return Ok(BinOp::Done(false));
        };
        if !m.exact || state::is_deleted(in_.entry_state(m.index)) {
            return Ok(BinOp::Done(false));
        }

        let mut ln = Ln::new(value.to_vec());
        ln.set_last_logged_size(in_.logged_size(m.index));
        let prev = in_.entry_lsn(m.index);
        let logged = obsolete::log_ln(env, &mut ln, prev, false)?;
        env.locks().lock_lsn(logged.lsn)?;
        in_.update_entry_lsn(m.index, logged.lsn, logged.size);
        attach_leaf(env, in_, m.index, ln);
        Ok(BinOp::Done(true))
    }

    fn bin_delete(&self, bin: &Arc<Node>, key: &[u8]) -> Result<BinOp<Option<Lsn>>> {
        let env = &self.env;
        let config = env.config();
        self.materialize(bin)?;

        let in_ = bin.body_mut().as_in_mut()?;
        let Some(m) = in_.find_entry(key, true, config) else {
            return Ok(BinOp::Done(None));
        };
        if !m.exact || state::is_deleted(in_.entry_state(m.index)) {
            return Ok(BinOp::Done(None));
        }

        let prior = in_.entry_lsn(m.index);
        let mut marker = Ln::new_deleted();
        // The prior record stays live until the delete commits.
        let logged = obsolete::log_ln(env, &mut marker, Lsn::NULL, false)?;
        env.locks().lock_lsn(logged.lsn)?;
        in_.update_entry(m.index, logged.lsn, logged.size, state::PENDING_DELETED, 0);
        attach_leaf(env, in_, m.index, marker);
        Ok(BinOp::Done(Some(prior)))
    }

    fn bin_resolve_delete(
        &self,
        bin: &Arc<Node>,
        key: &[u8],
        prior: Lsn,
        commit: bool,
    ) -> Result<BinOp<bool>> {
        let env = &self.env;
        let config = env.config();
        self.materialize(bin)?;

        let in_ = bin.body_mut().as_in_mut()?;
        let Some(m) = in_.find_entry(key, true, config) else {
            return Ok(BinOp::Done(false));
        };
        if !m.exact || !state::is_pending_deleted(in_.entry_state(m.index)) {
            return Ok(BinOp::Done(false));
        }

        let marker = in_.entry_lsn(m.index);
        let marker_size = in_.logged_size(m.index);
        if commit {
            env.log().count_obsolete(prior, 0);
            env.log().count_obsolete(marker, marker_size);
            in_.update_entry(
                m.index,
                Lsn::NULL,
                0,
                state::KNOWN_DELETED,
                state::PENDING_DELETED,
            );
            detach_leaf(env, in_, m.index);
        } else {
            env.log().count_obsolete(marker, marker_size);
            in_.update_entry(m.index, prior, 0, 0, state::PENDING_DELETED);
            detach_leaf(env, in_, m.index);
        }
        Ok(BinOp::Done(true))
    }
}

fn is_full_in(node: &Node) -> bool {
    match node.body() {
        NodeBody::In(in_) => in_.is_full(),
        _ => false,
    }
}

/// Split point heuristic: appending workloads split at the edges so the
/// nearly-full half keeps filling.
fn pick_split_mode(child: &Node, key: &[u8], env: &Env) -> Result<SplitMode> {
    let config = env.config();
    let in_ = child.body().as_in()?;
    let n = in_.n_entries();
    if n < 2 {
        return Ok(SplitMode::Mid);
    }
    Ok(if config.compare(key, &in_.key(n - 1)) == Ordering::Greater {
        SplitMode::ForceRight
    } else if config.compare(key, &in_.key(0)) == Ordering::Less {
        SplitMode::ForceLeft
    } else {
        SplitMode::Mid
    })
}

/// Caches a just-logged leaf under its slot, displacing any prior version.
fn attach_leaf(env: &Env, in_: &mut In, idx: usize, ln: Ln) {
    detach_leaf(env, in_, idx);
    let body = NodeBody::Ln(ln);
    let size = body.memory_size();
    let node = Node::new(env.next_node_id(), 0, body);
    node.mark_visited();
    in_.attach_child(idx, node);
    env.budget().add(size);
}

/// Drops the cached leaf under a slot, returning its bytes to the budget.
/// Leaves are only latched under their latched parent, so this cannot wait
/// on anything but a reader about to release.
fn detach_leaf(env: &Env, in_: &mut In, idx: usize) {
    if let Some(old) = in_.detach_child(idx) {
        old.latch().acquire_exclusive();
        let size = old.memory_size();
        old.latch().release();
        env.budget().sub(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::log::{MemLog, NullLockManager};

    fn small_tree(bin_max: usize, in_max: usize) -> (Tree, Arc<MemLog>) {
        let log = Arc::new(MemLog::new(1 << 20));
        let env = Env::new(
            EngineConfig {
                bin_max_entries: bin_max,
                in_max_entries: in_max,
                ..Default::default()
            },
            Arc::clone(&log) as _,
            Arc::new(NullLockManager),
        );
        (Tree::new(env), log)
    }

    #[test]
    fn insert_then_get() {
        let (tree, _log) = small_tree(128, 128);
        assert_eq!(tree.insert(b"alpha", b"one").unwrap(), InsertOutcome::Inserted);
        assert_eq!(tree.get(b"alpha").unwrap(), Some(b"one".to_vec()));
        assert_eq!(tree.get(b"beta").unwrap(), None);
    }

    #[test]
    fn duplicate_insert_leaves_the_record_alone() {
        let (tree, _log) = small_tree(128, 128);
        tree.insert(b"k", b"first").unwrap();
        assert_eq!(
            tree.insert(b"k", b"second").unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(tree.get(b"k").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn update_overwrites_live_records_only() {
        let (tree, _log) = small_tree(128, 128);
        tree.insert(b"k", b"v1").unwrap();
        assert!(tree.update(b"k", b"v2").unwrap());
        assert_eq!(tree.get(b"k").unwrap(), Some(b"v2".to_vec()));
        assert!(!tree.update(b"missing", b"x").unwrap());
    }

    #[test]
    fn delete_commit_cycle() {
        let (tree, _log) = small_tree(128, 128);
        tree.insert(b"k", b"v").unwrap();

        let prior = tree.delete(b"k").unwrap().expect("record was live");
        assert_eq!(tree.get(b"k").unwrap(), None, "pending delete hides the record");
        assert_eq!(tree.delete(b"k").unwrap(), None, "double delete is a no-op");

        assert!(tree.commit_delete(b"k", prior).unwrap());
        assert_eq!(tree.get(b"k").unwrap(), None);
        assert!(
            !tree.commit_delete(b"k", prior).unwrap(),
            "already resolved"
        );
    }

    #[test]
    fn delete_abort_restores_the_record() {
        let (tree, _log) = small_tree(128, 128);
        tree.insert(b"k", b"kept").unwrap();
        let prior = tree.delete(b"k").unwrap().unwrap();
        assert!(tree.abort_delete(b"k", prior).unwrap());
        assert_eq!(tree.get(b"k").unwrap(), Some(b"kept".to_vec()));
    }

    #[test]
    fn deleted_slot_is_reused_by_insert() {
        let (tree, _log) = small_tree(128, 128);
        tree.insert(b"k", b"old").unwrap();
        let prior = tree.delete(b"k").unwrap().unwrap();
        tree.commit_delete(b"k", prior).unwrap();

        assert_eq!(
            tree.insert(b"k", b"new").unwrap(),
            InsertOutcome::ReusedDeletedSlot
        );
        assert_eq!(tree.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn root_split_grows_the_tree() {
        let (tree, _log) = small_tree(4, 4);
        assert_eq!(tree.root().level(), 1);
        for i in 0..16u32 {
            let key = format!("key-{i:03}");
            tree.insert(key.as_bytes(), &i.to_be_bytes()).unwrap();
        }
        assert!(tree.root().level() >= 2, "root should have split");
        for i in 0..16u32 {
            let key = format!("key-{i:03}");
            assert_eq!(
                tree.get(key.as_bytes()).unwrap(),
                Some(i.to_be_bytes().to_vec()),
                "{key} lost after splits"
            );
        }
    }

    #[test]
    fn descending_inserts_split_at_the_left_edge() {
        let (tree, _log) = small_tree(4, 8);
        for i in (0..24u32).rev() {
            let key = format!("key-{i:03}");
            tree.insert(key.as_bytes(), &i.to_be_bytes()).unwrap();
        }
        for i in 0..24u32 {
            let key = format!("key-{i:03}");
            assert!(tree.get(key.as_bytes()).unwrap().is_some(), "{key} lost");
        }
    }

    #[test]
    fn operations_fail_after_invalidation() {
        let (tree, log) = small_tree(128, 128);
        tree.insert(b"a", b"1").unwrap();
        log.fail_next_append();
        assert!(tree.insert(b"b", b"2").unwrap_err().to_string().contains("invalidated"));
        assert!(tree.insert(b"c", b"3").is_err(), "environment stays poisoned");
    }
}
