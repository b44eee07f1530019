//! # Split Engine
//!
//! Splits run preemptively: the descent splits any full child while it still
//! holds the parent exclusively, so by the time an insertion reaches a BIN
//! its parent is guaranteed to have room for a new boundary entry. A full
//! root is split before descent begins, growing the tree one level.
//!
//! ## Which Half Moves
//!
//! The half that does not contain the node's identifier key moves to the new
//! sibling; the original node object keeps its identity, latch and parent
//! slot. When the sibling takes the lower half, the parent's existing
//! boundary key still bounds it, so the existing slot is repointed at the
//! sibling and a new entry is inserted for the retained upper half.
//!
//! ## Durability Order
//!
//! Both halves are logged provisionally, then the parent non-provisionally.
//! Recovery replays the halves only through the parent record, so a crash
//! between the writes leaves the old tree intact. Superseded LSNs from the
//! provisional writes ride on the parent's deferred list and are counted
//! when the parent record lands. There is no mid-split abort: any failure in
//! this sequence invalidates the environment.

use std::sync::Arc;

use eyre::Result;
use tracing::debug;

use crate::env::Env;
use crate::log::obsolete;
use crate::node::{In, InsertSlot, Node, NodeBody, NodeKind};
use crate::tree::Tree;

/// Split point selection. `Mid` balances; the forced modes leave one entry
/// on one side, for workloads appending at either edge of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    Mid,
    ForceLeft,
    ForceRight,
}

fn split_index(n: usize, mode: SplitMode) -> usize {
    match mode {
        SplitMode::Mid => n / 2,
        SplitMode::ForceLeft => 1,
        SplitMode::ForceRight => n - 1,
    }
}

/// Splits `child` (slot `idx` of `parent`). Caller holds exclusive latches
/// on both; `child` is attached at `idx`. On return both halves are cached
/// under the parent and all latches besides the caller's two are released.
pub(crate) fn split_child(
    env: &Env,
    parent: &Arc<Node>,
    idx: usize,
    child: &Arc<Node>,
    mode: SplitMode,
) -> Result<()> {
    let config = env.config();
    let child_in = child.body_mut().as_in_mut()?;
    let n = child_in.n_entries();
    let (sibling_in, sibling_is_upper) = child_in
        .split_entries(split_index(n, mode), config)
        .map_err(|fault| env.invalidate(fault))?;

    // Children first, provisionally.
    let logged_child = obsolete::log_in(env, child_in, true)?;
    let child_low_key = child_in.key(0);

    let sibling = Node::new(env.next_node_id(), child.level(), NodeBody::In(sibling_in));
    sibling.latch().acquire_exclusive();
    let outcome: Result<usize> = (|| {
        let sibling_in = sibling.body_mut().as_in_mut()?;
        let logged_sibling = obsolete::log_in(env, sibling_in, true)?;
        let sibling_low_key = sibling_in.key(0);
        let mut deferred = logged_child.deferred_obsolete;
        deferred.extend(logged_sibling.deferred_obsolete);

        let parent_in = parent.body_mut().as_in_mut()?;
        debug_assert!(parent_in
            .child(idx)
            .is_some_and(|cached| Arc::ptr_eq(cached, child)));

        let (new_key, new_lsn, new_size, new_child) = if sibling_is_upper {
            // Existing slot keeps the lower half (the original child).
            parent_in.update_entry_lsn(idx, logged_child.lsn, logged_child.size);
            (sibling_low_key, logged_sibling.lsn, logged_sibling.size, Arc::clone(&sibling))
        } else {
            // The sibling took the lower half; the existing boundary key
            // still bounds it, so the slot is repointed.
            parent_in.update_entry_lsn(idx, logged_sibling.lsn, logged_sibling.size);
            parent_in.attach_child(idx, Arc::clone(&sibling));
            (child_low_key, logged_child.lsn, logged_child.size, Arc::clone(child))
        };

        let new_idx = match parent_in.insert_entry(&new_key, new_lsn, 0, config) {
            Ok(InsertSlot::Inserted(new_idx)) => new_idx,
            Ok(InsertSlot::Duplicate(_)) => {
                return Err(env.fatal("split produced a duplicate boundary key"));
            }
            Err(fault) => return Err(env.invalidate(fault)),
        };
        parent_in.update_entry_lsn(new_idx, new_lsn, new_size);
        parent_in.attach_child(new_idx, new_child);
        parent_in.provisional_obsolete.extend(deferred);

        // The parent record commits the split.
        obsolete::log_in(env, parent_in, false)?;
        Ok(sibling.memory_size())
    })();
    sibling.latch().release();
    let sibling_size = outcome?;

    if child.level() > 0 {
        env.in_list().insert(Arc::clone(&sibling));
    }
    env.budget().add(sibling_size);
    debug!(
        parent = parent.id(),
        child = child.id(),
        sibling = sibling.id(),
        level = child.level(),
        upper = sibling_is_upper,
        "split child node"
    );
    Ok(())
}

/// Splits a full root, growing the tree one level. Caller holds the root's
/// exclusive latch; the tree's root pointer is swapped before return.
pub(crate) fn split_root(env: &Env, tree: &Tree, old_root: &Arc<Node>) -> Result<()> {
    let config = env.config();
    let old_in = old_root.body_mut().as_in_mut()?;
    let n = old_in.n_entries();
    let (sibling_in, sibling_is_upper) = old_in
        .split_entries(split_index(n, SplitMode::Mid), config)
        .map_err(|fault| env.invalidate(fault))?;
    old_in.is_root = false;

    let logged_old = obsolete::log_in(env, old_in, true)?;
    let old_low_key = old_in.key(0);

    let sibling = Node::new(env.next_node_id(), old_root.level(), NodeBody::In(sibling_in));
    sibling.latch().acquire_exclusive();
    let built: Result<(In, usize)> = (|| {
        let sibling_in = sibling.body_mut().as_in_mut()?;
        let logged_sibling = obsolete::log_in(env, sibling_in, true)?;
        let sibling_low_key = sibling_in.key(0);

        let (lower, upper) = if sibling_is_upper {
            (
                (old_low_key, logged_old.lsn, logged_old.size, Arc::clone(old_root)),
                (sibling_low_key, logged_sibling.lsn, logged_sibling.size, Arc::clone(&sibling)),
            )
        } else {
            (
                (sibling_low_key, logged_sibling.lsn, logged_sibling.size, Arc::clone(&sibling)),
                (old_low_key, logged_old.lsn, logged_old.size, Arc::clone(old_root)),
            )
        };

        let mut root_in = In::new(NodeKind::Internal, config);
        root_in.is_root = true;
        for (slot, (key, lsn, size, node)) in [lower, upper].into_iter().enumerate() {
            match root_in.insert_entry(&key, lsn, 0, config) {
                Ok(InsertSlot::Inserted(at)) if at == slot => {}
                Ok(_) => return Err(env.fatal("root split boundary keys out of order")),
                Err(fault) => return Err(env.invalidate(fault)),
            }
            root_in.update_entry_lsn(slot, lsn, size);
            root_in.attach_child(slot, node);
        }
        let mut deferred = logged_old.deferred_obsolete;
        deferred.extend(logged_sibling.deferred_obsolete);
        root_in.provisional_obsolete = deferred;

        obsolete::log_in(env, &mut root_in, false)?;
        Ok((root_in, sibling.memory_size()))
    })();
    sibling.latch().release();
    let (root_in, sibling_size) = built?;

    let body = NodeBody::In(root_in);
    let added = body.memory_size() + sibling_size;
    let new_root = Node::new(env.next_node_id(), old_root.level() + 1, body);
    *tree.root.write() = Arc::clone(&new_root);
    env.in_list().insert(Arc::clone(&new_root));
    if old_root.level() > 0 {
        env.in_list().insert(Arc::clone(&sibling));
    }
    env.budget().add(added);
    debug!(
        new_root = new_root.id(),
        level = new_root.level(),
        "root split grew the tree"
    );
    Ok(())
}
