//! # Node Cache
//!
//! Residency bookkeeping for the node tree: [`MemBudget`] tracks bytes used
//! against a fixed limit, [`InList`] is the membership set of resident
//! internal nodes, and [`Evictor`] walks that set to push usage back under
//! the limit.
//!
//! ## Eviction
//!
//! Eviction works through parents. A pass scans the resident internal nodes
//! with a rotating hand and a one-bit second chance: a node touched since
//! the hand last passed is skipped once. A selected parent has its cached
//! children stripped one by one — a dirty child is logged first and the
//! parent slot's LSN updated, so the child can always be re-fetched. Pinned
//! or latched nodes are skipped outright; the pass never blocks on a latch.
//!
//! The budget is advisory at the operation level: mutations never fail for
//! being over budget, the evictor just has more to do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::env::Env;
use crate::log::obsolete;
use crate::node::{Node, NodeBody};

/// Byte budget for resident nodes.
pub struct MemBudget {
    limit: usize,
    used: AtomicUsize,
}

impl MemBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn add(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub(&self, bytes: usize) {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn is_over(&self) -> bool {
        self.used() > self.limit
    }
}

/// Membership set of resident internal nodes, keyed by node id.
pub struct InList {
    nodes: Mutex<HashMap<u64, Arc<Node>>>,
}

impl InList {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, node: Arc<Node>) {
        self.nodes.lock().insert(node.id(), node);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Node>> {
        self.nodes.lock().remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.nodes.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Point-in-time copy for an eviction scan; holds no lock afterwards.
    pub fn snapshot(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().values().cloned().collect()
    }
}

impl Default for InList {
    fn default() -> Self {
        Self::new()
    }
}

/// Clock-style eviction over the resident internal nodes.
pub struct Evictor {
    hand: AtomicUsize,
}

impl Evictor {
    pub fn new() -> Self {
        Self {
            hand: AtomicUsize::new(0),
        }
    }

    /// One eviction pass: strips cached children from unvisited, unlatched
    /// parents until usage is back under the limit or every candidate has
    /// been considered. Returns bytes freed.
    pub fn run(&self, env: &Env) -> Result<usize> {
        if !env.budget().is_over() {
            return Ok(0);
        }
        let mut candidates = env.in_list().snapshot();
        if candidates.is_empty() {
            return Ok(0);
        }
        candidates.sort_by_key(|node| node.id());
        let start = self.hand.load(Ordering::Relaxed) % candidates.len();

        let mut freed = 0;
        let mut scanned = 0;
        for step in 0..candidates.len() {
            if !env.budget().is_over() {
                break;
            }
            scanned = step + 1;
            let parent = &candidates[(start + step) % candidates.len()];
            if parent.is_pinned() || parent.take_visited() {
                continue;
            }
            if !parent.latch().try_acquire_exclusive() {
                continue;
            }
            let result = strip_children(env, parent);
            parent.latch().release();
            freed += result?;
        }
        self.hand.fetch_add(scanned, Ordering::Relaxed);

        if freed > 0 {
            env.budget().sub(freed);
            debug!(
                freed,
                used = env.budget().used(),
                limit = env.budget().limit(),
                "eviction pass"
            );
        }
        Ok(freed)
    }
}

impl Default for Evictor {
    fn default() -> Self {
        Self::new()
    }
}

/// Detaches every evictable cached child of `parent`, logging dirty ones
/// first. Caller holds the parent's exclusive latch.
fn strip_children(env: &Env, parent: &Arc<Node>) -> Result<usize> {
    let NodeBody::In(parent_in) = parent.body_mut() else {
        return Ok(0);
    };

    let mut freed = 0;
    for idx in 0..parent_in.n_entries() {
        let Some(child) = parent_in.child(idx).cloned() else {
            continue;
        };
        if child.is_pinned() || child.take_visited() {
            continue;
        }
        if !child.latch().try_acquire_exclusive() {
            continue;
        }

        let result = evict_one(env, parent_in, idx, &child);
        child.latch().release();
        match result? {
            0 => continue,
            bytes => {
                parent_in.detach_child(idx);
                env.in_list().remove(child.id());
                trace!(child = child.id(), bytes, "evicted child node");
                freed += bytes;
            }
        }
    }
    Ok(freed)
}

/// Makes one child safe to drop. Returns its memory size, or zero to skip.
/// Caller holds exclusive latches on both the parent and the child.
fn evict_one(
    env: &Env,
    parent_in: &mut crate::node::In,
    idx: usize,
    child: &Arc<Node>,
) -> Result<usize> {
    let size = child.memory_size();
    match child.body_mut() {
        // A leaf's record is logged at mutation time; the slot LSN is
        // always current, so the reference can simply drop.
        NodeBody::Ln(_) => Ok(size),
        NodeBody::In(child_in) => {
            // An internal child with its own cached children waits for its
            // turn as a parent.
            if child_in.children.any_cached() {
                return Ok(0);
            }
            if child_in.is_dirty() {
                let logged = obsolete::log_in(env, child_in, false)?;
                parent_in.update_entry_lsn(idx, logged.lsn, logged.size);
            } else {
                // A clean child may have logged itself since the slot was
                // last written (it was the parent of a split); the slot must
                // reference its latest image before the reference drops.
                let latest = if child_in.last_delta_lsn().is_null() {
                    child_in.last_full_lsn()
                } else {
                    child_in.last_delta_lsn()
                };
                if !latest.is_null() && parent_in.entry_lsn(idx) != latest {
                    parent_in.update_entry_lsn(idx, latest, 0);
                }
            }
            Ok(size)
        }
        NodeBody::Delta(delta) => {
            if delta.is_dirty() {
                let logged = obsolete::log_delta(env, delta, false)?;
                parent_in.update_entry_lsn(idx, logged.lsn, logged.size);
            } else if parent_in.entry_lsn(idx) != delta.last_delta_lsn
                && !delta.last_delta_lsn.is_null()
            {
                parent_in.update_entry_lsn(idx, delta.last_delta_lsn, 0);
            }
            Ok(size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::log::{MemLog, NullLockManager};
    use crate::lsn::Lsn;
    use crate::node::{In, Ln, NodeKind};

    #[test]
    fn budget_arithmetic_saturates() {
        let budget = MemBudget::new(100);
        budget.add(60);
        assert!(!budget.is_over());
        budget.add(60);
        assert!(budget.is_over());
        budget.sub(200);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn in_list_membership() {
        let list = InList::new();
        let node = Node::new(7, 0, NodeBody::Ln(Ln::new(b"x".to_vec())));
        list.insert(Arc::clone(&node));
        assert!(list.contains(7));
        assert_eq!(list.snapshot().len(), 1);
        assert!(list.remove(7).is_some());
        assert!(list.is_empty());
    }

    fn tiny_env() -> (Arc<Env>, Arc<MemLog>) {
        let log = Arc::new(MemLog::new(1 << 20));
        let env = Env::new(
            EngineConfig {
                cache_budget: 1,
                ..Default::default()
            },
            Arc::clone(&log) as _,
            Arc::new(NullLockManager),
        );
        (env, log)
    }

    /// Parent BIN with `n` leaf children attached and registered.
    fn parent_with_leaves(env: &Env, n: usize) -> Arc<Node> {
        let mut bin = In::new(NodeKind::Bottom, env.config());
        let parent = Node::new(env.next_node_id(), 1, NodeBody::In(In::new(NodeKind::Bottom, env.config())));
        parent.latch().acquire_exclusive();
        for i in 0..n {
            let key = format!("key-{i:02}");
            bin.insert_entry(key.as_bytes(), Lsn::new(0, i as u32), 0, env.config())
                .unwrap();
        }
        for i in 0..n {
            let leaf = Node::new(
                env.next_node_id(),
                0,
                NodeBody::Ln(Ln::new(vec![0u8; 64])),
            );
            leaf.latch().acquire_shared();
            env.budget().add(leaf.memory_size());
            leaf.latch().release();
            bin.attach_child(i, leaf);
        }
        *parent.body_mut() = NodeBody::In(bin);
        env.budget().add(parent.memory_size());
        parent.latch().release();
        env.in_list().insert(Arc::clone(&parent));
        parent
    }

    #[test]
    fn eviction_strips_leaf_children() {
        let (env, _log) = tiny_env();
        let parent = parent_with_leaves(&env, 8);

        let freed = Evictor::new().run(&env).unwrap();
        assert!(freed > 0);
        parent.latch().acquire_shared();
        let NodeBody::In(in_) = parent.body() else {
            panic!("parent body changed kind");
        };
        assert!(!in_.children.any_cached());
        parent.latch().release();
    }

    #[test]
    fn visited_nodes_get_a_second_chance() {
        let (env, _log) = tiny_env();
        let parent = parent_with_leaves(&env, 4);
        parent.mark_visited();

        let freed = Evictor::new().run(&env).unwrap();
        assert_eq!(freed, 0, "first pass only clears the visited bit");
        let freed = Evictor::new().run(&env).unwrap();
        assert!(freed > 0, "second pass evicts");
    }

    #[test]
    fn pinned_children_are_skipped() {
        let (env, _log) = tiny_env();
        let parent = parent_with_leaves(&env, 2);
        parent.latch().acquire_shared();
        let NodeBody::In(in_) = parent.body() else {
            panic!("parent body changed kind");
        };
        let pinned = Arc::clone(in_.child(0).unwrap());
        parent.latch().release();
        pinned.pin();

        Evictor::new().run(&env).unwrap();
        parent.latch().acquire_shared();
        let NodeBody::In(in_) = parent.body() else {
            panic!("parent body changed kind");
        };
        assert!(in_.child(0).is_some(), "pinned child survives");
        assert!(in_.child(1).is_none(), "unpinned sibling is stripped");
        parent.latch().release();
        pinned.unpin();
    }

    #[test]
    fn dirty_internal_child_is_logged_before_dropping() {
        let (env, log) = tiny_env();
        // Occupy offset zero so the logged image gets a distinct LSN.
        use crate::log::LogManager;
        log.append(b"filler", false).unwrap();
        let parent = Node::new(
            env.next_node_id(),
            2,
            NodeBody::In(In::new(NodeKind::Internal, env.config())),
        );
        let child = Node::new(
            env.next_node_id(),
            1,
            NodeBody::In(In::new(NodeKind::Bottom, env.config())),
        );

        parent.latch().acquire_exclusive();
        child.latch().acquire_exclusive();
        {
            let NodeBody::In(parent_in) = parent.body_mut() else {
                panic!("parent body changed kind");
            };
            parent_in
                .insert_entry(b"m", Lsn::new(0, 0), 0, env.config())
                .unwrap();
            parent_in.attach_child(0, Arc::clone(&child));
            let NodeBody::In(child_in) = child.body_mut() else {
                panic!("child body changed kind");
            };
            child_in
                .insert_entry(b"m", Lsn::new(0, 5), 0, env.config())
                .unwrap();
            assert!(child_in.is_dirty());
        }
        child.latch().release();
        parent.latch().release();
        env.in_list().insert(Arc::clone(&parent));
        env.in_list().insert(Arc::clone(&child));
        env.budget().add(1 << 20);

        Evictor::new().run(&env).unwrap();

        parent.latch().acquire_shared();
        let NodeBody::In(parent_in) = parent.body() else {
            panic!("parent body changed kind");
        };
        assert!(parent_in.child(0).is_none(), "child dropped");
        let slot_lsn = parent_in.entry_lsn(0);
        parent.latch().release();
        assert_ne!(slot_lsn, Lsn::new(0, 0), "slot LSN advanced to the logged image");
        assert!(!env.in_list().contains(child.id()));
        assert!(log.read(slot_lsn).is_ok(), "logged image is readable");
    }
}
