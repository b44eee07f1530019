//! # Diagnostics
//!
//! Read-only introspection over the resident portion of a tree: a statistics
//! walk for operational visibility and an invariant sweep for tests and
//! debugging. Both take shared latches top-down and never fault anything in,
//! so the numbers describe what is cached, not what is logged.

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::entry::state;
use crate::node::{Node, NodeBody};
use crate::tree::Tree;

/// Counters gathered by [`collect_stats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TreeStats {
    /// Resident nodes visited, including leaves.
    pub nodes: usize,
    pub internal_nodes: usize,
    pub delta_nodes: usize,
    pub leaf_nodes: usize,
    /// Entry slots across resident internal nodes.
    pub entries: usize,
    pub deleted_entries: usize,
    /// Height of the tree (the root's level).
    pub levels: u8,
    /// In-memory footprint of the visited nodes.
    pub memory_bytes: usize,
}

/// Walks the resident tree and tallies [`TreeStats`].
pub fn collect_stats(tree: &Tree) -> TreeStats {
    let mut stats = TreeStats::default();
    let root = tree.root();
    stats.levels = root.level();
    walk(&root, &mut |node| {
        stats.nodes += 1;
        stats.memory_bytes += node.memory_size();
        match node.body() {
            NodeBody::In(in_) => {
                stats.internal_nodes += 1;
                stats.entries += in_.n_entries();
                stats.deleted_entries += (0..in_.n_entries())
                    .filter(|&idx| state::is_deleted(in_.entry_state(idx)))
                    .count();
            }
            NodeBody::Delta(delta) => {
                stats.delta_nodes += 1;
                stats.entries += delta.n_slots();
            }
            NodeBody::Ln(_) => stats.leaf_nodes += 1,
        }
        Ok(())
    })
    .ok();
    stats
}

/// Structural invariant sweep over the resident tree: per-node entry
/// invariants plus level consistency between parents and cached children.
pub fn verify_tree(tree: &Tree) -> Result<()> {
    let env = tree.env();
    let root = tree.root();
    walk(&root, &mut |node| {
        match node.body() {
            NodeBody::In(in_) => {
                in_.verify(env.config())?;
                ensure!(
                    in_.kind().is_bottom() == (node.level() == 1),
                    "node {} at level {} has kind {:?}",
                    node.id(),
                    node.level(),
                    in_.kind()
                );
                for idx in 0..in_.n_entries() {
                    if let Some(child) = in_.child(idx) {
                        ensure!(
                            child.level() + 1 == node.level(),
                            "child {} at level {} cached under level-{} node {}",
                            child.id(),
                            child.level(),
                            node.level(),
                            node.id()
                        );
                    }
                }
            }
            NodeBody::Delta(_) => {
                ensure!(
                    node.level() == 1,
                    "delta body on node {} at level {}",
                    node.id(),
                    node.level()
                );
            }
            NodeBody::Ln(_) => {
                ensure!(
                    node.level() == 0,
                    "leaf body on node {} at level {}",
                    node.id(),
                    node.level()
                );
            }
        }
        Ok(())
    })
}

/// Depth-first walk over cached children, shared latches, top-down coupling.
fn walk(node: &Arc<Node>, visit: &mut impl FnMut(&Arc<Node>) -> Result<()>) -> Result<()> {
    node.latch().acquire_shared();
    let result = (|| {
        visit(node)?;
        let children: Vec<Arc<Node>> = match node.body() {
            NodeBody::In(in_) => (0..in_.n_entries())
                .filter_map(|idx| in_.child(idx).cloned())
                .collect(),
            _ => Vec::new(),
        };
        for child in children {
            walk(&child, visit)?;
        }
        Ok(())
    })();
    node.latch().release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::env::Env;
    use crate::log::{MemLog, NullLockManager};

    fn small_tree(bin_max: usize, in_max: usize) -> Tree {
        let env = Env::new(
            EngineConfig {
                bin_max_entries: bin_max,
                in_max_entries: in_max,
                ..Default::default()
            },
            Arc::new(MemLog::new(1 << 20)),
            Arc::new(NullLockManager),
        );
        Tree::new(env)
    }

    #[test]
    fn stats_over_a_flat_tree() {
        let tree = small_tree(128, 128);
        for key in [b"a", b"b", b"c"] {
            tree.insert(key, b"v").unwrap();
        }
        let stats = collect_stats(&tree);
        assert_eq!(stats.levels, 1);
        assert_eq!(stats.internal_nodes, 1);
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.leaf_nodes, 3, "freshly written leaves stay cached");
        assert_eq!(stats.deleted_entries, 0);
        assert!(stats.memory_bytes > 0);
    }

    #[test]
    fn stats_count_pending_deletes() {
        let tree = small_tree(128, 128);
        tree.insert(b"k", b"v").unwrap();
        tree.delete(b"k").unwrap().unwrap();
        let stats = collect_stats(&tree);
        assert_eq!(stats.deleted_entries, 1);
    }

    #[test]
    fn verify_accepts_a_grown_tree() {
        let tree = small_tree(4, 4);
        for i in 0..32u32 {
            let key = format!("key-{i:03}");
            tree.insert(key.as_bytes(), &i.to_be_bytes()).unwrap();
        }
        assert!(tree.root().level() >= 2);
        verify_tree(&tree).unwrap();
        let stats = collect_stats(&tree);
        assert!(stats.internal_nodes > 1, "splits created more internals");
    }
}
