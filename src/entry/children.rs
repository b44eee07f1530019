//! # Cached-Child Storage
//!
//! Per-slot references to resident child nodes. Most internal nodes have no
//! cached children at all (the working set lives near the tree's hot paths),
//! so the store is sparse — a bare length — until any child is attached,
//! then a dense array of optional references. Once the last child detaches,
//! [`ChildStore::compact`] drops the array again.
//!
//! A present reference means the child is in the cache membership list and
//! counted against the memory budget; an absent one means the child must be
//! fetched through the slot's LSN.

use std::sync::Arc;

use crate::node::Node;

/// Per-slot cached-child references, sparse until any child is resident.
#[derive(Debug, Clone, Default)]
pub enum ChildStore {
    /// No children cached; holds only the logical slot count.
    #[default]
    Empty,
    /// At least one child cached.
    Dense(Vec<Option<Arc<Node>>>),
}

impl ChildStore {
    pub fn new() -> Self {
        Self::Empty
    }

    /// Cached reference at `idx`, or `None` (the type-appropriate default).
    pub fn get(&self, idx: usize) -> Option<&Arc<Node>> {
        match self {
            Self::Empty => None,
            Self::Dense(children) => children.get(idx).and_then(|c| c.as_ref()),
        }
    }

    pub fn any_cached(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Dense(children) => children.iter().any(|c| c.is_some()),
        }
    }

    pub fn cached_count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Dense(children) => children.iter().filter(|c| c.is_some()).count(),
        }
    }

    /// Stores a reference at `idx` in a store spanning `len` slots, going
    /// dense on the first attach.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn set(self, idx: usize, len: usize, child: Option<Arc<Node>>) -> Self {
        match self {
            Self::Empty => {
                if child.is_none() {
                    return Self::Empty;
                }
                let mut children = vec![None; len];
                children[idx] = child;
                Self::Dense(children)
            }
            Self::Dense(mut children) => {
                children.resize(len, None);
                children[idx] = child;
                Self::Dense(children)
            }
        }
    }

    /// Inserts an empty slot at `idx` (a new entry never starts cached;
    /// attach separately).
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn insert(self, idx: usize) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Dense(mut children) => {
                children.insert(idx, None);
                Self::Dense(children)
            }
        }
    }

    #[must_use = "the mutator returns the representation to adopt"]
    pub fn remove(self, idx: usize) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Dense(mut children) => {
                if idx < children.len() {
                    children.remove(idx);
                }
                Self::Dense(children)
            }
        }
    }

    /// Returns to the sparse form if nothing is cached any more.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn compact(self) -> Self {
        match self {
            Self::Dense(children) if children.iter().all(|c| c.is_none()) => Self::Empty,
            other => other,
        }
    }

    pub fn memory_size(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Dense(children) => {
                children.len() * std::mem::size_of::<Option<Arc<Node>>>()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Ln, Node, NodeBody};

    fn leaf() -> Arc<Node> {
        Node::new(1, 0, NodeBody::Ln(Ln::new(b"v".to_vec())))
    }

    #[test]
    fn starts_sparse_with_no_memory() {
        let store = ChildStore::new();
        assert!(store.get(0).is_none());
        assert_eq!(store.memory_size(), 0);
        assert!(!store.any_cached());
    }

    #[test]
    fn first_attach_goes_dense() {
        let store = ChildStore::new().set(2, 4, Some(leaf()));
        assert!(store.any_cached());
        assert_eq!(store.cached_count(), 1);
        assert!(store.get(2).is_some());
        assert!(store.get(0).is_none());
        assert!(store.memory_size() > 0);
    }

    #[test]
    fn attaching_none_to_sparse_stays_sparse() {
        let store = ChildStore::new().set(1, 4, None);
        assert!(matches!(store, ChildStore::Empty));
    }

    #[test]
    fn compact_after_last_detach() {
        let store = ChildStore::new().set(0, 2, Some(leaf()));
        let store = store.set(0, 2, None).compact();
        assert!(matches!(store, ChildStore::Empty));
    }

    #[test]
    fn compact_keeps_dense_while_occupied() {
        let store = ChildStore::new().set(0, 2, Some(leaf())).compact();
        assert!(matches!(store, ChildStore::Dense(_)));
    }

    #[test]
    fn insert_and_remove_shift_slots() {
        let store = ChildStore::new().set(1, 2, Some(leaf()));
        let store = store.insert(0);
        assert!(store.get(2).is_some());
        let store = store.remove(0);
        assert!(store.get(1).is_some());
    }
}
