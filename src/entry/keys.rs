//! # Key Storage
//!
//! Slot keys live either as full byte arrays or as a shared prefix plus
//! per-slot suffixes. The prefixed form saves real memory on the dense,
//! lexicographically clustered keys a bottom node accumulates; the full form
//! is the fallback whenever a key stops sharing the prefix.
//!
//! The representation mutates dynamically: `set`/`insert` fall back to the
//! full form when a new key does not share the current prefix, and
//! [`KeyStore::recompute_prefix`] re-derives the longest common prefix by
//! scanning **all** keys after a bulk structural change (a split, a delta
//! merge). Scanning only the boundary keys would suffice under a bytewise
//! order but is unsound with a custom comparator, so it is not done.
//!
//! Comparisons against a search key avoid reconstructing full keys in the
//! prefixed form: the prefix is compared once, then only the suffix.

use std::cmp::Ordering;

/// Per-slot key storage with a mutable representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStore {
    /// One full key per slot.
    Full(Vec<Box<[u8]>>),
    /// Shared leading bytes plus one suffix per slot.
    Prefixed {
        prefix: Box<[u8]>,
        suffixes: Vec<Box<[u8]>>,
    },
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::Full(Vec::new())
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Full(keys) => keys.len(),
            Self::Prefixed { suffixes, .. } => suffixes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_prefixed(&self) -> bool {
        matches!(self, Self::Prefixed { .. })
    }

    /// Shared prefix bytes; empty in the full representation.
    pub fn prefix(&self) -> &[u8] {
        match self {
            Self::Full(_) => &[],
            Self::Prefixed { prefix, .. } => prefix,
        }
    }

    /// Per-slot stored bytes: the full key or the suffix.
    pub fn suffix(&self, idx: usize) -> &[u8] {
        match self {
            Self::Full(keys) => &keys[idx],
            Self::Prefixed { suffixes, .. } => &suffixes[idx],
        }
    }

    /// Reconstructs the full key for a slot.
    pub fn key(&self, idx: usize) -> Vec<u8> {
        match self {
            Self::Full(keys) => keys[idx].to_vec(),
            Self::Prefixed { prefix, suffixes } => {
                let mut key = Vec::with_capacity(prefix.len() + suffixes[idx].len());
                key.extend_from_slice(prefix);
                key.extend_from_slice(&suffixes[idx]);
                key
            }
        }
    }

    /// Bytewise comparison of slot `idx` against `key`, without
    /// reconstructing the stored key.
    pub fn compare_bytewise(&self, idx: usize, key: &[u8]) -> Ordering {
        match self {
            Self::Full(keys) => keys[idx].as_ref().cmp(key),
            Self::Prefixed { prefix, suffixes } => {
                let head = &key[..prefix.len().min(key.len())];
                match prefix.as_ref().cmp(head) {
                    Ordering::Equal if key.len() >= prefix.len() => {
                        suffixes[idx].as_ref().cmp(&key[prefix.len()..])
                    }
                    // Key is a strict prefix of the shared prefix: stored
                    // key is longer, hence greater.
                    Ordering::Equal => Ordering::Greater,
                    unequal => unequal,
                }
            }
        }
    }

    /// Replaces the key at `idx`, mutating to the full representation if the
    /// new key no longer shares the prefix.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn set(self, idx: usize, key: &[u8]) -> Self {
        match self {
            Self::Full(mut keys) => {
                keys[idx] = key.into();
                Self::Full(keys)
            }
            Self::Prefixed {
                prefix,
                mut suffixes,
            } => {
                if key.starts_with(&prefix) {
                    suffixes[idx] = key[prefix.len()..].into();
                    Self::Prefixed { prefix, suffixes }
                } else {
                    let mut store = expand(prefix, suffixes);
                    store[idx] = key.into();
                    Self::Full(store)
                }
            }
        }
    }

    /// Inserts a key at `idx`, shifting later slots right.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn insert(self, idx: usize, key: &[u8]) -> Self {
        match self {
            Self::Full(mut keys) => {
                keys.insert(idx, key.into());
                Self::Full(keys)
            }
            Self::Prefixed {
                prefix,
                mut suffixes,
            } => {
                if key.starts_with(&prefix) {
                    suffixes.insert(idx, key[prefix.len()..].into());
                    Self::Prefixed { prefix, suffixes }
                } else {
                    let mut store = expand(prefix, suffixes);
                    store.insert(idx, key.into());
                    Self::Full(store)
                }
            }
        }
    }

    /// Removes the key at `idx`, shifting later slots left.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn remove(self, idx: usize) -> Self {
        match self {
            Self::Full(mut keys) => {
                keys.remove(idx);
                Self::Full(keys)
            }
            Self::Prefixed {
                prefix,
                mut suffixes,
            } => {
                suffixes.remove(idx);
                Self::Prefixed { prefix, suffixes }
            }
        }
    }

    /// Re-derives the longest common prefix over all keys. Falls back to the
    /// full representation when no bytes are shared. Idempotent: running it
    /// on an already-compacted store yields an equal store.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn recompute_prefix(self) -> Self {
        let n = self.len();
        if n == 0 {
            return Self::Full(Vec::new());
        }

        let first = self.key(0);
        let mut common = first.len();
        for idx in 1..n {
            let key = self.key(idx);
            common = common
                .min(key.len())
                .min(lcp_len(&first[..common], &key));
            if common == 0 {
                break;
            }
        }

        if common == 0 {
            return match self {
                full @ Self::Full(_) => full,
                Self::Prefixed { prefix, suffixes } => Self::Full(expand(prefix, suffixes)),
            };
        }

        let prefix: Box<[u8]> = first[..common].into();
        let suffixes = (0..n).map(|idx| self.key(idx)[common..].into()).collect();
        Self::Prefixed { prefix, suffixes }
    }

    pub fn memory_size(&self) -> usize {
        let slot = std::mem::size_of::<Box<[u8]>>();
        match self {
            Self::Full(keys) => keys.iter().map(|k| k.len() + slot).sum(),
            Self::Prefixed { prefix, suffixes } => {
                prefix.len() + suffixes.iter().map(|s| s.len() + slot).sum::<usize>()
            }
        }
    }
}

fn expand(prefix: Box<[u8]>, suffixes: Vec<Box<[u8]>>) -> Vec<Box<[u8]>> {
    suffixes
        .into_iter()
        .map(|suffix| {
            let mut key = Vec::with_capacity(prefix.len() + suffix.len());
            key.extend_from_slice(&prefix);
            key.extend_from_slice(&suffix);
            key.into_boxed_slice()
        })
        .collect()
}

fn lcp_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_of(keys: &[&[u8]]) -> KeyStore {
        let mut store = KeyStore::new();
        for (idx, key) in keys.iter().enumerate() {
            store = store.insert(idx, key);
        }
        store
    }

    #[test]
    fn insert_and_reconstruct() {
        let store = store_of(&[b"apple", b"apricot", b"banana"]);
        assert_eq!(store.key(0), b"apple");
        assert_eq!(store.key(2), b"banana");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn recompute_finds_shared_prefix() {
        let store = store_of(&[b"user/0001", b"user/0002", b"user/0100"]).recompute_prefix();
        assert!(store.is_prefixed());
        assert_eq!(store.prefix(), b"user/0");
        assert_eq!(store.key(0), b"user/0001");
        assert_eq!(store.key(2), b"user/0100");
    }

    #[test]
    fn recompute_reproduces_every_key_exactly() {
        let keys: Vec<Vec<u8>> = (0..50).map(|i| format!("item-{i:04}").into_bytes()).collect();
        let mut store = KeyStore::new();
        for (idx, key) in keys.iter().enumerate() {
            store = store.insert(idx, key);
        }
        store = store.recompute_prefix();
        for (idx, key) in keys.iter().enumerate() {
            assert_eq!(&store.key(idx), key);
        }
    }

    #[test]
    fn recompute_on_compacted_store_is_noop() {
        let once = store_of(&[b"aa1", b"aa2"]).recompute_prefix();
        let twice = once.clone().recompute_prefix();
        assert_eq!(once, twice);
    }

    #[test]
    fn disjoint_keys_stay_full() {
        let store = store_of(&[b"alpha", b"zulu"]).recompute_prefix();
        assert!(!store.is_prefixed());
    }

    #[test]
    fn set_outside_prefix_mutates_to_full() {
        let store = store_of(&[b"aa1", b"aa2", b"aa3"]).recompute_prefix();
        assert!(store.is_prefixed());

        let store = store.set(1, b"zz");
        assert!(!store.is_prefixed());
        assert_eq!(store.key(0), b"aa1");
        assert_eq!(store.key(1), b"zz");
        assert_eq!(store.key(2), b"aa3");
    }

    #[test]
    fn insert_within_prefix_keeps_representation() {
        let store = store_of(&[b"aa1", b"aa9"]).recompute_prefix();
        let store = store.insert(1, b"aa5");
        assert!(store.is_prefixed());
        assert_eq!(store.key(1), b"aa5");
    }

    #[test]
    fn remove_keeps_prefix() {
        let store = store_of(&[b"aa1", b"aa5", b"aa9"]).recompute_prefix();
        let store = store.remove(1);
        assert!(store.is_prefixed());
        assert_eq!(store.len(), 2);
        assert_eq!(store.key(1), b"aa9");
    }

    #[test]
    fn compare_bytewise_matches_reconstruction() {
        let store = store_of(&[b"aa1", b"aa5", b"aa9"]).recompute_prefix();
        assert_eq!(store.compare_bytewise(0, b"aa1"), Ordering::Equal);
        assert_eq!(store.compare_bytewise(1, b"aa4"), Ordering::Greater);
        assert_eq!(store.compare_bytewise(1, b"aa6"), Ordering::Less);
        // Search key shorter than the shared prefix.
        assert_eq!(store.compare_bytewise(0, b"a"), Ordering::Greater);
        // Search key diverging inside the prefix.
        assert_eq!(store.compare_bytewise(0, b"ab"), Ordering::Less);
    }

    #[test]
    fn prefixed_form_uses_less_memory() {
        let full = store_of(&[b"shared-prefix-0001", b"shared-prefix-0002"]);
        let packed = full.clone().recompute_prefix();
        assert!(packed.memory_size() < full.memory_size());
    }
}
