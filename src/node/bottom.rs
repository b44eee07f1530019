//! # Bottom-Node Deltas
//!
//! A [`BinDelta`] is a fetched BIN delta held in its logged form: the subset
//! of slots that changed since the base full image, plus the LSN of that
//! image. Keeping the delta un-materialized is the point — a workload that
//! only ever inserts fresh keys never pays to fetch the (much larger) full
//! image at all.
//!
//! ## Blind Insertion
//!
//! An insertion can be applied directly to the delta when the key provably
//! does not exist in the base image. The membership filter logged with the
//! delta answers that: "definitely absent" admits the blind insert,
//! "possibly present" forces materialization (a duplicate slot would corrupt
//! the tree, so the filter's one-sided error is load-bearing). A delta logged
//! without a filter can never accept a blind insert.
//!
//! Materialization fetches the base image, replays the delta slots over it,
//! and yields a plain BIN; the caller swaps the node body in place under the
//! exclusive latch it already holds.

use std::cmp::Ordering;

use eyre::{ensure, Result, WrapErr};

use crate::config::EngineConfig;
use crate::entry::{state, KeyStore, LsnStore};
use crate::env::Env;
use crate::filter::KeyFilter;
use crate::log::codec::{self, DecodedNode};
use crate::lsn::Lsn;
use crate::node::{In, NodeKind};

/// Outcome of a blind-insertion attempt against a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlindOutcome {
    /// The slot index the insertion or update landed in.
    Applied(usize),
    /// The delta cannot prove the key absent (or has no room); the caller
    /// must materialize the full BIN first.
    MustMaterialize,
}

/// Un-materialized BIN delta: changed slots over a logged full image.
#[derive(Debug)]
pub struct BinDelta {
    pub(crate) full_lsn: Lsn,
    pub(crate) full_entry_count: u32,
    pub(crate) full_capacity: usize,
    /// Slot limit the delta was logged under.
    pub(crate) max_entries: usize,
    pub(crate) ident_key: Option<Box<[u8]>>,
    pub(crate) keys: KeyStore,
    pub(crate) lsns: LsnStore,
    pub(crate) states: Vec<u8>,
    pub(crate) filter: Option<KeyFilter>,
    pub(crate) last_delta_lsn: Lsn,
    pub(crate) dirty: bool,
}

impl BinDelta {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        full_lsn: Lsn,
        full_entry_count: u32,
        full_capacity: usize,
        max_entries: usize,
        ident_key: Option<Box<[u8]>>,
        keys: KeyStore,
        lsns: LsnStore,
        states: Vec<u8>,
        filter: Option<KeyFilter>,
    ) -> Self {
        Self {
            full_lsn,
            full_entry_count,
            full_capacity,
            max_entries,
            ident_key,
            keys,
            lsns,
            states,
            filter,
            last_delta_lsn: Lsn::NULL,
            dirty: false,
        }
    }

    pub fn full_lsn(&self) -> Lsn {
        self.full_lsn
    }

    pub fn n_slots(&self) -> usize {
        self.states.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn ident_key(&self) -> Option<&[u8]> {
        self.ident_key.as_deref()
    }

    pub fn slot_key(&self, idx: usize) -> Vec<u8> {
        self.keys.key(idx)
    }

    pub fn slot_lsn(&self, idx: usize) -> Lsn {
        self.lsns.get(idx)
    }

    pub fn slot_state(&self, idx: usize) -> u8 {
        self.states[idx]
    }

    fn search(&self, key: &[u8], config: &EngineConfig) -> std::result::Result<usize, usize> {
        let mut low = 0;
        let mut high = self.n_slots();
        while low < high {
            let mid = low + (high - low) / 2;
            let ord = match &config.key_comparator {
                Some(cmp) => cmp(&self.keys.key(mid), key),
                None => self.keys.compare_bytewise(mid, key),
            };
            match ord {
                Ordering::Less => low = mid + 1,
                Ordering::Equal => return Ok(mid),
                Ordering::Greater => high = mid,
            }
        }
        Err(low)
    }

    /// Exact search over the delta slots only. A miss says nothing about the
    /// base image.
    pub fn find(&self, key: &[u8], config: &EngineConfig) -> Option<usize> {
        self.search(key, config).ok()
    }

    /// True when the filter proves `key` absent from the whole BIN. Keys
    /// blind-inserted after the delta was fetched live in the delta slots,
    /// which the caller has already searched.
    pub fn proves_absent(&self, key: &[u8]) -> bool {
        self.filter.as_ref().is_some_and(|f| !f.maybe_contains(key))
    }

    /// Whether a blind insert of `key` (not already in the delta slots)
    /// would be admitted.
    pub fn can_blind_insert(&self, key: &[u8], config: &EngineConfig) -> bool {
        self.search(key, config).is_ok()
            || (self.proves_absent(key) && self.n_slots() < self.max_entries)
    }

    /// Applies an insertion (or an update of a slot already in the delta)
    /// without touching the base image, when provably safe.
    pub fn blind_insert(&mut self, key: &[u8], lsn: Lsn, config: &EngineConfig) -> BlindOutcome {
        let idx = match self.search(key, config) {
            Ok(idx) => {
                // Already in the delta: a plain slot update.
                self.lsns = std::mem::take(&mut self.lsns).set(idx, lsn);
                self.states[idx] |= state::DIRTY;
                self.states[idx] &= !(state::KNOWN_DELETED | state::PENDING_DELETED);
                self.dirty = true;
                return BlindOutcome::Applied(idx);
            }
            Err(idx) => idx,
        };

        let Some(filter) = &self.filter else {
            return BlindOutcome::MustMaterialize;
        };
        if filter.maybe_contains(key) {
            return BlindOutcome::MustMaterialize;
        }
        if self.n_slots() >= self.max_entries {
            return BlindOutcome::MustMaterialize;
        }

        self.keys = std::mem::take(&mut self.keys).insert(idx, key);
        self.lsns = std::mem::take(&mut self.lsns).insert(idx, lsn);
        self.states.insert(idx, state::DIRTY);
        self.dirty = true;
        BlindOutcome::Applied(idx)
    }

    /// Fetches the base full image and replays the delta slots over it. The
    /// result carries the delta slots as dirty so the next delta log write
    /// still covers them.
    pub fn materialize(&self, env: &Env) -> Result<In> {
        let bytes = env
            .log()
            .read(self.full_lsn)
            .wrap_err_with(|| format!("fetching full image at {} for delta merge", self.full_lsn))?;
        let decoded = codec::decode_node(&bytes)?;
        let mut full = match decoded {
            DecodedNode::In(in_) if in_.kind() == NodeKind::Bottom => in_,
            other => eyre::bail!(
                "delta base at {} is not a full bottom image: {:?}",
                self.full_lsn,
                other.kind()
            ),
        };
        // Pre-10 deltas carry no base count (u32::MAX marks it unknown).
        if self.full_entry_count != u32::MAX {
            ensure!(
                full.n_entries() as u32 == self.full_entry_count,
                "delta expects {} entries in its base image, found {}",
                self.full_entry_count,
                full.n_entries()
            );
        }

        full.clear_dirty_flags();
        for idx in 0..self.n_slots() {
            let key = self.keys.key(idx);
            let slot_state = self.states[idx] | state::DIRTY;
            full.merge_entry(&key, self.lsns.get(idx), slot_state, config_of(env))?;
        }

        full.last_full_lsn = self.full_lsn;
        full.last_delta_lsn = self.last_delta_lsn;
        full.dirty = self.dirty;
        if self.ident_key.is_some() {
            full.ident_key = self.ident_key.clone();
        }
        full.recompute_key_prefix();
        Ok(full)
    }

    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.ident_key.as_ref().map_or(0, |k| k.len())
            + self.keys.memory_size()
            + self.lsns.memory_size()
            + self.states.len()
            + self.filter.as_ref().map_or(0, KeyFilter::memory_size)
    }
}

fn config_of(env: &Env) -> &EngineConfig {
    env.config()
}
