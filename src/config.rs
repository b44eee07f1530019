//! # Engine Configuration
//!
//! All tunables for the node engine live in [`EngineConfig`], threaded
//! through [`crate::env::Env`] construction. There are no process-wide
//! mutable switches: two environments in one process may run with different
//! settings (for example, one with compact LSNs disabled for debugging).
//!
//! ## Key Comparator
//!
//! Keys are ordered bytewise by default. A custom comparator can be supplied;
//! it must impose a total order and be consistent across restarts, since the
//! persistent entry order depends on it. With a custom comparator configured,
//! key-prefix recomputation always scans all keys (a boundary-keys-only scan
//! is unsound unless the comparator is bytewise-compatible).

use std::cmp::Ordering;
use std::sync::Arc;

/// Total order over raw key bytes.
pub type KeyComparator = dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync;

/// Engine-wide settings, fixed at environment construction.
#[derive(Clone)]
pub struct EngineConfig {
    /// Max entries in an upper internal node.
    pub in_max_entries: usize,
    /// Max entries in a bottom internal node.
    pub bin_max_entries: usize,
    /// Force the full 64-bit per-slot LSN representation from construction.
    pub disable_compact_lsns: bool,
    /// Max dirty slots for a BIN to be logged as a delta, as a percentage of
    /// its capacity. Zero disables deltas entirely.
    pub delta_max_dirty_percent: usize,
    /// Attach a membership filter to logged deltas, enabling blind insertions
    /// without materializing the full image.
    pub delta_membership_filter: bool,
    /// Memory budget for resident nodes, in bytes.
    pub cache_budget: usize,
    /// Treat a failed log append as environment-fatal. Disabled only by
    /// tests that inject write errors; a partially written record cannot be
    /// trusted in production.
    pub invalidate_on_write_error: bool,
    /// Custom key order; `None` means bytewise.
    pub key_comparator: Option<Arc<KeyComparator>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            in_max_entries: 128,
            bin_max_entries: 128,
            disable_compact_lsns: false,
            delta_max_dirty_percent: 25,
            delta_membership_filter: true,
            cache_budget: 16 * 1024 * 1024,
            invalidate_on_write_error: true,
            key_comparator: None,
        }
    }
}

impl EngineConfig {
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match &self.key_comparator {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }

    pub fn max_entries(&self, bottom: bool) -> usize {
        if bottom {
            self.bin_max_entries
        } else {
            self.in_max_entries
        }
    }

    /// Dirty-slot limit above which a BIN must be logged as a full image.
    pub fn delta_limit(&self, capacity: usize) -> usize {
        capacity * self.delta_max_dirty_percent / 100
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("in_max_entries", &self.in_max_entries)
            .field("bin_max_entries", &self.bin_max_entries)
            .field("disable_compact_lsns", &self.disable_compact_lsns)
            .field("delta_max_dirty_percent", &self.delta_max_dirty_percent)
            .field("delta_membership_filter", &self.delta_membership_filter)
            .field("cache_budget", &self.cache_budget)
            .field("invalidate_on_write_error", &self.invalidate_on_write_error)
            .field("custom_comparator", &self.key_comparator.is_some())
            .finish()
    }
}
