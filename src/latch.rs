//! # Per-Node Latches
//!
//! Every node owns a latch supporting shared (concurrent readers) and
//! exclusive (single writer) acquisition, with ownership queries so callers
//! can assert protocol invariants. Acquisition during tree descent is
//! strictly top-down; there is no deadlock detection, timeout, or
//! cancellation at this layer.
//!
//! ## Semantics
//!
//! - Exclusive acquisition blocks until no other owner (shared or exclusive)
//!   remains.
//! - Shared acquisition blocks only while an exclusive owner exists.
//! - Latches are not reentrant: a thread re-acquiring exclusively, or
//!   releasing a latch it does not own, has broken the latch protocol and
//!   the latch panics. That is a bug in the caller, not a recoverable error.
//!
//! ## Implementation
//!
//! A `parking_lot` mutex guards the owner bookkeeping and a condvar parks
//! waiters. Owner thread ids are tracked (a `SmallVec` for the shared set)
//! which makes the ownership queries exact rather than advisory. This favors
//! protocol checkability over raw throughput; nodes are latched for short
//! critical sections and never across a blocking log read.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

#[derive(Default)]
struct LatchState {
    exclusive: Option<ThreadId>,
    shared: SmallVec<[ThreadId; 4]>,
}

impl LatchState {
    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

/// Shared/exclusive mutual exclusion with exact ownership queries.
pub struct Latch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
            cond: Condvar::new(),
        }
    }

    /// Blocks until this thread is the sole owner.
    pub fn acquire_exclusive(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if state.exclusive == Some(me) || state.shared.contains(&me) {
                panic!("latch protocol violation: re-acquiring an owned latch");
            }
            if state.is_free() {
                state.exclusive = Some(me);
                return;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Blocks until no exclusive owner remains, then joins the reader set.
    pub fn acquire_shared(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if state.exclusive == Some(me) || state.shared.contains(&me) {
                panic!("latch protocol violation: re-acquiring an owned latch");
            }
            if state.exclusive.is_none() {
                state.shared.push(me);
                return;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Non-blocking exclusive acquisition.
    pub fn try_acquire_exclusive(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.is_free() {
            state.exclusive = Some(me);
            true
        } else {
            false
        }
    }

    /// Non-blocking shared acquisition.
    pub fn try_acquire_shared(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.exclusive.is_none() && !state.shared.contains(&me) {
            state.shared.push(me);
            true
        } else {
            false
        }
    }

    /// Releases this thread's hold, shared or exclusive.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.exclusive == Some(me) {
            state.exclusive = None;
        } else if let Some(pos) = state.shared.iter().position(|id| *id == me) {
            state.shared.swap_remove(pos);
        } else {
            panic!("latch protocol violation: releasing a latch this thread does not own");
        }
        drop(state);
        self.cond.notify_all();
    }

    /// True if the calling thread holds the latch exclusively.
    pub fn is_owned_exclusive(&self) -> bool {
        self.state.lock().exclusive == Some(thread::current().id())
    }

    /// True if the calling thread holds the latch in shared mode.
    pub fn is_owned_shared(&self) -> bool {
        self.state.lock().shared.contains(&thread::current().id())
    }

    /// True if the calling thread holds the latch in either mode.
    pub fn is_owned(&self) -> bool {
        let state = self.state.lock();
        let me = thread::current().id();
        state.exclusive == Some(me) || state.shared.contains(&me)
    }

    /// True if any thread holds the latch.
    pub fn is_latched(&self) -> bool {
        !self.state.lock().is_free()
    }

    /// Number of current owners (diagnostics only; stale by the time it
    /// returns unless the caller holds the latch).
    pub fn owner_count(&self) -> usize {
        let state = self.state.lock();
        state.shared.len() + usize::from(state.exclusive.is_some())
    }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Latch")
            .field("exclusive", &state.exclusive.is_some())
            .field("shared", &state.shared.len())
            .finish()
    }
}
