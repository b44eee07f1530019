//! # Environment State
//!
//! [`Env`] ties the node engine to its collaborators: the log manager, the
//! lock manager, the cache membership list, and the memory budget. It also
//! owns the two pieces of truly global state the engine needs: the monotonic
//! node-id allocator and the invalidation flag.
//!
//! ## Invalidation
//!
//! A structural invariant violation (insert into a full node, fetch through a
//! null LSN with no deleted marker, split without an identifier key) means
//! the in-memory tree can no longer be trusted against the log. Such faults
//! are not recovered locally: the environment is marked invalid and every
//! subsequent operation fails fast until the environment is re-opened and
//! recovery replays the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{bail, eyre, Report, Result};
use parking_lot::Mutex;

use crate::cache::{InList, MemBudget};
use crate::config::EngineConfig;
use crate::log::{LockManager, LogManager};

/// Shared engine state handed to every node-level operation.
pub struct Env {
    config: EngineConfig,
    log: Arc<dyn LogManager>,
    locks: Arc<dyn LockManager>,
    in_list: InList,
    budget: MemBudget,
    next_node_id: AtomicU64,
    invalid: Mutex<Option<String>>,
}

impl Env {
    pub fn new(
        config: EngineConfig,
        log: Arc<dyn LogManager>,
        locks: Arc<dyn LockManager>,
    ) -> Arc<Self> {
        let budget = MemBudget::new(config.cache_budget);
        Arc::new(Self {
            config,
            log,
            locks,
            in_list: InList::new(),
            budget,
            next_node_id: AtomicU64::new(1),
            invalid: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn log(&self) -> &dyn LogManager {
        &*self.log
    }

    pub fn locks(&self) -> &dyn LockManager {
        &*self.locks
    }

    pub fn in_list(&self) -> &InList {
        &self.in_list
    }

    pub fn budget(&self) -> &MemBudget {
        &self.budget
    }

    pub fn next_node_id(&self) -> u64 {
        self.next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fails if a prior fault has invalidated the environment.
    pub fn check_open(&self) -> Result<()> {
        if let Some(cause) = &*self.invalid.lock() {
            bail!("environment invalidated: {cause}");
        }
        Ok(())
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalid.lock().is_some()
    }

    /// Marks the environment unusable and returns the fault, annotated. The
    /// first cause wins; later faults are recorded only in the returned
    /// error.
    pub fn invalidate(&self, fault: Report) -> Report {
        let mut invalid = self.invalid.lock();
        if invalid.is_none() {
            tracing::error!(cause = %fault, "invalidating environment");
            *invalid = Some(fault.to_string());
        }
        fault.wrap_err("environment invalidated by structural fault")
    }

    /// Builds and records a fatal fault in one step.
    pub fn fatal(&self, msg: impl AsRef<str>) -> Report {
        self.invalidate(eyre!("{}", msg.as_ref()))
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("config", &self.config)
            .field("resident_nodes", &self.in_list.len())
            .field("budget_used", &self.budget.used())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}
