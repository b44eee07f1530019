//! # Treeline - Log-Structured B-Tree Node Engine
//!
//! Treeline is the node engine of an embedded, log-structured transactional
//! storage engine. It implements the internal-node (IN/BIN) and leaf-node (LN)
//! representations, their compact in-memory and persistent encodings, the
//! per-node latch protocol, and the split/delta/logging algorithms that keep a
//! mutable tree consistent with an append-only log under concurrent access.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Tree (descent, split)         │
//! ├──────────────────────────────────────┤
//! │  Node: IN / BIN / BIN-delta / LN     │
//! ├───────────────┬──────────────────────┤
//! │  Entry stores │  Latch (S/X + owner) │
//! │  keys/lsns/   ├──────────────────────┤
//! │  children/    │  Cache (INList, LRU, │
//! │  states       │  memory budget)      │
//! ├───────────────┴──────────────────────┤
//! │  Log bridge (codec, obsolete track)  │
//! ├──────────────────────────────────────┤
//! │  LogManager (append-only, by-LSN)    │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Node Variants
//!
//! - **IN**: upper internal node; ordered (key, LSN, child) entries. Slot 0
//!   is a virtual "always lowest" sentinel that routes keys smaller than all
//!   existing keys to the leftmost child.
//! - **BIN**: bottom internal node, directly above leaf data. Persists either
//!   as a full image or as a *delta* holding only the slots dirtied since the
//!   last full image.
//! - **LN**: leaf record holding a payload or a deletion marker.
//!
//! ## Compact Representations
//!
//! Per-slot keys, LSNs and cached-child references each have a compact form
//! that mutates to a wide form on demand:
//!
//! - Keys: full byte arrays, or a shared prefix plus per-slot suffixes.
//! - LSNs: a node-local base file number plus 4-byte (delta, offset) slots,
//!   mutating irreversibly to full 64-bit LSNs when a value no longer fits.
//! - Children: absent until any child is cached, then a dense array.
//!
//! Every store is an owned value type: mutators consume the store and return
//! the possibly-new representation, which the owning node must adopt.
//!
//! ## Concurrency
//!
//! There is no global tree lock. Each node owns a shared/exclusive latch with
//! ownership queries. Latch acquisition during descent is strictly top-down.
//! No latch is held across a blocking log read; an advisory pin counter
//! blocks eviction of an in-flight fetch target, and the re-fetch path
//! re-validates the observed (slot, LSN) pair before attaching the result.
//!
//! ## Error Model
//!
//! Invariant violations invalidate the whole environment: continuing after
//! one risks silent corruption. A missing log file is tolerated only when the
//! referencing slot is already marked deleted. There is no retry at this
//! layer; "restart from root" is a typed outcome the caller acts on.

pub mod cache;
pub mod config;
pub mod diag;
pub mod encoding;
pub mod entry;
pub mod env;
pub mod filter;
pub mod latch;
pub mod log;
pub mod lsn;
pub mod node;
pub mod tree;

pub use config::EngineConfig;
pub use env::Env;
pub use lsn::Lsn;
pub use tree::{InsertOutcome, Tree};
