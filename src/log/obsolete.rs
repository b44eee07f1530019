//! # Node Logging and Obsolete Tracking
//!
//! The bridge between mutated node bodies and the log: picks full-vs-delta
//! form, appends the record, updates the node's last-logged positions, and
//! reports every superseded record to the log manager so its space can be
//! reclaimed.
//!
//! ## Provisional Writes
//!
//! A split logs the affected children first, provisionally, and the parent
//! last, non-provisionally; recovery replays the children only through the
//! parent. Obsolete reporting follows the same rule: a provisional write
//! must not count its superseded records yet (if the parent never commits,
//! those records are still live), so they are returned to the caller, who
//! parks them in the parent's deferred list. The parent's non-provisional
//! write drains and counts them.

use eyre::Result;
use tracing::trace;

use crate::env::Env;
use crate::log::codec;
use crate::lsn::Lsn;
use crate::node::{BinDelta, In, Ln};

/// Result of logging one node body.
#[derive(Debug)]
pub struct LoggedNode {
    pub lsn: Lsn,
    /// Record payload size, for the parent slot's logged-size column.
    pub size: u32,
    /// Superseded records whose counting is deferred because this write was
    /// provisional; the caller owes them to the covering ancestor.
    pub deferred_obsolete: Vec<Lsn>,
}

fn append(env: &Env, payload: &[u8], provisional: bool) -> Result<Lsn> {
    match env.log().append(payload, provisional) {
        Ok(lsn) => Ok(lsn),
        Err(err) => {
            if env.config().invalidate_on_write_error {
                Err(env.invalidate(err))
            } else {
                Err(err)
            }
        }
    }
}

fn settle(env: &Env, provisional: bool, obsolete: Vec<Lsn>, lsn: Lsn, size: usize) -> LoggedNode {
    let deferred_obsolete = if provisional {
        obsolete
    } else {
        for stale in obsolete {
            env.log().count_obsolete(stale, 0);
        }
        Vec::new()
    };
    LoggedNode {
        lsn,
        size: size as u32,
        deferred_obsolete,
    }
}

/// Logs an IN or BIN, as a delta when eligible, else as a full image.
pub fn log_in(env: &Env, in_: &mut In, provisional: bool) -> Result<LoggedNode> {
    env.check_open()?;
    let config = env.config();
    let as_delta = in_.can_log_delta(config);
    let payload = if as_delta {
        codec::encode_bin_delta(in_, config)
    } else {
        codec::encode_in(in_)
    };
    let lsn = append(env, &payload, provisional)?;
    trace!(
        kind = ?in_.kind(),
        %lsn,
        delta = as_delta,
        provisional,
        bytes = payload.len(),
        "logged internal node"
    );

    let mut obsolete = Vec::new();
    if as_delta {
        if !in_.last_delta_lsn.is_null() {
            obsolete.push(in_.last_delta_lsn);
        }
        in_.last_delta_lsn = lsn;
    } else {
        if !in_.last_full_lsn.is_null() {
            obsolete.push(in_.last_full_lsn);
        }
        if !in_.last_delta_lsn.is_null() {
            obsolete.push(in_.last_delta_lsn);
        }
        in_.last_full_lsn = lsn;
        in_.last_full_count = in_.n_entries() as u32;
        in_.last_delta_lsn = Lsn::NULL;
        in_.clear_dirty_flags();
        in_.prohibit_next_delta = false;
    }
    obsolete.append(&mut in_.provisional_obsolete);
    in_.dirty = false;
    Ok(settle(env, provisional, obsolete, lsn, payload.len()))
}

/// Re-logs a fetched delta that accumulated blind inserts, without
/// materializing it.
pub fn log_delta(env: &Env, delta: &mut BinDelta, provisional: bool) -> Result<LoggedNode> {
    env.check_open()?;
    let payload = codec::encode_delta(delta);
    let lsn = append(env, &payload, provisional)?;
    trace!(%lsn, provisional, bytes = payload.len(), "re-logged bottom delta");

    let mut obsolete = Vec::new();
    if !delta.last_delta_lsn.is_null() {
        obsolete.push(delta.last_delta_lsn);
    }
    delta.last_delta_lsn = lsn;
    delta.dirty = false;
    Ok(settle(env, provisional, obsolete, lsn, payload.len()))
}

/// Logs a leaf record. `prev_lsn` is the slot's current LSN, reported
/// obsolete with the leaf's last logged size.
pub fn log_ln(env: &Env, ln: &mut Ln, prev_lsn: Lsn, provisional: bool) -> Result<LoggedNode> {
    env.check_open()?;
    let payload = codec::encode_ln(ln);
    let lsn = append(env, &payload, provisional)?;

    let deferred_obsolete = if prev_lsn.is_null() {
        Vec::new()
    } else if provisional {
        vec![prev_lsn]
    } else {
        env.log().count_obsolete(prev_lsn, ln.last_logged_size());
        Vec::new()
    };
    ln.set_last_logged_size(payload.len() as u32);
    Ok(LoggedNode {
        lsn,
        size: payload.len() as u32,
        deferred_obsolete,
    })
}
