//! # Node Record Codec
//!
//! Versioned encode/decode between in-memory node bodies and log record
//! payloads. The writer always emits [`LOG_VERSION`]; the reader accepts
//! every version back to [`MIN_LOG_VERSION`], applying the per-version
//! layout differences below. Older versions fail with a hard error: a log
//! that old must be upgraded through an intermediate release.
//!
//! | Version | Layout change                                              |
//! |---------|------------------------------------------------------------|
//! | 6       | oldest readable; packed integers throughout                |
//! | 8       | per-entry node ids dropped from internal records           |
//! | 9       | per-entry last-logged sizes added                          |
//! | 10      | deltas carry base entry count and a membership filter      |
//!
//! Every record starts with a packed version and one kind tag byte. The
//! per-slot dirty bit is in-memory state and is masked out of persisted
//! state bytes.

use eyre::{bail, ensure, Result};

use crate::config::EngineConfig;
use crate::encoding::{decode_varint, decode_varint_signed, push_varint, push_varint_signed};
use crate::entry::{state, KeyStore, LsnStore};
use crate::filter::KeyFilter;
use crate::lsn::Lsn;
use crate::node::{BinDelta, In, Ln, NodeKind};

/// Version written by this release.
pub const LOG_VERSION: u64 = 10;
/// Oldest version this release can read.
pub const MIN_LOG_VERSION: u64 = 6;

const FLAG_IS_ROOT: u8 = 0x01;
const FLAG_HAS_IDENT: u8 = 0x02;
const FLAG_HAS_FILTER: u8 = 0x04;

/// A node body decoded from a log record.
#[derive(Debug)]
pub enum DecodedNode {
    In(In),
    Delta(BinDelta),
    Ln(Ln),
}

impl DecodedNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::In(in_) => in_.kind(),
            Self::Delta(_) => NodeKind::BottomDelta,
            Self::Ln(ln) => ln.kind(),
        }
    }
}

/// Encodes a full internal (IN or BIN) image.
pub fn encode_in(in_: &In) -> Vec<u8> {
    encode_in_at(in_, LOG_VERSION)
}

pub(crate) fn encode_in_at(in_: &In, version: u64) -> Vec<u8> {
    let n = in_.n_entries();
    let mut buf = Vec::with_capacity(64 + n * 16);
    push_varint(&mut buf, version);
    buf.push(in_.kind().tag());

    let mut flags = 0u8;
    if in_.is_root() {
        flags |= FLAG_IS_ROOT;
    }
    if in_.ident_key().is_some() {
        flags |= FLAG_HAS_IDENT;
    }
    buf.push(flags);
    push_varint(&mut buf, in_.capacity() as u64);
    push_varint(&mut buf, n as u64);
    if let Some(ident) = in_.ident_key() {
        push_varint(&mut buf, ident.len() as u64);
        buf.extend_from_slice(ident);
    }

    encode_key_block(&mut buf, &in_.keys, n);
    if version <= 7 {
        // Legacy per-entry node ids; long unused, written as zero.
        for _ in 0..n {
            push_varint(&mut buf, 0);
        }
    }
    encode_lsn_block(&mut buf, &in_.lsns);
    for idx in 0..n {
        buf.push(in_.entry_state(idx) & !state::DIRTY);
    }
    if version >= 9 {
        for idx in 0..n {
            push_varint(&mut buf, u64::from(in_.logged_size(idx)));
        }
    }
    buf
}

/// Encodes a delta image from a full BIN: only the dirty slots, plus a
/// membership filter over all current keys when enabled.
pub fn encode_bin_delta(in_: &In, config: &EngineConfig) -> Vec<u8> {
    let dirty: Vec<usize> = (0..in_.n_entries())
        .filter(|&idx| state::is_dirty(in_.entry_state(idx)))
        .collect();

    let mut keys = KeyStore::new();
    let mut lsns = LsnStore::new(config.disable_compact_lsns);
    let mut states = Vec::with_capacity(dirty.len());
    for (slot, &idx) in dirty.iter().enumerate() {
        keys = keys.insert(slot, &in_.key(idx));
        lsns = lsns.insert(slot, in_.entry_lsn(idx));
        states.push(in_.entry_state(idx) & !state::DIRTY);
    }

    let filter = config.delta_membership_filter.then(|| {
        let mut filter = KeyFilter::with_capacity(in_.capacity());
        for idx in 0..in_.n_entries() {
            filter.insert(&in_.key(idx));
        }
        filter
    });

    let delta = BinDelta::from_parts(
        in_.last_full_lsn(),
        in_.last_full_count,
        in_.capacity(),
        config.delta_limit(in_.capacity()),
        in_.ident_key().map(Into::into),
        keys,
        lsns,
        states,
        filter,
    );
    encode_delta(&delta)
}

/// Re-encodes a delta body (a fetched delta that accumulated blind inserts).
pub fn encode_delta(delta: &BinDelta) -> Vec<u8> {
    encode_delta_at(delta, LOG_VERSION)
}

pub(crate) fn encode_delta_at(delta: &BinDelta, version: u64) -> Vec<u8> {
    let n = delta.n_slots();
    let mut buf = Vec::with_capacity(64 + n * 16);
    push_varint(&mut buf, version);
    buf.push(NodeKind::BottomDelta.tag());

    let mut flags = 0u8;
    if delta.ident_key().is_some() {
        flags |= FLAG_HAS_IDENT;
    }
    if version >= 10 && delta.filter.is_some() {
        flags |= FLAG_HAS_FILTER;
    }
    buf.push(flags);
    buf.extend_from_slice(&delta.full_lsn().raw().to_be_bytes());
    if version >= 10 {
        push_varint(&mut buf, u64::from(delta.full_entry_count));
        push_varint(&mut buf, delta.max_entries as u64);
    }
    push_varint(&mut buf, delta.full_capacity as u64);
    if let Some(ident) = delta.ident_key() {
        push_varint(&mut buf, ident.len() as u64);
        buf.extend_from_slice(ident);
    }
    push_varint(&mut buf, n as u64);
    encode_key_block(&mut buf, &delta.keys, n);
    encode_lsn_block(&mut buf, &delta.lsns);
    for idx in 0..n {
        buf.push(delta.slot_state(idx) & !state::DIRTY);
    }
    if version >= 10 {
        if let Some(filter) = &delta.filter {
            push_varint(&mut buf, filter.bits().len() as u64);
            buf.extend_from_slice(filter.bits());
            buf.push(filter.n_hashes());
        }
    }
    buf
}

/// Encodes a leaf record. The payload length is signed: `-1` marks a
/// deletion marker with no payload.
pub fn encode_ln(ln: &Ln) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + ln.data().map_or(0, <[u8]>::len));
    push_varint(&mut buf, LOG_VERSION);
    buf.push(ln.kind().tag());
    match ln.data() {
        Some(data) => {
            push_varint_signed(&mut buf, data.len() as i64);
            buf.extend_from_slice(data);
        }
        None => push_varint_signed(&mut buf, -1),
    }
    if let Some(vlsn) = ln.vlsn() {
        push_varint(&mut buf, vlsn);
    }
    buf
}

/// Decodes any node record.
pub fn decode_node(buf: &[u8]) -> Result<DecodedNode> {
    let mut r = Reader::new(buf);
    let version = r.varint()?;
    ensure!(
        version >= MIN_LOG_VERSION,
        "unsupported log version {version}, minimum readable is {MIN_LOG_VERSION}"
    );
    ensure!(
        version <= LOG_VERSION,
        "record version {version} is newer than this release ({LOG_VERSION})"
    );
    let kind = NodeKind::from_tag(r.byte()?)?;

    let decoded = match kind {
        NodeKind::Internal | NodeKind::Bottom => DecodedNode::In(decode_in(&mut r, version, kind)?),
        NodeKind::BottomDelta => DecodedNode::Delta(decode_delta(&mut r, version)?),
        NodeKind::Leaf | NodeKind::LeafVersioned => DecodedNode::Ln(decode_ln(&mut r, kind)?),
    };
    ensure!(r.is_empty(), "trailing bytes in node record");
    Ok(decoded)
}

fn decode_in(r: &mut Reader<'_>, version: u64, kind: NodeKind) -> Result<In> {
    let flags = r.byte()?;
    let capacity = r.varint_usize()?;
    // A merged-over-capacity image is legal pending its next split, so the
    // count is not checked against the capacity here.
    let n = r.varint_usize()?;
    let ident_key = if flags & FLAG_HAS_IDENT != 0 {
        let len = r.varint_usize()?;
        Some(r.bytes(len)?.into())
    } else {
        None
    };

    let keys = decode_key_block(r, n)?;
    if version <= 7 {
        for _ in 0..n {
            r.varint()?;
        }
    }
    let lsns = decode_lsn_block(r, n)?;
    let states = decode_states(r, n)?;
    let sizes = if version >= 9 {
        let mut sizes = Vec::with_capacity(n);
        for _ in 0..n {
            sizes.push(r.varint()? as u32);
        }
        sizes
    } else {
        vec![0; n]
    };

    let mut in_ = In::from_parts(
        kind,
        ident_key,
        flags & FLAG_IS_ROOT != 0,
        capacity,
        keys,
        lsns,
        states,
        sizes,
    );
    in_.last_full_count = n as u32;
    Ok(in_)
}

fn decode_delta(r: &mut Reader<'_>, version: u64) -> Result<BinDelta> {
    let flags = r.byte()?;
    let full_lsn = Lsn::from_raw(u64::from_be_bytes(r.bytes(8)?.try_into()?));
    ensure!(!full_lsn.is_null(), "delta record with a null base LSN");
    let (full_entry_count, max_entries) = if version >= 10 {
        (r.varint()? as u32, r.varint_usize()?)
    } else {
        // Pre-10 deltas carry no base metadata; they can never take blind
        // inserts and always materialize on first use.
        (u32::MAX, 0)
    };
    let full_capacity = r.varint_usize()?;
    let ident_key = if flags & FLAG_HAS_IDENT != 0 {
        let len = r.varint_usize()?;
        Some(r.bytes(len)?.into())
    } else {
        None
    };

    let n = r.varint_usize()?;
    let keys = decode_key_block(r, n)?;
    let lsns = decode_lsn_block(r, n)?;
    let states = decode_states(r, n)?;
    let filter = if flags & FLAG_HAS_FILTER != 0 {
        let bits_len = r.varint_usize()?;
        let bits: Box<[u8]> = r.bytes(bits_len)?.into();
        let n_hashes = r.byte()?;
        ensure!(n_hashes > 0 && !bits.is_empty(), "degenerate membership filter");
        Some(KeyFilter::from_parts(bits, n_hashes))
    } else {
        None
    };

    Ok(BinDelta::from_parts(
        full_lsn,
        full_entry_count,
        full_capacity,
        max_entries,
        ident_key,
        keys,
        lsns,
        states,
        filter,
    ))
}

fn decode_ln(r: &mut Reader<'_>, kind: NodeKind) -> Result<Ln> {
    let len = r.varint_signed()?;
    let data: Option<Box<[u8]>> = match len {
        -1 => None,
        len if len >= 0 => Some(r.bytes(len as usize)?.into()),
        other => bail!("invalid leaf payload length {other}"),
    };
    let vlsn = if kind == NodeKind::LeafVersioned {
        Some(r.varint()?)
    } else {
        None
    };
    Ok(Ln::from_parts(data, vlsn))
}

fn encode_key_block(buf: &mut Vec<u8>, keys: &KeyStore, n: usize) {
    let prefix = keys.prefix();
    push_varint(buf, prefix.len() as u64);
    buf.extend_from_slice(prefix);
    for idx in 0..n {
        let suffix = keys.suffix(idx);
        push_varint(buf, suffix.len() as u64);
        buf.extend_from_slice(suffix);
    }
}

fn decode_key_block(r: &mut Reader<'_>, n: usize) -> Result<KeyStore> {
    let prefix_len = r.varint_usize()?;
    let prefix: Box<[u8]> = r.bytes(prefix_len)?.into();
    let mut suffixes = Vec::with_capacity(n);
    for _ in 0..n {
        let len = r.varint_usize()?;
        suffixes.push(r.bytes(len)?.into());
    }
    Ok(if prefix.is_empty() {
        KeyStore::Full(suffixes)
    } else {
        KeyStore::Prefixed { prefix, suffixes }
    })
}

fn encode_lsn_block(buf: &mut Vec<u8>, lsns: &LsnStore) {
    match lsns {
        LsnStore::Compact { base_file, slots } => {
            buf.push(1);
            push_varint(buf, u64::from(*base_file));
            for slot in slots {
                buf.extend_from_slice(slot);
            }
        }
        LsnStore::Full(lsns) => {
            buf.push(0);
            for lsn in lsns {
                buf.extend_from_slice(&lsn.raw().to_be_bytes());
            }
        }
    }
}

fn decode_lsn_block(r: &mut Reader<'_>, n: usize) -> Result<LsnStore> {
    match r.byte()? {
        1 => {
            let base_file = r.varint()? as u32;
            let mut slots = Vec::with_capacity(n);
            for _ in 0..n {
                slots.push(r.bytes(4)?.try_into()?);
            }
            Ok(LsnStore::Compact { base_file, slots })
        }
        0 => {
            let mut lsns = Vec::with_capacity(n);
            for _ in 0..n {
                lsns.push(Lsn::from_raw(u64::from_be_bytes(r.bytes(8)?.try_into()?)));
            }
            Ok(LsnStore::Full(lsns))
        }
        other => bail!("invalid LSN block tag: {other}"),
    }
}

fn decode_states(r: &mut Reader<'_>, n: usize) -> Result<Vec<u8>> {
    let raw = r.bytes(n)?;
    for (idx, &s) in raw.iter().enumerate() {
        ensure!(
            state::is_valid(s) && !state::is_dirty(s),
            "invalid persisted state byte {s:#04x} at slot {idx}"
        );
    }
    Ok(raw.to_vec())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, read) = decode_varint(self.buf)?;
        self.buf = &self.buf[read..];
        Ok(value)
    }

    fn varint_usize(&mut self) -> Result<usize> {
        Ok(self.varint()? as usize)
    }

    fn varint_signed(&mut self) -> Result<i64> {
        let (value, read) = decode_varint_signed(self.buf)?;
        self.buf = &self.buf[read..];
        Ok(value)
    }

    fn byte(&mut self) -> Result<u8> {
        ensure!(!self.buf.is_empty(), "record truncated");
        let b = self.buf[0];
        self.buf = &self.buf[1..];
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(self.buf.len() >= n, "record truncated: wanted {n} bytes");
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
