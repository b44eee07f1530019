//! # LSN Storage
//!
//! Per-slot LSNs dominate an internal node's footprint, so they are held in
//! a compact form while every value fits: a node-local base file number plus
//! one 4-byte slot holding a signed 1-byte file-number delta and a 3-byte
//! file offset. The store mutates to full 64-bit LSNs when any value stops
//! fitting, and that mutation is one-directional: even if every later value
//! would fit the compact form again, the store stays wide. Reverting would
//! buy back a few bytes at the cost of re-checking every slot on every set.
//!
//! ## Compact Slot Layout
//!
//! ```text
//! [ file delta: i8 | offset: 3 bytes big-endian ]
//! ```
//!
//! The delta byte `-128` (`0x80`) is the null sentinel; valid deltas are
//! `-127..=127`, though after rebasing the base is always the minimum file
//! seen, so live deltas are non-negative.
//!
//! ## Promotion Triggers
//!
//! - a file-number delta outside the signed-byte range,
//! - a file offset above 24 bits,
//! - a rebase to a new minimum file that would overflow an existing slot.

use crate::lsn::Lsn;

const NULL_SLOT: [u8; 4] = [0x80, 0, 0, 0];
const MAX_DELTA: i64 = 127;

/// Per-slot LSN storage with a one-way compact-to-full representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsnStore {
    Compact { base_file: u32, slots: Vec<[u8; 4]> },
    Full(Vec<Lsn>),
}

impl Default for LsnStore {
    fn default() -> Self {
        Self::Compact {
            base_file: 0,
            slots: Vec::new(),
        }
    }
}

impl LsnStore {
    /// Empty store; `wide` starts (and stays) in the full representation.
    pub fn new(wide: bool) -> Self {
        if wide {
            Self::Full(Vec::new())
        } else {
            Self::default()
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Compact { slots, .. } => slots.len(),
            Self::Full(lsns) => lsns.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_compact(&self) -> bool {
        matches!(self, Self::Compact { .. })
    }

    pub fn base_file(&self) -> Option<u32> {
        match self {
            Self::Compact { base_file, .. } => Some(*base_file),
            Self::Full(_) => None,
        }
    }

    pub fn get(&self, idx: usize) -> Lsn {
        match self {
            Self::Compact { base_file, slots } => decode_slot(*base_file, slots[idx]),
            Self::Full(lsns) => lsns[idx],
        }
    }

    /// Stores `lsn` at `idx`, promoting to the full representation when the
    /// value cannot be expressed compactly.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn set(self, idx: usize, lsn: Lsn) -> Self {
        self.put(idx, lsn, false)
    }

    /// Inserts `lsn` at `idx`, shifting later slots right.
    #[must_use = "the mutator returns the representation to adopt"]
    pub fn insert(self, idx: usize, lsn: Lsn) -> Self {
        self.put(idx, lsn, true)
    }

    #[must_use = "the mutator returns the representation to adopt"]
    pub fn remove(self, idx: usize) -> Self {
        match self {
            Self::Compact {
                base_file,
                mut slots,
            } => {
                slots.remove(idx);
                Self::Compact { base_file, slots }
            }
            Self::Full(mut lsns) => {
                lsns.remove(idx);
                Self::Full(lsns)
            }
        }
    }

    fn put(self, idx: usize, lsn: Lsn, inserting: bool) -> Self {
        match self {
            Self::Full(mut lsns) => {
                if inserting {
                    lsns.insert(idx, lsn);
                } else {
                    lsns[idx] = lsn;
                }
                Self::Full(lsns)
            }
            Self::Compact {
                mut base_file,
                mut slots,
            } => {
                if lsn.is_null() {
                    if inserting {
                        slots.insert(idx, NULL_SLOT);
                    } else {
                        slots[idx] = NULL_SLOT;
                    }
                    return Self::Compact { base_file, slots };
                }

                if lsn.offset() > Lsn::MAX_COMPACT_OFFSET {
                    return promote(base_file, slots).put(idx, lsn, inserting);
                }

                let occupied = slots
                    .iter()
                    .enumerate()
                    .any(|(i, s)| *s != NULL_SLOT && !(i == idx && !inserting));
                if !occupied {
                    // First live value establishes the base.
                    base_file = lsn.file();
                }

                let mut delta = i64::from(lsn.file()) - i64::from(base_file);
                if delta < 0 {
                    // Rebase to the new minimum file, unless an existing
                    // slot's delta would overflow.
                    let shift = -delta;
                    let rebase_ok = slots.iter().enumerate().all(|(i, s)| {
                        *s == NULL_SLOT
                            || (i == idx && !inserting)
                            || i64::from(s[0] as i8) + shift <= MAX_DELTA
                    });
                    if !rebase_ok {
                        return promote(base_file, slots).put(idx, lsn, inserting);
                    }
                    for (i, slot) in slots.iter_mut().enumerate() {
                        if *slot != NULL_SLOT && !(i == idx && !inserting) {
                            slot[0] = ((slot[0] as i8) as i64 + shift) as u8;
                        }
                    }
                    base_file = lsn.file();
                    delta = 0;
                } else if delta > MAX_DELTA {
                    return promote(base_file, slots).put(idx, lsn, inserting);
                }

                let slot = encode_slot(delta as i8, lsn.offset());
                if inserting {
                    slots.insert(idx, slot);
                } else {
                    slots[idx] = slot;
                }
                Self::Compact { base_file, slots }
            }
        }
    }

    pub fn memory_size(&self) -> usize {
        match self {
            Self::Compact { slots, .. } => slots.len() * 4,
            Self::Full(lsns) => lsns.len() * std::mem::size_of::<Lsn>(),
        }
    }
}

fn encode_slot(delta: i8, offset: u32) -> [u8; 4] {
    let off = offset.to_be_bytes();
    [delta as u8, off[1], off[2], off[3]]
}

fn decode_slot(base_file: u32, slot: [u8; 4]) -> Lsn {
    if slot == NULL_SLOT {
        return Lsn::NULL;
    }
    let delta = slot[0] as i8;
    let file = (i64::from(base_file) + i64::from(delta)) as u32;
    let offset = u32::from_be_bytes([0, slot[1], slot[2], slot[3]]);
    Lsn::new(file, offset)
}

fn promote(base_file: u32, slots: Vec<[u8; 4]>) -> LsnStore {
    let lsns = slots
        .into_iter()
        .map(|slot| decode_slot(base_file, slot))
        .collect();
    LsnStore::Full(lsns)
}
