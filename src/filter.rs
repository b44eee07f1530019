//! # Membership Summary
//!
//! A small bloom filter attached to a logged BIN-delta, summarizing the keys
//! of the *full* image the delta is based on. It answers "is this key
//! definitely absent from the full image?" which lets an insertion go blindly
//! into the delta without fetching and merging the full image first.
//!
//! False positives only cost a materialization that would otherwise be
//! avoided; a false negative would corrupt the tree (a duplicate slot), so
//! the filter must never produce one. Double hashing over a 64-bit FNV-1a
//! base keeps the encoding to the bit array plus one hash-count byte.

const BITS_PER_KEY: usize = 10;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Probabilistic set of the keys in a BIN full image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    bits: Box<[u8]>,
    n_hashes: u8,
}

impl KeyFilter {
    /// Sizes the filter for `expected` keys at roughly 1% false positives.
    pub fn with_capacity(expected: usize) -> Self {
        let n_bits = (expected.max(1) * BITS_PER_KEY).next_multiple_of(8);
        Self {
            bits: vec![0u8; n_bits / 8].into_boxed_slice(),
            n_hashes: 3,
        }
    }

    pub fn from_parts(bits: Box<[u8]>, n_hashes: u8) -> Self {
        Self { bits, n_hashes }
    }

    pub fn insert(&mut self, key: &[u8]) {
        let n_bits = self.bits.len() * 8;
        let (h1, h2) = hash_pair(key);
        for i in 0..u64::from(self.n_hashes) {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % n_bits as u64) as usize;
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// False means definitely absent; true means possibly present.
    pub fn maybe_contains(&self, key: &[u8]) -> bool {
        let n_bits = self.bits.len() * 8;
        let (h1, h2) = hash_pair(key);
        (0..u64::from(self.n_hashes)).all(|i| {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % n_bits as u64) as usize;
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn n_hashes(&self) -> u8 {
        self.n_hashes
    }

    pub fn memory_size(&self) -> usize {
        self.bits.len()
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    let mut h = FNV_OFFSET;
    for &byte in key {
        h ^= u64::from(byte);
        h = h.wrapping_mul(FNV_PRIME);
    }
    // Mix for the second hash; must be odd so the stride cycles all bits.
    let h2 = (h >> 17 | h << 47) | 1;
    (h, h2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_reported_present() {
        let mut filter = KeyFilter::with_capacity(64);
        for i in 0..64u32 {
            filter.insert(&i.to_be_bytes());
        }
        for i in 0..64u32 {
            assert!(filter.maybe_contains(&i.to_be_bytes()));
        }
    }

    #[test]
    fn absent_keys_are_mostly_rejected() {
        let mut filter = KeyFilter::with_capacity(128);
        for i in 0..128u32 {
            filter.insert(&i.to_be_bytes());
        }
        let false_positives = (1000..2000u32)
            .filter(|i| filter.maybe_contains(&i.to_be_bytes()))
            .count();
        // 1% target; allow generous slack before calling it broken.
        assert!(false_positives < 100, "{false_positives} false positives");
    }

    #[test]
    fn empty_filter_rejects_everything() {
        let filter = KeyFilter::with_capacity(16);
        assert!(!filter.maybe_contains(b"anything"));
    }

    #[test]
    fn round_trips_through_parts() {
        let mut filter = KeyFilter::with_capacity(8);
        filter.insert(b"key");
        let rebuilt = KeyFilter::from_parts(filter.bits().into(), filter.n_hashes());
        assert_eq!(rebuilt, filter);
        assert!(rebuilt.maybe_contains(b"key"));
    }
}
