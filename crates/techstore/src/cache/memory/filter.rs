//! In-process Bloom filter.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Sizing of the Bloom filters created by [`MemoryCache`](super::MemoryCache).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    /// Number of items the filter is sized for.
    pub capacity: usize,
    /// Target false-positive rate at `capacity` items, in (0, 1).
    pub false_positive_rate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            false_positive_rate: 0.01,
        }
    }
}

/// A fixed-size Bloom filter over strings.
///
/// Uses double hashing (`h1 + i * h2`) to derive the bit positions.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    pub fn new(config: FilterConfig) -> Self {
        let n = config.capacity.max(1) as f64;
        let p = if config.false_positive_rate > 0.0 && config.false_positive_rate < 1.0 {
            config.false_positive_rate
        } else {
            FilterConfig::default().false_positive_rate
        };
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 32.0) as u32;
        let words = num_bits.div_ceil(64) as usize;

        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes,
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Adds `item`. Returns true if the item was not already (probably) present.
    pub fn insert(&mut self, item: &str) -> bool {
        let mut added = false;
        for index in self.positions(item) {
            let (word, mask) = Self::locate(index);
            if self.bits[word] & mask == 0 {
                self.bits[word] |= mask;
                added = true;
            }
        }
        added
    }

    pub fn contains(&self, item: &str) -> bool {
        self.positions(item).all(|index| {
            let (word, mask) = Self::locate(index);
            self.bits[word] & mask != 0
        })
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> {
        let h1 = hash_with_seed(item, 0);
        // Odd step so consecutive positions never collapse onto one bit
        let h2 = hash_with_seed(item, 0x9e37_79b9_7f4a_7c15) | 1;
        let num_bits = self.num_bits;

        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }

    fn locate(index: u64) -> (usize, u64) {
        ((index / 64) as usize, 1u64 << (index % 64))
    }
}

fn hash_with_seed(item: &str, seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    item.hash(&mut hasher);
    hasher.finish()
}
