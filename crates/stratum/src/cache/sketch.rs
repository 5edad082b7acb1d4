//! Count-min frequency sketch
//!
//! A `depth x width` matrix of 4-bit saturating counters (stored one per
//! byte). Each key maps to one counter per row; the estimate is the row
//! minimum, so collisions can only inflate it. Every `sample_size`
//! recorded accesses all counters are halved, which ages out stale
//! popularity.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Counters saturate here, as in a nibble-packed sketch
pub const MAX_FREQUENCY: u8 = 15;

const ROW_SEEDS: [u64; 8] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0x85eb_ca77_c2b2_ae63,
    0x27d4_eb2f_1656_67c5,
    0x94d0_49bb_1331_11eb,
    0xbf58_476d_1ce4_e5b9,
    0xff51_afd7_ed55_8ccd,
];

/// Probabilistic access-frequency estimator
#[derive(Debug, Clone)]
pub struct FrequencySketch {
    table: Vec<u8>,
    depth: usize,
    width: usize,
    sample_size: usize,
    additions: usize,
    resets: u64,
}

impl FrequencySketch {
    /// Size a sketch for a cache holding `capacity` entries.
    ///
    /// Width is eight counters per entry rounded up to a power of two, and the
    /// table decays after `capacity * sample_factor` accesses.
    pub fn new(capacity: usize, depth: usize, sample_factor: usize) -> Self {
        let capacity = capacity.max(1);
        let depth = depth.clamp(1, ROW_SEEDS.len());
        let width = (capacity * 8).next_power_of_two().max(64);
        Self {
            table: vec![0; depth * width],
            depth,
            width,
            sample_size: capacity * sample_factor.max(1),
            additions: 0,
            resets: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Accesses between decay events
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// How many times the table has been halved
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Record one access to `key`
    pub fn increment<K: Hash + ?Sized>(&mut self, key: &K) {
        let hash = base_hash(key);
        for row in 0..self.depth {
            let slot = self.slot(hash, row);
            if self.table[slot] < MAX_FREQUENCY {
                self.table[slot] += 1;
            }
        }

        self.additions += 1;
        if self.additions >= self.sample_size {
            self.reset();
        }
    }

    /// Estimated access count for `key` since the last decay, capped at 15
    pub fn estimate<K: Hash + ?Sized>(&self, key: &K) -> u8 {
        let hash = base_hash(key);
        (0..self.depth)
            .map(|row| self.table[self.slot(hash, row)])
            .min()
            .unwrap_or(0)
    }

    /// Halve every counter
    pub fn reset(&mut self) {
        for counter in &mut self.table {
            *counter >>= 1;
        }
        self.additions = 0;
        self.resets += 1;
    }

    pub fn clear(&mut self) {
        self.table.fill(0);
        self.additions = 0;
    }

    fn slot(&self, hash: u64, row: usize) -> usize {
        let mixed = mix64(hash ^ ROW_SEEDS[row]);
        row * self.width + (mixed as usize & (self.width - 1))
    }
}

fn base_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// splitmix64 finalizer
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
