//! W-TinyLFU admission cache
//!
//! New entries land in a small LRU *window*. Entries falling out of the
//! window become admission candidates for the main space, which is split
//! into *probation* and *protected* LRU segments. When the cache is full a
//! candidate only displaces probation's LRU victim if the frequency sketch
//! says it is accessed more often; ties keep the victim. A hit in probation
//! promotes the entry to protected, and protected overflow is demoted back
//! to probation's head.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::cache::sketch::FrequencySketch;
use crate::cache::slab::{Segment, SegmentedSlab};

/// Admission cache sizing
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum resident entries across all segments
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Share of capacity given to the window segment (default: 0.01)
    #[serde(default = "default_window_fraction")]
    pub window_fraction: f64,
    /// Share of capacity given to the probation segment (default: 0.20)
    #[serde(default = "default_probation_fraction")]
    pub probation_fraction: f64,
    /// Rows in the frequency sketch
    #[serde(default = "default_sketch_depth")]
    pub sketch_depth: usize,
    /// The sketch decays every `capacity * sample_factor` lookups
    #[serde(default = "default_sample_factor")]
    pub sample_factor: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_fraction: default_window_fraction(),
            probation_fraction: default_probation_fraction(),
            sketch_depth: default_sketch_depth(),
            sample_factor: default_sample_factor(),
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }
}

fn default_capacity() -> usize {
    1024
}

fn default_window_fraction() -> f64 {
    0.01
}

fn default_probation_fraction() -> f64 {
    0.20
}

fn default_sketch_depth() -> usize {
    4
}

fn default_sample_factor() -> usize {
    10
}

/// Configured maximum size of each segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentSizes {
    pub window: usize,
    pub probation: usize,
    pub protected: usize,
}

impl SegmentSizes {
    /// Split `capacity` by the given fractions; protected takes the remainder.
    ///
    /// A non-empty cache always has a window of at least one entry.
    pub fn for_capacity(capacity: usize, window_fraction: f64, probation_fraction: f64) -> Self {
        if capacity == 0 {
            return Self {
                window: 0,
                probation: 0,
                protected: 0,
            };
        }
        let window = ((capacity as f64 * window_fraction).round() as usize).clamp(1, capacity);
        let probation =
            ((capacity as f64 * probation_fraction).round() as usize).min(capacity - window);
        Self {
            window,
            probation,
            protected: capacity - window - probation,
        }
    }
}

/// Hit and miss counters plus occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Candidates discarded by the frequency comparison
    pub rejections: u64,
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Frequency-aware segmented LRU cache.
///
/// Methods take `&mut self`; share it behind a `Mutex` so segment
/// transitions from concurrent callers never interleave.
#[derive(Debug)]
pub struct AdmissionCache<K, V> {
    capacity: usize,
    sizes: SegmentSizes,
    index: HashMap<K, usize>,
    slab: SegmentedSlab<K, V>,
    sketch: FrequencySketch,
    hits: u64,
    misses: u64,
    rejections: u64,
}

impl<K, V> AdmissionCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = config.capacity;
        Self {
            capacity,
            sizes: SegmentSizes::for_capacity(
                capacity,
                config.window_fraction,
                config.probation_fraction,
            ),
            index: HashMap::with_capacity(capacity),
            slab: SegmentedSlab::with_capacity(capacity),
            sketch: FrequencySketch::new(capacity, config.sketch_depth, config.sample_factor),
            hits: 0,
            misses: 0,
            rejections: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&CacheConfig::with_capacity(capacity))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sizes(&self) -> SegmentSizes {
        self.sizes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Segment currently holding `key`
    pub fn segment_of(&self, key: &K) -> Option<Segment> {
        self.index.get(key).and_then(|&idx| self.slab.segment(idx))
    }

    /// Current sketch estimate for `key`
    pub fn frequency(&self, key: &K) -> u8 {
        self.sketch.estimate(key)
    }

    /// Number of entries resident in `segment`
    pub fn segment_len(&self, segment: Segment) -> usize {
        self.slab.len(segment)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            rejections: self.rejections,
            len: self.len(),
            capacity: self.capacity,
        }
    }

    /// Look up `key`, recording the access in the frequency sketch.
    ///
    /// A probation hit promotes the entry to protected; other hits refresh
    /// recency within their segment.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.sketch.increment(key);

        let Some(&idx) = self.index.get(key) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;

        match self.slab.segment(idx) {
            Some(Segment::Probation) => {
                self.slab.move_to_front(idx, Segment::Protected);
                self.demote_protected_overflow();
            }
            Some(segment) => self.slab.move_to_front(idx, segment),
            None => {}
        }
        self.slab.value(idx)
    }

    /// Look up `key` without touching recency, frequency or stats
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index.get(key).and_then(|&idx| self.slab.value(idx))
    }

    /// Insert or update an entry.
    ///
    /// Existing keys are updated in place. New keys enter the window, and
    /// window overflow runs the admission check.
    pub fn set(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slab.value_mut(idx) {
                *slot = value;
            }
            return;
        }

        let idx = self.slab.insert_front(key.clone(), value, Segment::Window);
        self.index.insert(key, idx);

        if self.slab.len(Segment::Window) > self.sizes.window {
            self.evict_from_window();
        }
    }

    /// Drop an entry, returning its value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.slab.remove(idx).map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slab.clear();
        self.sketch.clear();
    }

    fn evict_from_window(&mut self) {
        let Some(candidate) = self.slab.tail(Segment::Window) else {
            return;
        };

        // Probation may use whatever protected has not claimed yet.
        if self.slab.total() <= self.capacity {
            self.slab.move_to_front(candidate, Segment::Probation);
            return;
        }

        let victim = self
            .slab
            .tail(Segment::Probation)
            .or_else(|| self.slab.tail(Segment::Protected));
        let Some(victim) = victim else {
            self.discard(candidate);
            return;
        };

        let candidate_freq = self.slab.key(candidate).map_or(0, |k| self.sketch.estimate(k));
        let victim_freq = self.slab.key(victim).map_or(0, |k| self.sketch.estimate(k));

        if candidate_freq > victim_freq {
            self.discard(victim);
            self.slab.move_to_front(candidate, Segment::Probation);
        } else {
            self.discard(candidate);
            self.rejections += 1;
        }
    }

    fn demote_protected_overflow(&mut self) {
        while self.slab.len(Segment::Protected) > self.sizes.protected {
            match self.slab.tail(Segment::Protected) {
                Some(tail) => self.slab.move_to_front(tail, Segment::Probation),
                None => break,
            }
        }
    }

    fn discard(&mut self, idx: usize) {
        if let Some((key, _)) = self.slab.remove(idx) {
            self.index.remove(&key);
        }
    }
}
