//! Frequency-aware admission cache
//!
//! - [`FrequencySketch`]: count-min estimator of access frequency
//! - [`AdmissionCache`]: W-TinyLFU cache built on a slot-array LRU

pub mod sketch;
pub mod slab;
pub mod tinylfu;

pub use sketch::{FrequencySketch, MAX_FREQUENCY};
pub use slab::Segment;
pub use tinylfu::{AdmissionCache, CacheConfig, CacheStats, SegmentSizes};
