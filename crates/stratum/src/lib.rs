//! Stratum - tiered memory store with hybrid retrieval
//!
//! Items are stored with an embedding and indexed twice: in an HNSW graph
//! for nearest-neighbor search and in a BM25 inverted index for keyword
//! search. Queries fuse both rankings. Items age through four tiers
//! (working, short_term, long_term, archival) as they go idle, reads are
//! served through a W-TinyLFU admission cache, and everything is persisted
//! through a pluggable storage adapter.
//!
//! Start from [`engine::MemoryEngine`].

pub mod cache;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod memory;
pub mod search;
pub mod storage;
pub mod testing;

pub use engine::MemoryEngine;
pub use error::StratumError;
