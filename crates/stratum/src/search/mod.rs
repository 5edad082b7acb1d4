//! Hybrid vector + lexical search with rank fusion

pub mod fusion;
pub mod hybrid;

pub use fusion::{DEFAULT_RRF_K, FusedHit, Fusion, FusionStrategy, SourceWeights};
pub use hybrid::{HybridSearchEngine, IndexSizes, SearchConfig, SearchQuery};
