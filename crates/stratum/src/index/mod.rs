//! Vector and lexical indexes
//!
//! - [`HnswIndex`]: approximate nearest-neighbor graph over embeddings
//! - [`Bm25Index`]: inverted index with BM25 scoring

pub mod bm25;
pub mod distance;
pub mod hnsw;

pub use bm25::{Bm25Config, Bm25Index, LexicalHit, tokenize};
pub use distance::{DistanceMetric, cosine_similarity};
pub use hnsw::{HnswConfig, HnswIndex, VectorHit};
