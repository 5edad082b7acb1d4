//! Embedding providers
//!
//! The engine never computes vectors itself; it calls an injected
//! [`EmbeddingProvider`]. [`HashEmbedder`] is a dependency-free provider used
//! by the maintenance binary and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::{Result, StratumError};
use crate::index::tokenize;

/// Default dimensionality of [`HashEmbedder`] vectors
pub const EMBEDDING_DIMENSION: usize = 384;

/// Supplies fixed-length vectors for content. Failures may be transient.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;
}

/// Feature-hashing embedder.
///
/// Each token is hashed to a signed bucket and the counts are L2
/// normalized, so texts sharing words point in similar directions.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIMENSION)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if tokenize(text).is_empty() {
            return Err(StratumError::Embedding("no indexable tokens in text".to_string()));
        }
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let embedder = HashEmbedder::new(64);
        let v = embedder.embed("tiered memory with hybrid retrieval").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashEmbedder::default();
        let base = embedder.embed("rust ownership and borrowing rules").await.unwrap();
        let near = embedder.embed("ownership rules in rust").await.unwrap();
        let far = embedder.embed("banana bread recipe").await.unwrap();

        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[tokio::test]
    async fn test_stop_words_only_is_an_error() {
        let embedder = HashEmbedder::default();
        assert!(matches!(embedder.embed("the and of").await, Err(StratumError::Embedding(_))));
    }
}
