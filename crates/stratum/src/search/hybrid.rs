//! Hybrid retrieval over the vector and lexical indexes
//!
//! Both indexes are searched on the blocking pool in parallel. A source
//! that times out or fails with a recoverable error is dropped and the
//! other source's ranking is used alone; index corruption still aborts
//! the query.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::index::{Bm25Config, Bm25Index, HnswConfig, HnswIndex, tokenize};
use crate::search::fusion::{DEFAULT_RRF_K, Fusion, FusedHit, FusionStrategy, SourceWeights};

/// Search and fusion defaults
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub fusion: FusionStrategy,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_weight")]
    pub lexical_weight: f32,
    /// Each source returns `k * candidate_multiplier` hits before fusion
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Per-source time limit applied when a query does not set its own
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fusion: FusionStrategy::default(),
            rrf_k: default_rrf_k(),
            vector_weight: default_weight(),
            lexical_weight: default_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            timeout_ms: None,
        }
    }
}

fn default_rrf_k() -> f32 {
    DEFAULT_RRF_K
}

fn default_weight() -> f32 {
    1.0
}

fn default_candidate_multiplier() -> usize {
    3
}

/// A hybrid query. Either input may be absent; its source is then skipped.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub k: usize,
    pub weights: Option<SourceWeights>,
    pub timeout: Option<Duration>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>, k: usize) -> Self {
        Self {
            text: Some(text.into()),
            k,
            ..Default::default()
        }
    }

    pub fn vector(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector: Some(vector),
            k,
            ..Default::default()
        }
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_weights(mut self, weights: SourceWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Index occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSizes {
    pub vector_live: usize,
    pub vector_tombstones: usize,
    pub lexical_documents: usize,
    pub lexical_terms: usize,
}

/// Owns both indexes and fuses their rankings
#[derive(Debug)]
pub struct HybridSearchEngine {
    vector: Arc<RwLock<HnswIndex>>,
    lexical: Arc<RwLock<Bm25Index>>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(hnsw: HnswConfig, bm25: Bm25Config, config: SearchConfig) -> Self {
        Self {
            vector: Arc::new(RwLock::new(HnswIndex::new(hnsw))),
            lexical: Arc::new(RwLock::new(Bm25Index::new(bm25))),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Reject a vector the vector index would refuse, without mutating anything
    pub fn check_vector(&self, vector: &[f32]) -> Result<()> {
        self.vector
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .check_vector(vector)
    }

    /// Index (or re-index) an item's vector and text.
    ///
    /// Without a vector, any vector previously indexed under `id` is removed.
    pub fn index(&self, id: Uuid, vector: Option<Vec<f32>>, text: &str) -> Result<()> {
        {
            let mut index = self.vector.write().unwrap_or_else(PoisonError::into_inner);
            match vector {
                Some(vector) => index.insert(id, vector)?,
                None => {
                    index.remove(&id);
                }
            }
        }

        let tokens = tokenize(text);
        self.lexical
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .index(id, &tokens);
        Ok(())
    }

    /// Replace only the lexical postings of an item
    pub fn reindex_text(&self, id: Uuid, text: &str) {
        let tokens = tokenize(text);
        self.lexical
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .index(id, &tokens);
    }

    /// Remove an item from both indexes. Returns `true` if either held it.
    pub fn remove(&self, id: &Uuid) -> bool {
        let from_vector = self
            .vector
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        let from_lexical = self
            .lexical
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        from_vector || from_lexical
    }

    /// Run both sources and fuse them into at most `query.k` hits
    pub async fn query(&self, query: &SearchQuery) -> Result<Vec<FusedHit>> {
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let fetch = query.k.saturating_mul(self.config.candidate_multiplier.max(1));
        let timeout = query
            .timeout
            .or_else(|| self.config.timeout_ms.map(Duration::from_millis));

        let vector_source = async {
            let Some(vector) = query.vector.clone() else {
                return Ok(None);
            };
            let index = Arc::clone(&self.vector);
            run_source("vector", timeout, move || {
                let index = index.read().unwrap_or_else(PoisonError::into_inner);
                let ef = index.config().ef_search.max(fetch);
                index.search(&vector, fetch, ef)
            })
            .await
        };

        let lexical_source = async {
            let Some(text) = query.text.as_deref() else {
                return Ok(None);
            };
            let tokens = tokenize(text);
            let index = Arc::clone(&self.lexical);
            run_source("lexical", timeout, move || {
                let index = index.read().unwrap_or_else(PoisonError::into_inner);
                Ok(index.search(&tokens, fetch))
            })
            .await
        };

        let (vector_hits, lexical_hits) = tokio::join!(vector_source, lexical_source);
        let vector_hits = vector_hits?;
        let lexical_hits = lexical_hits?;

        let fusion = Fusion {
            strategy: self.config.fusion,
            rrf_k: self.config.rrf_k,
            weights: query.weights.unwrap_or(SourceWeights {
                vector: self.config.vector_weight,
                lexical: self.config.lexical_weight,
            }),
        };
        Ok(fusion.fuse(vector_hits.as_deref(), lexical_hits.as_deref(), query.k))
    }

    pub fn sizes(&self) -> IndexSizes {
        let vector = self.vector.read().unwrap_or_else(PoisonError::into_inner);
        let lexical = self.lexical.read().unwrap_or_else(PoisonError::into_inner);
        IndexSizes {
            vector_live: vector.len(),
            vector_tombstones: vector.tombstone_count(),
            lexical_documents: lexical.len(),
            lexical_terms: lexical.term_count(),
        }
    }

    /// Ids live in the vector index
    pub fn vector_ids(&self) -> Vec<Uuid> {
        self.vector
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .live_ids()
    }

    /// Compact the vector graph if its tombstone share exceeds the configured ratio
    pub fn compact_if_needed(&self) -> usize {
        let mut index = self.vector.write().unwrap_or_else(PoisonError::into_inner);
        if index.tombstone_ratio() > index.config().compaction_ratio {
            index.compact()
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.vector
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .validate()
    }
}

/// Run one CPU-bound search on the blocking pool.
///
/// `Ok(None)` means the source was dropped; only fatal errors propagate.
async fn run_source<T, F>(name: &'static str, timeout: Option<Duration>, search: F) -> Result<Option<Vec<T>>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<Vec<T>> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(search);
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(source = name, ?limit, "Search source timed out, dropping it");
                return Ok(None);
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(Ok(hits)) => Ok(Some(hits)),
        Ok(Err(e)) if e.is_fatal() => Err(e),
        Ok(Err(e)) => {
            tracing::warn!(source = name, error = %e, "Search source failed, dropping it");
            Ok(None)
        }
        Err(e) => {
            tracing::warn!(source = name, error = %e, "Search task panicked, dropping it");
            Ok(None)
        }
    }
}
