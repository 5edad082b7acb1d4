//! Rank fusion across the vector and lexical result lists

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::index::{LexicalHit, VectorHit};

/// Default RRF smoothing constant
pub const DEFAULT_RRF_K: f32 = 60.0;

/// How per-source rankings are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Reciprocal Rank Fusion: sum of 1 / (k + rank)
    #[default]
    Rrf,
    /// Min-max normalized scores combined as a weighted sum
    Weighted,
}

/// Relative importance of each source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceWeights {
    pub vector: f32,
    pub lexical: f32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            vector: 1.0,
            lexical: 1.0,
        }
    }
}

/// One item of the fused ranking, with its 1-based rank in each source
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusedHit {
    pub id: Uuid,
    pub score: f32,
    pub vector_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

impl FusedHit {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            score: 0.0,
            vector_rank: None,
            lexical_rank: None,
        }
    }
}

/// Parameters for one fusion pass
#[derive(Debug, Clone, Copy)]
pub struct Fusion {
    pub strategy: FusionStrategy,
    pub rrf_k: f32,
    pub weights: SourceWeights,
}

impl Default for Fusion {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::default(),
            rrf_k: DEFAULT_RRF_K,
            weights: SourceWeights::default(),
        }
    }
}

impl Fusion {
    /// Merge the source lists into one ranking of at most `k` items.
    ///
    /// Each list must already be ordered best first. A `None` source was
    /// absent or dropped and contributes nothing.
    pub fn fuse(
        &self,
        vector: Option<&[VectorHit]>,
        lexical: Option<&[LexicalHit]>,
        k: usize,
    ) -> Vec<FusedHit> {
        let mut fused: HashMap<Uuid, FusedHit> = HashMap::new();

        if let Some(hits) = vector {
            let scores = match self.strategy {
                FusionStrategy::Rrf => self.reciprocal_ranks(hits.len()),
                FusionStrategy::Weighted => {
                    // Smaller distance is better, so normalize the negation.
                    let raw: Vec<f32> = hits.iter().map(|h| -h.distance).collect();
                    scale(min_max(&raw), self.weights.vector)
                }
            };
            for (rank, (hit, score)) in hits.iter().zip(scores).enumerate() {
                let entry = fused.entry(hit.id).or_insert_with(|| FusedHit::new(hit.id));
                entry.score += score;
                entry.vector_rank = Some(rank + 1);
            }
        }

        if let Some(hits) = lexical {
            let scores = match self.strategy {
                FusionStrategy::Rrf => self.reciprocal_ranks(hits.len()),
                FusionStrategy::Weighted => {
                    let raw: Vec<f32> = hits.iter().map(|h| h.score).collect();
                    scale(min_max(&raw), self.weights.lexical)
                }
            };
            for (rank, (hit, score)) in hits.iter().zip(scores).enumerate() {
                let entry = fused.entry(hit.id).or_insert_with(|| FusedHit::new(hit.id));
                entry.score += score;
                entry.lexical_rank = Some(rank + 1);
            }
        }

        let prefer_vector = self.weights.vector >= self.weights.lexical;
        let mut ranked: Vec<FusedHit> = fused.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    if prefer_vector {
                        compare_rank(a.vector_rank, b.vector_rank)
                    } else {
                        compare_rank(a.lexical_rank, b.lexical_rank)
                    }
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked.truncate(k);
        ranked
    }

    fn reciprocal_ranks(&self, len: usize) -> Vec<f32> {
        (1..=len).map(|rank| 1.0 / (self.rrf_k + rank as f32)).collect()
    }
}

/// Present ranks sort before absent ones, smaller first
fn compare_rank(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Rescale to [0, 1]; a constant list maps to all ones
fn min_max(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = max - min;
    values
        .iter()
        .map(|v| if span > 0.0 { (v - min) / span } else { 1.0 })
        .collect()
}

fn scale(values: Vec<f32>, weight: f32) -> Vec<f32> {
    values.into_iter().map(|v| v * weight).collect()
}
