//! Error types for Stratum

use thiserror::Error;

use crate::memory::Tier;

/// Main error type for Stratum operations
#[derive(Error, Debug)]
pub enum StratumError {
    /// An index invariant was violated or persisted bytes failed validation
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// A vector did not match the dimensionality the index was built with
    #[error("Index corruption: expected {expected}-dimensional vector, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A tier is over budget and nothing could be demoted or evicted
    #[error("Capacity exceeded for {tier} tier (limit {limit})")]
    CapacityExceeded { tier: Tier, limit: usize },

    /// No vector could be obtained and lexical-only fallback is disabled
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Storage adapter errors (file system, remote store, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A migration sweep is already running
    #[error("A migration sweep is already in progress")]
    SweepInProgress,

    /// General errors
    #[error("{0}")]
    General(String),
}

impl StratumError {
    /// Whether this error must abort the surrounding operation outright.
    ///
    /// Fatal errors are never downgraded, not even by search fusion which
    /// otherwise drops a failing source and carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StratumError::IndexCorruption(_) | StratumError::DimensionMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(err: serde_json::Error) -> Self {
        StratumError::Serialization(err.to_string())
    }
}

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, StratumError>;
