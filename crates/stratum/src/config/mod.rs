use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CacheConfig;
use crate::error::{Result, StratumError};
use crate::index::{Bm25Config, HnswConfig};
use crate::memory::WeightConfig;
use crate::search::SearchConfig;
use crate::storage::TierConfig;

/// Main configuration structure for Stratum
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Where the file storage adapter keeps item envelopes
    #[serde(default)]
    pub storage: StorageConfig,
    /// HNSW graph parameters
    #[serde(default)]
    pub vector: HnswConfig,
    /// BM25 parameters
    #[serde(default)]
    pub lexical: Bm25Config,
    /// Fusion strategy and per-source limits
    #[serde(default)]
    pub search: SearchConfig,
    /// Admission cache sizing
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-tier thresholds, budgets and residency
    #[serde(default)]
    pub tiers: TierConfig,
    /// Importance decay
    #[serde(default)]
    pub weight: WeightConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Parse a TOML document; missing sections and fields take defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StratumError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StratumError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Locations searched, in order, when no path is given explicitly
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::home_dir().map(|h| h.join(".stratum").join("config.toml")),
            dirs::config_dir().map(|c| c.join("stratum").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Storage location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one envelope file per item
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".stratum").join("data"))
        .unwrap_or_else(|| PathBuf::from(".stratum/data"))
}

/// Engine behavior switches
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Store and search without a vector when the embedding provider fails
    #[serde(default = "default_lexical_fallback")]
    pub lexical_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lexical_fallback: default_lexical_fallback(),
        }
    }
}

fn default_lexical_fallback() -> bool {
    true
}
