//! Memory types for the Stratum engine
//!
//! Defines the stored item and the lifecycle tiers it moves through.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default base importance for items that do not specify one
pub const DEFAULT_IMPORTANCE: f32 = 0.5;

/// A single stored unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Stable identifier
    pub id: Uuid,
    /// The content payload
    pub content: String,
    /// Optional embedding; computed by the engine's provider when absent
    pub embedding: Option<Vec<f32>>,
    /// Lifecycle tier the item currently occupies
    pub tier: Tier,
    /// Base importance assigned by the caller (0.0 to 1.0)
    pub importance: f32,
    /// Importance after decay and access reinforcement, re-derived from `importance`
    pub effective_importance: f32,
    /// When this item was first stored
    pub created_at: DateTime<Utc>,
    /// When this item was last read or written
    pub last_accessed: DateTime<Utc>,
    /// How many times this item has been accessed
    pub access_count: u32,
    /// Whether `content` holds a compressed representation
    pub compressed: bool,
    /// Reference to the compressed form, handed out by the compressor
    pub compressed_ref: Option<String>,
    /// Arbitrary caller metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryItem {
    /// Create a new item in the working tier
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            embedding: None,
            tier: Tier::Working,
            importance: DEFAULT_IMPORTANCE,
            effective_importance: DEFAULT_IMPORTANCE,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            compressed: false,
            compressed_ref: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.set_importance(importance);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Update the base importance of this item, clamped to [0, 1].
    /// NaN falls back to [`DEFAULT_IMPORTANCE`].
    pub fn set_importance(&mut self, importance: f32) {
        self.importance = if importance.is_nan() {
            DEFAULT_IMPORTANCE
        } else {
            importance.clamp(0.0, 1.0)
        };
        self.effective_importance = self.importance;
    }

    /// Mark this item as accessed at `now`
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now;
    }

    /// Bytes counted against tier byte budgets
    pub fn size_bytes(&self) -> usize {
        self.content.len()
    }
}

/// Lifecycle stage of an item, hottest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Recently written or accessed
    Working,
    /// Idle for a while but still likely to be needed
    ShortTerm,
    /// Rarely accessed, content kept only in storage
    LongTerm,
    /// Coldest tier; the only one items are evicted from
    Archival,
}

impl Tier {
    /// All tiers, hottest first
    pub const ALL: [Tier; 4] = [Tier::Working, Tier::ShortTerm, Tier::LongTerm, Tier::Archival];

    pub fn index(self) -> usize {
        match self {
            Tier::Working => 0,
            Tier::ShortTerm => 1,
            Tier::LongTerm => 2,
            Tier::Archival => 3,
        }
    }

    /// The next tier down, or `None` for archival
    pub fn colder(self) -> Option<Tier> {
        match self {
            Tier::Working => Some(Tier::ShortTerm),
            Tier::ShortTerm => Some(Tier::LongTerm),
            Tier::LongTerm => Some(Tier::Archival),
            Tier::Archival => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::ShortTerm => "short_term",
            Tier::LongTerm => "long_term",
            Tier::Archival => "archival",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_creation() {
        let item = MemoryItem::new("The user prefers dark mode");

        assert_eq!(item.content, "The user prefers dark mode");
        assert_eq!(item.tier, Tier::Working);
        assert_eq!(item.importance, DEFAULT_IMPORTANCE);
        assert_eq!(item.access_count, 0);
        assert!(!item.compressed);
        assert!(item.embedding.is_none());
        assert!(item.metadata.is_empty());
    }

    #[test]
    fn test_item_set_importance_clamps() {
        let mut item = MemoryItem::new("Test");

        item.set_importance(0.8);
        assert_eq!(item.importance, 0.8);

        item.set_importance(1.5);
        assert_eq!(item.importance, 1.0);

        item.set_importance(-0.5);
        assert_eq!(item.importance, 0.0);
        assert_eq!(item.effective_importance, 0.0);

        item.set_importance(f32::NAN);
        assert_eq!(item.importance, DEFAULT_IMPORTANCE);
    }

    #[test]
    fn test_mark_accessed() {
        let mut item = MemoryItem::new("Test");
        let later = item.last_accessed + chrono::Duration::minutes(5);

        item.mark_accessed(later);

        assert_eq!(item.access_count, 1);
        assert_eq!(item.last_accessed, later);
    }

    #[test]
    fn test_tier_ordering_and_colder() {
        assert!(Tier::Working < Tier::Archival);
        assert_eq!(Tier::Working.colder(), Some(Tier::ShortTerm));
        assert_eq!(Tier::LongTerm.colder(), Some(Tier::Archival));
        assert_eq!(Tier::Archival.colder(), None);

        for (i, tier) in Tier::ALL.iter().enumerate() {
            assert_eq!(tier.index(), i);
        }
    }

    #[test]
    fn test_tier_serializes_snake_case() {
        let json = serde_json::to_string(&Tier::ShortTerm).expect("Failed to serialize");
        assert_eq!(json, "\"short_term\"");

        let tier: Tier = serde_json::from_str("\"long_term\"").expect("Failed to deserialize");
        assert_eq!(tier, Tier::LongTerm);
    }

    #[test]
    fn test_item_metadata_serialization() {
        let item = MemoryItem::new("with metadata")
            .with_metadata("source", serde_json::json!("chat"))
            .with_embedding(vec![0.25, -0.5]);

        let json = serde_json::to_string(&item).expect("Failed to serialize");
        let back: MemoryItem = serde_json::from_str(&json).expect("Failed to deserialize");

        assert_eq!(back, item);
    }
}
