//! Eviction priority, protection and capacity status
//!
//! Used by the tier manager when a tier runs over its item or byte budget
//! to decide which items to demote first and which may never be evicted.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::MAX_FREQUENCY;
use crate::memory::{MemoryItem, WeightConfig, effective_importance, idle_seconds};

/// Usage ratio at which a tier reports [`CapacityStatus::Warning`]
pub const WARNING_RATIO: f32 = 0.8;

/// How full a tier is relative to its budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityStatus {
    /// Below the warning ratio, or no budget configured
    Normal,
    /// At or above the warning ratio
    Warning,
    /// Exactly at budget; the next admission needs relief first
    Full,
    /// Over budget until the next sweep or store relieves it
    Over,
}

impl CapacityStatus {
    /// Status for a tier holding `items` entries totalling `bytes`
    pub fn for_usage(items: usize, bytes: u64, max_items: Option<usize>, max_bytes: Option<u64>) -> Self {
        let item_ratio = max_items.map(|max| ratio(items as f64, max as f64));
        let byte_ratio = max_bytes.map(|max| ratio(bytes as f64, max as f64));
        let Some(usage) = item_ratio.into_iter().chain(byte_ratio).reduce(f64::max) else {
            return CapacityStatus::Normal;
        };

        if usage > 1.0 {
            CapacityStatus::Over
        } else if usage >= 1.0 {
            CapacityStatus::Full
        } else if usage >= f64::from(WARNING_RATIO) {
            CapacityStatus::Warning
        } else {
            CapacityStatus::Normal
        }
    }
}

fn ratio(used: f64, max: f64) -> f64 {
    if max <= 0.0 {
        if used > 0.0 { f64::INFINITY } else { 1.0 }
    } else {
        used / max
    }
}

/// An item under consideration for demotion or eviction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: Uuid,
    pub priority: f32,
    pub protected: bool,
    pub last_accessed: DateTime<Utc>,
}

/// Scores items for relief under capacity pressure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Base importance at or above which an item is never evicted (default: 0.9)
    pub protected_importance: f32,
    /// Items read within this many seconds are never evicted (default: 3600)
    pub recent_access_secs: u64,
    pub weight: WeightConfig,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            protected_importance: 0.9,
            recent_access_secs: 3600,
            weight: WeightConfig::default(),
        }
    }
}

impl EvictionPolicy {
    pub fn new(protected_importance: f32, recent_access_secs: u64, weight: WeightConfig) -> Self {
        Self {
            protected_importance,
            recent_access_secs,
            weight,
        }
    }

    /// Higher means keep longer.
    ///
    /// priority = effective importance
    ///          + 0.3 / (1 + idle_hours / 24)
    ///          + 0.2 * frequency / MAX_FREQUENCY
    pub fn priority(&self, item: &MemoryItem, frequency: u8, now: DateTime<Utc>) -> f32 {
        let effective = effective_importance(item, &self.weight, now);
        let idle_hours = idle_seconds(item, now) as f32 / 3600.0;
        let recency_bonus = 0.3 / (1.0 + idle_hours / 24.0);
        let frequency_bonus = 0.2 * f32::from(frequency.min(MAX_FREQUENCY)) / f32::from(MAX_FREQUENCY);

        effective + recency_bonus + frequency_bonus
    }

    /// Protected items may be demoted but never evicted
    pub fn is_protected(&self, item: &MemoryItem, now: DateTime<Utc>) -> bool {
        idle_seconds(item, now) < self.recent_access_secs || item.importance >= self.protected_importance
    }

    pub fn candidate(&self, item: &MemoryItem, frequency: u8, now: DateTime<Utc>) -> Candidate {
        Candidate {
            id: item.id,
            priority: self.priority(item, frequency, now),
            protected: self.is_protected(item, now),
            last_accessed: item.last_accessed,
        }
    }

    /// Order candidates so the first should go first: unprotected before
    /// protected, then lowest priority, then least recently used.
    pub fn order(&self, candidates: &mut [Candidate]) {
        candidates.sort_by(|a, b| {
            a.protected
                .cmp(&b.protected)
                .then_with(|| a.priority.partial_cmp(&b.priority).unwrap_or(Ordering::Equal))
                .then_with(|| a.last_accessed.cmp(&b.last_accessed))
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
