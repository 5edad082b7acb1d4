//! Importance decay for stored items
//!
//! An item's effective importance starts at its caller-assigned base value,
//! grows logarithmically with access count and decays exponentially with
//! idle time. It is always re-derived from the base, so repeated sweeps
//! never compound.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::memory::types::MemoryItem;

/// Configuration for importance calculation
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WeightConfig {
    /// Multiplier for access count logarithm (default: 0.1)
    #[serde(default = "default_access_multiplier")]
    pub access_multiplier: f32,
    /// Exponential decay rate per idle day (default: 0.1)
    #[serde(default = "default_decay_per_day")]
    pub decay_per_day: f32,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            access_multiplier: default_access_multiplier(),
            decay_per_day: default_decay_per_day(),
        }
    }
}

fn default_access_multiplier() -> f32 {
    0.1
}

fn default_decay_per_day() -> f32 {
    0.1
}

impl WeightConfig {
    pub fn new(access_multiplier: f32, decay_per_day: f32) -> Self {
        Self {
            access_multiplier,
            decay_per_day,
        }
    }
}

/// Calculate the effective importance of an item at `now`
///
/// Formula: base * (1 + access_multiplier * ln(access_count + 1)) * exp(-decay * idle_days)
///
/// Idle time is measured from the last access, not creation, so a frequently
/// read item keeps its standing regardless of age. The result is clamped to [0, 1].
pub fn effective_importance(item: &MemoryItem, config: &WeightConfig, now: DateTime<Utc>) -> f32 {
    let idle_days = idle_seconds(item, now) as f32 / 86_400.0;
    let access_factor = 1.0 + config.access_multiplier * (item.access_count as f32 + 1.0).ln();
    let decay_factor = (-config.decay_per_day * idle_days).exp();

    (item.importance * access_factor * decay_factor).clamp(0.0, 1.0)
}

/// Seconds since the item was last accessed, never negative
pub fn idle_seconds(item: &MemoryItem, now: DateTime<Utc>) -> u64 {
    (now - item.last_accessed).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_item(importance: f32, idle_days: i64, access_count: u32) -> (MemoryItem, DateTime<Utc>) {
        let mut item = MemoryItem::new("test").with_importance(importance);
        let now = item.last_accessed + Duration::days(idle_days);
        item.access_count = access_count;
        (item, now)
    }

    #[test]
    fn test_fresh_item_keeps_base_importance() {
        let (item, now) = create_test_item(0.6, 0, 0);
        let value = effective_importance(&item, &WeightConfig::default(), now);
        assert!((value - 0.6).abs() < 1e-6, "expected 0.6, got {value}");
    }

    #[test]
    fn test_decay_reduces_importance() {
        let config = WeightConfig::default();
        let (fresh, fresh_now) = create_test_item(0.6, 0, 0);
        let (stale, stale_now) = create_test_item(0.6, 10, 0);

        let fresh_value = effective_importance(&fresh, &config, fresh_now);
        let stale_value = effective_importance(&stale, &config, stale_now);

        assert!(stale_value < fresh_value);
        // exp(-0.1 * 10) = 0.3679
        assert!((stale_value - 0.6 * 0.3679).abs() < 1e-3, "got {stale_value}");
    }

    #[test]
    fn test_access_reinforces_importance() {
        let config = WeightConfig::default();
        let (rare, now) = create_test_item(0.5, 1, 0);
        let (frequent, _) = create_test_item(0.5, 1, 50);

        assert!(
            effective_importance(&frequent, &config, now) > effective_importance(&rare, &config, now)
        );
    }

    #[test]
    fn test_result_is_clamped() {
        let config = WeightConfig::new(5.0, 0.0);
        let (item, now) = create_test_item(1.0, 0, 1000);
        assert_eq!(effective_importance(&item, &config, now), 1.0);

        let (item, now) = create_test_item(0.0, 3, 0);
        assert_eq!(effective_importance(&item, &config, now), 0.0);
    }

    #[test]
    fn test_idle_seconds_never_negative() {
        let item = MemoryItem::new("future");
        let earlier = item.last_accessed - Duration::hours(1);
        assert_eq!(idle_seconds(&item, earlier), 0);
    }
}
