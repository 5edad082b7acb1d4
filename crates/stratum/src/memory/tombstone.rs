//! Records of items that left the engine
//!
//! Every eviction and explicit delete produces an [`EvictionRecord`]. Records
//! are returned to the caller in sweep and delete results and handed to any
//! registered [`LifecycleListener`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::memory::types::Tier;

/// A record of an item removed from every structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionRecord {
    /// Identifier of the removed item
    pub id: Uuid,
    /// Tier the item occupied when it was removed
    pub tier: Tier,
    /// When the item was removed
    pub evicted_at: DateTime<Utc>,
    /// Why it was removed
    pub reason: EvictionReason,
}

/// Reasons an item may leave the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// The lowest tier exceeded its item or byte budget
    CapacityPressure,
    /// Deleted explicitly by the caller
    ManualDeletion,
}

impl EvictionRecord {
    pub fn new(id: Uuid, tier: Tier, evicted_at: DateTime<Utc>, reason: EvictionReason) -> Self {
        Self {
            id,
            tier,
            evicted_at,
            reason,
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::CapacityPressure => write!(f, "capacity pressure"),
            EvictionReason::ManualDeletion => write!(f, "manual deletion"),
        }
    }
}

/// A tier transition that was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub id: Uuid,
    pub from: Tier,
    pub to: Tier,
}

/// Receives lifecycle events synchronously from the owner that caused them.
///
/// Methods run on the caller's task after the state change is committed and
/// must not block. Both have empty default bodies.
pub trait LifecycleListener: Send + Sync {
    fn on_migrated(&self, _migration: &Migration) {}

    fn on_evicted(&self, _record: &EvictionRecord) {}
}
