//! Memory types and scoring
//!
//! Defines the stored item, its lifecycle tiers, importance decay and the
//! records produced when items leave the engine.

pub mod tombstone;
pub mod types;
pub mod weight;

pub use tombstone::{EvictionReason, EvictionRecord, LifecycleListener, Migration};
pub use types::{DEFAULT_IMPORTANCE, MemoryItem, Tier};
pub use weight::{WeightConfig, effective_importance, idle_seconds};
