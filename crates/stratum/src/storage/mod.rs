//! Persistence and lifecycle management
//!
//! - [`StorageAdapter`]: pluggable byte store the engine persists through
//! - [`envelope`]: the versioned on-disk format for one item
//! - [`TierManager`]: tier state machine, migration sweep and eviction

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

pub mod compaction;
pub mod envelope;
pub mod eviction;
pub mod file;
pub mod memory;
pub mod tiers;

pub use compaction::{CompressedForm, CompressionLevel, Compressor, SummaryCompressor};
pub use envelope::{ENVELOPE_VERSION, Envelope};
pub use eviction::{CapacityStatus, EvictionPolicy};
pub use file::FileStorage;
pub use memory::InMemoryStorage;
pub use tiers::{StoreReceipt, SweepCanceller, SweepReport, TierConfig, TierManager, TierPolicy, TierUsage};

/// Backend-agnostic persistence for encoded items.
///
/// Implementations only move opaque bytes; the engine owns the format.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Write (or overwrite) the bytes stored under `id`
    async fn put(&self, id: Uuid, bytes: Bytes) -> Result<()>;

    /// Read the bytes stored under `id`, `None` if absent
    async fn get(&self, id: Uuid) -> Result<Option<Bytes>>;

    /// Remove `id`. Returns `false` if nothing was stored under it.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Every id currently stored
    async fn list(&self) -> Result<Vec<Uuid>>;
}
