//! Integration tests for the memory engine
//!
//! Tests verify that:
//! - Stored content comes back unchanged from every tier
//! - Deletes remove items from storage, indexes and tiers
//! - Embedding failures degrade to lexical-only mode when allowed
//! - Storage failures are reported per item and retried by sweeps
//! - A file-backed engine can be reopened from disk

use std::sync::Arc;

use chrono::Duration;
use tempfile::TempDir;

use stratum::config::Config;
use stratum::embedding::HashEmbedder;
use stratum::memory::{EvictionReason, MemoryItem, Tier};
use stratum::search::SearchQuery;
use stratum::storage::{FileStorage, StorageAdapter};
use stratum::testing::{FailingEmbedder, FlakyStorage, ManualClock};
use stratum::{MemoryEngine, StratumError};

// =============================================================================
// Test Helpers
// =============================================================================

struct Harness {
    engine: MemoryEngine,
    clock: Arc<ManualClock>,
    storage: Arc<FlakyStorage>,
}

fn harness(config: Config) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let storage = Arc::new(FlakyStorage::new());
    let engine = MemoryEngine::builder(config)
        .storage(storage.clone())
        .clock(clock.clone())
        .embedder(Arc::new(HashEmbedder::new(32)))
        .build();
    Harness { engine, clock, storage }
}

/// Advance past every threshold and sweep until the item reaches archival
async fn age_into_archival(h: &Harness, id: uuid::Uuid) {
    h.clock.advance(Duration::days(120));
    for _ in 0..3 {
        h.engine.run_migration_sweep().await.unwrap();
    }
    assert_eq!(h.engine.tiers().tier_of(&id), Some(Tier::Archival));
}

// =============================================================================
// Round Trip
// =============================================================================

#[tokio::test]
async fn test_round_trip_from_working() {
    let h = harness(Config::default());
    let item = MemoryItem::new("The borrow checker enforces aliasing rules.")
        .with_metadata("source", serde_json::json!("notes"));
    let original = item.clone();

    let receipt = h.engine.store(item).await.unwrap();
    assert_eq!(receipt.id, original.id);
    assert_eq!(receipt.tier, Tier::Working);
    assert!(receipt.persisted);

    let loaded = h.engine.retrieve(original.id).await.unwrap().unwrap();
    assert_eq!(loaded.content, original.content);
    assert_eq!(loaded.metadata, original.metadata);
    assert_eq!(loaded.access_count, 1);
}

#[tokio::test]
async fn test_round_trip_from_archival() {
    let h = harness(Config::default());
    let content = "Archived content must survive being dropped from memory.";
    let id = h.engine.store(MemoryItem::new(content)).await.unwrap().id;

    age_into_archival(&h, id).await;
    assert_eq!(h.engine.tiers().is_resident(&id), Some(false));

    let loaded = h.engine.retrieve(id).await.unwrap().unwrap();
    assert_eq!(loaded.content, content);
    assert_eq!(loaded.tier, Tier::Working);
    assert_eq!(h.engine.tiers().tier_of(&id), Some(Tier::Working));
}

#[tokio::test]
async fn test_unknown_id_is_not_an_error() {
    let h = harness(Config::default());
    assert!(h.engine.retrieve(uuid::Uuid::new_v4()).await.unwrap().is_none());
    assert!(h.engine.delete(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_removes_everywhere() {
    let h = harness(Config::default());
    let id = h.engine.store(MemoryItem::new("delete me entirely")).await.unwrap().id;
    assert!(h.storage.inner().contains(&id));

    let record = h.engine.delete(id).await.unwrap().unwrap();
    assert_eq!(record.reason, EvictionReason::ManualDeletion);
    assert_eq!(record.tier, Tier::Working);

    assert!(!h.storage.inner().contains(&id));
    assert!(!h.engine.tiers().contains(&id));
    let sizes = h.engine.stats().index;
    assert_eq!(sizes.vector_live, 0);
    assert_eq!(sizes.lexical_documents, 0);
}

#[tokio::test]
async fn test_failed_delete_keeps_item_searchable() {
    let h = harness(Config::default());
    let id = h.engine.store(MemoryItem::new("resilient record")).await.unwrap().id;

    h.storage.fail_deletes(true);
    let err = h.engine.delete(id).await.unwrap_err();
    assert!(matches!(err, StratumError::Storage(_)));

    let hits = h.engine.search(SearchQuery::text("resilient", 5)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item.id, id);
}

// =============================================================================
// Degraded Modes
// =============================================================================

#[tokio::test]
async fn test_lexical_fallback_end_to_end() {
    let engine = MemoryEngine::builder(Config::default())
        .embedder(Arc::new(FailingEmbedder::new(32)))
        .build();

    let id = engine.store(MemoryItem::new("keyword only retrieval")).await.unwrap().id;
    let hits = engine.search(SearchQuery::text("keyword retrieval", 3)).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item.id, id);
    assert_eq!(hits[0].lexical_rank, Some(1));
    assert_eq!(hits[0].vector_rank, None);
}

#[tokio::test]
async fn test_embedding_failure_without_fallback_fails_search() {
    let mut config = Config::default();
    config.engine.lexical_fallback = false;
    let engine = MemoryEngine::builder(config)
        .embedder(Arc::new(FailingEmbedder::new(32)))
        .build();

    let err = engine.search(SearchQuery::text("anything", 3)).await.unwrap_err();
    assert!(matches!(err, StratumError::EmbeddingUnavailable(_)));
}

#[tokio::test]
async fn test_wrong_dimension_is_fatal() {
    let h = harness(Config::default());
    h.engine.store(MemoryItem::new("fixes the dimension")).await.unwrap();

    let bad = MemoryItem::new("three dims").with_embedding(vec![0.1, 0.2, 0.3]);
    let err = h.engine.store(bad.clone()).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(!h.engine.tiers().contains(&bad.id));
    assert!(!h.storage.inner().contains(&bad.id));
}

#[tokio::test]
async fn test_storage_outage_is_reported_and_recovered() {
    let h = harness(Config::default());

    h.storage.fail_puts(true);
    let receipt = h.engine.store(MemoryItem::new("written during an outage")).await.unwrap();
    assert!(!receipt.persisted);
    assert!(!h.storage.inner().contains(&receipt.id));

    // Still served from memory
    let hits = h.engine.search(SearchQuery::text("outage", 1)).await.unwrap();
    assert_eq!(hits[0].item.id, receipt.id);

    let report = h.engine.run_migration_sweep().await.unwrap();
    assert!(report.failed.contains(&receipt.id));

    h.storage.fail_puts(false);
    let report = h.engine.run_migration_sweep().await.unwrap();
    assert!(report.failed.is_empty());
    assert!(report.flushed >= 1);
    assert!(h.storage.inner().contains(&receipt.id));
    assert_eq!(h.engine.tiers().is_persisted(&receipt.id), Some(true));
}

// =============================================================================
// Hydration
// =============================================================================

#[tokio::test]
async fn test_reopen_from_file_storage() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());

    let (kept, aged) = {
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let engine = MemoryEngine::builder(Config::default())
            .storage(Arc::new(storage))
            .clock(clock.clone())
            .build();

        let aged = engine.store(MemoryItem::new("left to go cold")).await.unwrap().id;
        clock.advance(Duration::days(8));
        let kept = engine
            .store(MemoryItem::new("kept warm by the caller").with_importance(0.95))
            .await
            .unwrap()
            .id;
        let report = engine.run_migration_sweep().await.unwrap();
        assert_eq!(report.moved_between(Tier::Working, Tier::ShortTerm), 1);
        (kept, aged)
    };

    // A stray file with a valid name but garbage inside
    let stray = uuid::Uuid::new_v4();
    std::fs::write(dir.path().join(format!("{stray}.json")), b"{ not an envelope").unwrap();

    let storage = FileStorage::open(dir.path()).await.unwrap();
    let (engine, report) = MemoryEngine::builder(Config::default())
        .storage(Arc::new(storage))
        .clock(clock)
        .open()
        .await
        .unwrap();

    assert_eq!(report.loaded, 2);
    assert_eq!(report.corrupt, vec![stray]);
    assert_eq!(engine.tiers().tier_of(&aged), Some(Tier::ShortTerm));
    assert_eq!(engine.tiers().tier_of(&kept), Some(Tier::Working));

    let hits = engine.search(SearchQuery::text("cold", 5)).await.unwrap();
    assert_eq!(hits[0].item.id, aged);
    assert_eq!(hits[0].item.content, "left to go cold");
}

#[tokio::test]
async fn test_reopened_engine_has_same_vectors() {
    let storage = Arc::new(FlakyStorage::new());
    let embedder = Arc::new(HashEmbedder::new(16));
    let first = MemoryEngine::builder(Config::default())
        .storage(storage.clone())
        .embedder(embedder.clone())
        .build();
    for text in ["alpha beta", "gamma delta", "epsilon zeta"] {
        first.store(MemoryItem::new(text)).await.unwrap();
    }

    let (second, _) = MemoryEngine::builder(Config::default())
        .storage(storage.clone())
        .embedder(embedder)
        .open()
        .await
        .unwrap();

    let mut before = first.index().vector_ids();
    let mut after = second.index().vector_ids();
    before.sort();
    after.sort();
    assert_eq!(before, after);
    assert_eq!(storage.list().await.unwrap().len(), 3);
    second.verify().unwrap();
}
