//! Caller-facing engine
//!
//! [`MemoryEngine`] is an explicit context object: it owns the hybrid
//! index, the tier manager and its admission cache, and borrows the
//! injected storage adapter, embedding provider and clock. Nothing here is
//! process-global; two engines over two adapters are fully independent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StratumError};
use crate::memory::{EvictionRecord, LifecycleListener, MemoryItem, Tier};
use crate::search::{HybridSearchEngine, IndexSizes, SearchQuery};
use crate::storage::{
    CapacityStatus, Compressor, Envelope, InMemoryStorage, StorageAdapter, StoreReceipt, SweepCanceller,
    SweepReport, TierManager, TierUsage,
};

/// Concurrent storage reads while hydrating
const HYDRATION_CONCURRENCY: usize = 16;

/// One search result with the item it points at
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f32,
    /// 1-based rank in the vector source, if it returned the item
    pub vector_rank: Option<usize>,
    /// 1-based rank in the lexical source, if it returned the item
    pub lexical_rank: Option<usize>,
}

/// Occupancy of one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierStats {
    pub tier: Tier,
    pub items: usize,
    pub bytes: u64,
    pub status: CapacityStatus,
}

/// Snapshot of engine occupancy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub tiers: Vec<TierStats>,
    pub total_items: usize,
    pub cache: CacheStats,
    pub cache_hit_rate: f64,
    pub index: IndexSizes,
}

impl EngineStats {
    pub fn tier(&self, tier: Tier) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}

/// What [`EngineBuilder::open`] found in storage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HydrationReport {
    pub loaded: usize,
    /// Entries that failed envelope validation or could not be indexed
    pub corrupt: Vec<Uuid>,
    /// Entries whose read failed
    pub unreadable: Vec<Uuid>,
}

/// Assembles a [`MemoryEngine`] from its collaborators
pub struct EngineBuilder {
    config: Config,
    storage: Option<Arc<dyn StorageAdapter>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    clock: Option<Arc<dyn Clock>>,
    listener: Option<Arc<dyn LifecycleListener>>,
    compressor: Option<Arc<dyn Compressor>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            storage: None,
            embedder: None,
            clock: None,
            listener: None,
            compressor: None,
        }
    }

    /// Defaults to [`InMemoryStorage`]
    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Defaults to [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Build an empty engine without reading storage
    pub fn build(self) -> MemoryEngine {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()) as Arc<dyn StorageAdapter>);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let config = self.config;

        let index = Arc::new(HybridSearchEngine::new(
            config.vector.clone(),
            config.lexical,
            config.search.clone(),
        ));
        let mut tiers = TierManager::new(
            config.tiers.clone(),
            config.weight,
            &config.cache,
            Arc::clone(&index),
            Arc::clone(&storage),
            Arc::clone(&clock),
        );
        if let Some(compressor) = self.compressor {
            tiers = tiers.with_compressor(compressor);
        }
        if let Some(listener) = self.listener {
            tiers = tiers.with_listener(listener);
        }

        MemoryEngine {
            config,
            index,
            tiers,
            storage,
            embedder: self.embedder,
        }
    }

    /// Build the engine and load every item the storage adapter holds
    pub async fn open(self) -> Result<(MemoryEngine, HydrationReport)> {
        let engine = self.build();
        let report = engine.hydrate().await?;
        Ok((engine, report))
    }
}

/// Tiered memory store with hybrid retrieval.
///
/// All operations take `&self`; share the engine behind an `Arc` to use it
/// from several tasks.
pub struct MemoryEngine {
    config: Config,
    index: Arc<HybridSearchEngine>,
    tiers: TierManager,
    storage: Arc<dyn StorageAdapter>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tiers(&self) -> &TierManager {
        &self.tiers
    }

    pub fn index(&self) -> &HybridSearchEngine {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Persist, index and admit an item into the working tier.
    ///
    /// Without a vector on the item, one is requested from the embedding
    /// provider. If that fails, the item is stored lexical-only when
    /// `engine.lexical_fallback` is set, else the store fails with
    /// [`StratumError::EmbeddingUnavailable`] and nothing is mutated.
    pub async fn store(&self, mut item: MemoryItem) -> Result<StoreReceipt> {
        if item.embedding.is_none() {
            item.embedding = self.embed(&item.content).await?;
        }
        self.tiers.store(item).await
    }

    /// Fetch an item by id, counting the read as an access
    pub async fn retrieve(&self, id: Uuid) -> Result<Option<MemoryItem>> {
        self.tiers.access(id).await
    }

    /// Hybrid search over vector and lexical indexes.
    ///
    /// A text query without a vector is embedded first; if embedding fails
    /// and lexical fallback is enabled the query runs lexical-only. Every
    /// returned item counts as accessed.
    pub async fn search(&self, mut query: SearchQuery) -> Result<Vec<SearchHit>> {
        if query.vector.is_none() {
            if let Some(text) = query.text.as_deref() {
                query.vector = self.embed(text).await?;
            }
        }

        let fused = self.index.query(&query).await?;
        let mut hits = Vec::with_capacity(fused.len());
        for hit in fused {
            match self.tiers.access(hit.id).await {
                Ok(Some(item)) => hits.push(SearchHit {
                    item,
                    score: hit.score,
                    vector_rank: hit.vector_rank,
                    lexical_rank: hit.lexical_rank,
                }),
                // Deleted between the index read and the lookup
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(id = %hit.id, error = %e, "Dropping search hit whose content could not be read");
                }
            }
        }

        tracing::debug!(k = query.k, returned = hits.len(), "Search finished");
        Ok(hits)
    }

    /// Remove an item from storage, the indexes and the tier table.
    ///
    /// Returns the eviction record, or `None` if the id is unknown.
    pub async fn delete(&self, id: Uuid) -> Result<Option<EvictionRecord>> {
        self.tiers.remove(id).await
    }

    /// Run one migration sweep, then compact the vector graph if enough of
    /// it is tombstoned
    pub async fn run_migration_sweep(&self) -> Result<SweepReport> {
        let report = self.tiers.sweep().await?;
        if !report.cancelled {
            let index = Arc::clone(&self.index);
            let compacted = tokio::task::spawn_blocking(move || index.compact_if_needed())
                .await
                .map_err(|e| StratumError::General(format!("Compaction task failed: {e}")))?;
            if compacted > 0 {
                tracing::info!(compacted, "Compacted vector index");
            }
        }
        Ok(report)
    }

    /// Handle that stops a running sweep at its next item boundary
    pub fn sweep_canceller(&self) -> SweepCanceller {
        self.tiers.sweep_canceller()
    }

    pub fn cancel_sweep(&self) {
        self.tiers.sweep_canceller().cancel();
    }

    pub fn stats(&self) -> EngineStats {
        let tiers: Vec<TierStats> = Tier::ALL
            .iter()
            .map(|&tier| {
                let TierUsage { items, bytes } = self.tiers.usage(tier);
                TierStats {
                    tier,
                    items,
                    bytes,
                    status: self.tiers.status(tier),
                }
            })
            .collect();
        let cache = self.tiers.cache_stats();

        EngineStats {
            total_items: tiers.iter().map(|t| t.items).sum(),
            tiers,
            cache_hit_rate: cache.hit_rate(),
            cache,
            index: self.index.sizes(),
        }
    }

    /// Check the vector graph's structure and that every indexed vector
    /// belongs to a tracked item
    pub fn verify(&self) -> Result<()> {
        self.index.validate()?;
        if let Some(orphan) = self.index.vector_ids().into_iter().find(|id| !self.tiers.contains(id)) {
            return Err(StratumError::IndexCorruption(format!(
                "vector index holds {orphan} which no tier tracks"
            )));
        }
        Ok(())
    }

    /// Run migration sweeps every `interval` until the handle is shut down
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> MaintenanceHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.run_migration_sweep().await {
                            Ok(_) | Err(StratumError::SweepInProgress) => {}
                            Err(e) => tracing::warn!(error = %e, "Scheduled sweep failed"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::debug!("Maintenance task stopped");
        });

        MaintenanceHandle {
            stop: stop_tx,
            canceller: self.sweep_canceller(),
            task,
        }
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let fallback = self.config.engine.lexical_fallback;
        let Some(embedder) = &self.embedder else {
            if fallback {
                return Ok(None);
            }
            return Err(StratumError::EmbeddingUnavailable(
                "no embedding provider configured".to_string(),
            ));
        };

        match embedder.embed(text).await {
            Ok(vector) => Ok(Some(vector)),
            Err(e) if fallback => {
                tracing::warn!(error = %e, "Embedding failed, falling back to lexical-only");
                Ok(None)
            }
            Err(e) => Err(StratumError::EmbeddingUnavailable(e.to_string())),
        }
    }

    async fn hydrate(&self) -> Result<HydrationReport> {
        let started = Instant::now();
        let ids = self.storage.list().await?;
        let storage = &self.storage;

        let reads: Vec<_> = stream::iter(ids)
            .map(|id| async move { (id, storage.get(id).await) })
            .buffered(HYDRATION_CONCURRENCY)
            .collect()
            .await;

        let mut report = HydrationReport::default();
        for (id, read) in reads {
            let bytes = match read {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Could not read stored item");
                    report.unreadable.push(id);
                    continue;
                }
            };

            let restored = Envelope::decode(&bytes).and_then(|item| {
                if item.id != id {
                    return Err(StratumError::IndexCorruption(format!(
                        "envelope stored under {id} describes {}",
                        item.id
                    )));
                }
                self.tiers.restore(item)
            });
            match restored {
                Ok(()) => report.loaded += 1,
                Err(e) => {
                    tracing::warn!(%id, error = %e, "Skipping corrupt stored item");
                    report.corrupt.push(id);
                }
            }
        }

        tracing::info!(
            loaded = report.loaded,
            corrupt = report.corrupt.len(),
            unreadable = report.unreadable.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hydrated engine from storage"
        );
        Ok(report)
    }
}

/// Background sweep task started by [`MemoryEngine::spawn_maintenance`]
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    canceller: SweepCanceller,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Cancel any running sweep and wait for the task to exit
    pub async fn shutdown(self) {
        self.canceller.cancel();
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Maintenance task ended abnormally");
        }
    }
}
