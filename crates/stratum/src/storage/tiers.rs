//! Tier lifecycle management
//!
//! Items enter the working tier and move down one tier at a time
//! (working, short_term, long_term, archival) as they go idle and their
//! effective importance decays below the tier's retention floor. Any access
//! promotes an item straight back to working. Tiers over their item or byte
//! budget demote their lowest-priority items, and the archival tier evicts.
//!
//! Every transition is persisted through the [`StorageAdapter`] before it is
//! committed in memory, so a failed write leaves the item where it was.
//! Reads and writes of the in-memory table are short critical sections and
//! the table lock is never held across storage I/O. Storage writes and
//! deletes of one item are serialized by a striped async item lock, so a
//! delete cannot interleave with a sweep writing the same item.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as TokioMutex, MutexGuard as TokioMutexGuard};
use uuid::Uuid;

use crate::cache::{AdmissionCache, CacheConfig, CacheStats};
use crate::clock::Clock;
use crate::error::{Result, StratumError};
use crate::memory::{
    EvictionReason, EvictionRecord, LifecycleListener, MemoryItem, Migration, Tier, WeightConfig,
    effective_importance, idle_seconds,
};
use crate::search::HybridSearchEngine;
use crate::storage::StorageAdapter;
use crate::storage::compaction::{Compressor, SummaryCompressor};
use crate::storage::envelope::Envelope;
use crate::storage::eviction::{CapacityStatus, EvictionPolicy};

/// Number of item lock stripes
const ITEM_LOCK_STRIPES: usize = 64;

/// Migration, budget and residency rules for one tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierPolicy {
    /// Seconds without access before the item is considered for demotion
    pub idle_secs: u64,
    /// Demote only once effective importance falls below this
    pub retention_floor: f32,
    /// Item budget, `None` for unbounded
    pub max_items: Option<usize>,
    /// Content byte budget, `None` for unbounded
    pub max_bytes: Option<u64>,
    /// Whether content stays in memory; otherwise it is read from storage
    pub resident: bool,
}

impl TierPolicy {
    /// Built-in policy for `tier`
    pub fn defaults_for(tier: Tier) -> Self {
        match tier {
            Tier::Working => Self {
                idle_secs: 60 * 60,
                retention_floor: 0.3,
                max_items: Some(1_000),
                max_bytes: None,
                resident: true,
            },
            Tier::ShortTerm => Self {
                idle_secs: 24 * 60 * 60,
                retention_floor: 0.25,
                max_items: Some(10_000),
                max_bytes: None,
                resident: true,
            },
            Tier::LongTerm => Self {
                idle_secs: 30 * 24 * 60 * 60,
                retention_floor: 0.15,
                max_items: Some(100_000),
                max_bytes: None,
                resident: false,
            },
            Tier::Archival => Self {
                idle_secs: 90 * 24 * 60 * 60,
                retention_floor: 0.1,
                max_items: None,
                max_bytes: None,
                resident: false,
            },
        }
    }

    fn apply(&mut self, patch: PolicyPatch) {
        if let Some(idle_secs) = patch.idle_secs {
            self.idle_secs = idle_secs;
        }
        if let Some(floor) = patch.retention_floor {
            self.retention_floor = floor;
        }
        // Zero disables a budget in config files, which have no null.
        if let Some(max_items) = patch.max_items {
            self.max_items = (max_items > 0).then_some(max_items);
        }
        if let Some(max_bytes) = patch.max_bytes {
            self.max_bytes = (max_bytes > 0).then_some(max_bytes);
        }
        if let Some(resident) = patch.resident {
            self.resident = resident;
        }
    }
}

/// Tier policies plus eviction protection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawTierConfig")]
pub struct TierConfig {
    pub working: TierPolicy,
    pub short_term: TierPolicy,
    pub long_term: TierPolicy,
    pub archival: TierPolicy,
    /// Compress archival items that meet the demotion rule (default: false)
    pub compress_archival: bool,
    /// Base importance at or above which items are never evicted (default: 0.9)
    pub protected_importance: f32,
    /// Items accessed within this many seconds are never evicted (default: 3600)
    pub recent_access_secs: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            working: TierPolicy::defaults_for(Tier::Working),
            short_term: TierPolicy::defaults_for(Tier::ShortTerm),
            long_term: TierPolicy::defaults_for(Tier::LongTerm),
            archival: TierPolicy::defaults_for(Tier::Archival),
            compress_archival: false,
            protected_importance: 0.9,
            recent_access_secs: 3600,
        }
    }
}

impl TierConfig {
    pub fn policy(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Working => &self.working,
            Tier::ShortTerm => &self.short_term,
            Tier::LongTerm => &self.long_term,
            Tier::Archival => &self.archival,
        }
    }

    pub fn policy_mut(&mut self, tier: Tier) -> &mut TierPolicy {
        match tier {
            Tier::Working => &mut self.working,
            Tier::ShortTerm => &mut self.short_term,
            Tier::LongTerm => &mut self.long_term,
            Tier::Archival => &mut self.archival,
        }
    }
}

/// Partial tier policy as written in a config file
#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    idle_secs: Option<u64>,
    retention_floor: Option<f32>,
    max_items: Option<usize>,
    max_bytes: Option<u64>,
    resident: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTierConfig {
    working: PolicyPatch,
    short_term: PolicyPatch,
    long_term: PolicyPatch,
    archival: PolicyPatch,
    compress_archival: Option<bool>,
    protected_importance: Option<f32>,
    recent_access_secs: Option<u64>,
}

impl From<RawTierConfig> for TierConfig {
    fn from(raw: RawTierConfig) -> Self {
        let mut config = TierConfig::default();
        config.working.apply(raw.working);
        config.short_term.apply(raw.short_term);
        config.long_term.apply(raw.long_term);
        config.archival.apply(raw.archival);
        if let Some(compress) = raw.compress_archival {
            config.compress_archival = compress;
        }
        if let Some(importance) = raw.protected_importance {
            config.protected_importance = importance;
        }
        if let Some(secs) = raw.recent_access_secs {
            config.recent_access_secs = secs;
        }
        config
    }
}

/// Items and content bytes held by one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    pub items: usize,
    pub bytes: u64,
}

/// Outcome of a store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReceipt {
    pub id: Uuid,
    pub tier: Tier,
    /// `false` if the storage write failed; the next sweep retries it
    pub persisted: bool,
    /// Items demoted to make room
    pub demoted: Vec<Migration>,
    /// Items evicted to make room
    pub evicted: Vec<EvictionRecord>,
}

/// Summary of one migration sweep.
///
/// Only committed work is listed. Ids in `failed` were left untouched and
/// are picked up again by the next sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub moved: Vec<Migration>,
    pub evicted: Vec<EvictionRecord>,
    pub compressed: Vec<Uuid>,
    /// Pending writes that were persisted
    pub flushed: usize,
    pub failed: Vec<Uuid>,
    /// The sweep stopped early; unprocessed items wait for the next one
    pub cancelled: bool,
}

impl SweepReport {
    /// Items moved from `from` to `to`
    pub fn moved_between(&self, from: Tier, to: Tier) -> usize {
        self.moved.iter().filter(|m| m.from == from && m.to == to).count()
    }
}

/// Requests that a running sweep stop at the next item boundary
#[derive(Debug, Clone)]
pub struct SweepCanceller(Arc<AtomicBool>);

impl SweepCanceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Content and embedding, shared between the tier table and the cache
#[derive(Debug, Clone, PartialEq)]
pub struct ItemBody {
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
struct Entry {
    /// The item with content and embedding stripped
    meta: MemoryItem,
    /// Present while resident, and always while a write is pending
    body: Option<Arc<ItemBody>>,
    size: usize,
    persisted: bool,
    revision: u64,
}

impl Entry {
    fn new(mut item: MemoryItem, resident: bool, persisted: bool) -> Self {
        let body = ItemBody {
            content: std::mem::take(&mut item.content),
            embedding: item.embedding.take(),
        };
        Self {
            size: body.content.len(),
            meta: item,
            body: (resident || !persisted).then(|| Arc::new(body)),
            persisted,
            revision: 0,
        }
    }
}

fn assemble(meta: &MemoryItem, body: &ItemBody) -> MemoryItem {
    let mut item = meta.clone();
    item.content = body.content.clone();
    item.embedding = body.embedding.clone();
    item
}

#[derive(Debug, Default)]
struct TierTable {
    entries: HashMap<Uuid, Entry>,
    usage: [TierUsage; 4],
    next_revision: u64,
}

impl TierTable {
    fn get(&self, id: &Uuid) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// Changes through this reference must not touch tier or size
    fn get_mut(&mut self, id: &Uuid) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    fn insert(&mut self, mut entry: Entry) -> Option<Entry> {
        let previous = self.remove(&entry.meta.id);
        self.next_revision += 1;
        entry.revision = self.next_revision;

        let usage = &mut self.usage[entry.meta.tier.index()];
        usage.items += 1;
        usage.bytes += entry.size as u64;
        self.entries.insert(entry.meta.id, entry);
        previous
    }

    fn remove(&mut self, id: &Uuid) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        let usage = &mut self.usage[entry.meta.tier.index()];
        usage.items = usage.items.saturating_sub(1);
        usage.bytes = usage.bytes.saturating_sub(entry.size as u64);
        Some(entry)
    }
}

struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns item lifecycle state and keeps the indexes, cache and storage in step
pub struct TierManager {
    config: TierConfig,
    weight: WeightConfig,
    eviction: EvictionPolicy,
    table: RwLock<TierTable>,
    cache: Mutex<AdmissionCache<Uuid, Arc<ItemBody>>>,
    index: Arc<HybridSearchEngine>,
    storage: Arc<dyn StorageAdapter>,
    clock: Arc<dyn Clock>,
    compressor: Arc<dyn Compressor>,
    listener: Option<Arc<dyn LifecycleListener>>,
    item_locks: Vec<TokioMutex<()>>,
    sweeping: AtomicBool,
    cancel: Arc<AtomicBool>,
}

impl TierManager {
    pub fn new(
        config: TierConfig,
        weight: WeightConfig,
        cache: &CacheConfig,
        index: Arc<HybridSearchEngine>,
        storage: Arc<dyn StorageAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let eviction = EvictionPolicy::new(config.protected_importance, config.recent_access_secs, weight);
        Self {
            config,
            weight,
            eviction,
            table: RwLock::new(TierTable::default()),
            cache: Mutex::new(AdmissionCache::new(cache)),
            index,
            storage,
            clock,
            compressor: Arc::new(SummaryCompressor::default()),
            listener: None,
            item_locks: (0..ITEM_LOCK_STRIPES).map(|_| TokioMutex::new(())).collect(),
            sweeping: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.table().entries.contains_key(id)
    }

    pub fn tier_of(&self, id: &Uuid) -> Option<Tier> {
        self.table().get(id).map(|e| e.meta.tier)
    }

    /// Whether the latest state of `id` has been written to storage
    pub fn is_persisted(&self, id: &Uuid) -> Option<bool> {
        self.table().get(id).map(|e| e.persisted)
    }

    /// Whether the content of `id` is held in memory
    pub fn is_resident(&self, id: &Uuid) -> Option<bool> {
        self.table().get(id).map(|e| e.body.is_some())
    }

    pub fn usage(&self, tier: Tier) -> TierUsage {
        self.table().usage[tier.index()]
    }

    pub fn status(&self, tier: Tier) -> CapacityStatus {
        let usage = self.usage(tier);
        let policy = self.config.policy(tier);
        CapacityStatus::for_usage(usage.items, usage.bytes, policy.max_items, policy.max_bytes)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache().stats()
    }

    pub fn sweep_canceller(&self) -> SweepCanceller {
        SweepCanceller(Arc::clone(&self.cancel))
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    /// Admit a new item into working, or replace an existing one.
    ///
    /// The vector is validated and room is made in working before anything
    /// is indexed. A failed storage write still indexes and tracks the item;
    /// the receipt reports it unpersisted and the next sweep retries.
    pub async fn store(&self, mut item: MemoryItem) -> Result<StoreReceipt> {
        if let Some(vector) = &item.embedding {
            self.index.check_vector(vector)?;
        }
        item.set_importance(item.importance);

        let now = self.clock.now();
        let previous = {
            let table = self.table();
            table.get(&item.id).map(|e| (e.meta.tier, e.size, e.meta.created_at))
        };

        item.tier = Tier::Working;
        item.created_at = previous.map_or(now, |(_, _, created_at)| created_at);
        item.last_accessed = now;
        item.effective_importance = effective_importance(&item, &self.weight, now);

        let size = item.content.len();
        let (extra_items, extra_bytes) = match previous {
            Some((Tier::Working, old_size, _)) => (0, size.saturating_sub(old_size) as u64),
            _ => (1, size as u64),
        };

        let mut relief = SweepReport::default();
        self.relieve(Tier::Working, extra_items, extra_bytes, Some(item.id), false, &mut relief)
            .await?;

        let _lock = self.lock_item(item.id).await;
        self.index.index(item.id, item.embedding.clone(), &item.content)?;

        let persisted = match self.write(&item).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = %item.id, error = %e, "Storage write failed, keeping item in memory");
                false
            }
        };

        let id = item.id;
        let resident = self.config.working.resident;
        self.table_mut().insert(Entry::new(item, resident, persisted));
        self.cache().remove(&id);

        tracing::debug!(%id, persisted, replaced = previous.is_some(), "Stored item");
        Ok(StoreReceipt {
            id,
            tier: Tier::Working,
            persisted,
            demoted: relief.moved,
            evicted: relief.evicted,
        })
    }

    /// Register an item loaded from storage without writing it back
    pub fn restore(&self, mut item: MemoryItem) -> Result<()> {
        item.set_importance(item.importance);
        self.index.index(item.id, item.embedding.clone(), &item.content)?;
        let resident = self.config.policy(item.tier).resident;
        self.table_mut().insert(Entry::new(item, resident, true));
        Ok(())
    }

    /// Read an item, counting the access and promoting it to working.
    ///
    /// The access itself is not written through; the item is marked pending
    /// and persisted by the next sweep.
    pub async fn access(&self, id: Uuid) -> Result<Option<MemoryItem>> {
        let resident = {
            let table = self.table();
            match table.get(&id) {
                Some(entry) => entry.body.clone(),
                None => return Ok(None),
            }
        };

        let cached = self.cache().get(&id).cloned();
        let body = match (cached.clone(), resident) {
            (Some(body), _) | (None, Some(body)) => body,
            (None, None) => self.load_body(id).await?,
        };
        if cached.is_none() {
            self.cache().set(id, Arc::clone(&body));
        }

        let now = self.clock.now();
        let (item, from) = {
            let mut table = self.table_mut();
            let Some(mut entry) = table.remove(&id) else {
                return Ok(None);
            };
            let from = entry.meta.tier;
            entry.meta.mark_accessed(now);
            entry.meta.tier = Tier::Working;
            entry.meta.effective_importance = effective_importance(&entry.meta, &self.weight, now);
            entry.body = Some(Arc::clone(&body));
            entry.persisted = false;

            let item = assemble(&entry.meta, &body);
            table.insert(entry);
            (item, from)
        };

        if from != Tier::Working {
            tracing::debug!(%id, %from, "Promoted item to working on access");
            self.notify_migrated(Migration { id, from, to: Tier::Working });
        }
        Ok(Some(item))
    }

    /// Delete an item everywhere. Storage is removed first; if that fails
    /// nothing else is touched. Waits for any in-flight write of the item.
    pub async fn remove(&self, id: Uuid) -> Result<Option<EvictionRecord>> {
        let _lock = self.lock_item(id).await;
        if !self.contains(&id) {
            return Ok(None);
        }
        self.storage.delete(id).await?;

        let Some(entry) = self.table_mut().remove(&id) else {
            return Ok(None);
        };
        self.cache().remove(&id);
        self.index.remove(&id);

        let record = EvictionRecord::new(id, entry.meta.tier, self.clock.now(), EvictionReason::ManualDeletion);
        tracing::debug!(%id, tier = %record.tier, "Deleted item");
        self.notify_evicted(&record);
        Ok(Some(record))
    }

    /// Run one migration sweep.
    ///
    /// 1. Demote every item idle past its tier's threshold whose effective
    ///    importance fell below the tier's floor (archival items are
    ///    compressed instead, when enabled).
    /// 2. Relieve every tier over budget.
    /// 3. Persist pending writes.
    ///
    /// Returns [`StratumError::SweepInProgress`] if another sweep is running.
    pub async fn sweep(&self) -> Result<SweepReport> {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            return Err(StratumError::SweepInProgress);
        }
        let _guard = SweepGuard(&self.sweeping);
        self.cancel.store(false, Ordering::Release);

        let started = Instant::now();
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for (id, revision, tier) in self.plan_migrations(now) {
            if self.cancelled(&mut report) {
                return Ok(self.finish_sweep(report, started));
            }
            match tier.colder() {
                Some(to) => match self.demote(id, revision, tier, to).await {
                    Ok(Some(migration)) => report.moved.push(migration),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(%id, %tier, error = %e, "Demotion failed");
                        report.failed.push(id);
                    }
                },
                None if self.config.compress_archival => match self.compress(id, revision).await {
                    Ok(true) => report.compressed.push(id),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "Compression failed");
                        report.failed.push(id);
                    }
                },
                None => {}
            }
        }

        for tier in Tier::ALL {
            if self.cancelled(&mut report) {
                return Ok(self.finish_sweep(report, started));
            }
            if let Err(e) = self.relieve(tier, 0, 0, None, true, &mut report).await {
                tracing::warn!(%tier, error = %e, "Tier is still over budget after sweep");
            }
        }

        self.flush(&mut report).await;
        Ok(self.finish_sweep(report, started))
    }

    fn finish_sweep(&self, report: SweepReport, started: Instant) -> SweepReport {
        tracing::info!(
            moved = report.moved.len(),
            evicted = report.evicted.len(),
            compressed = report.compressed.len(),
            flushed = report.flushed,
            failed = report.failed.len(),
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Migration sweep finished"
        );
        report
    }

    fn cancelled(&self, report: &mut SweepReport) -> bool {
        if self.cancel.load(Ordering::Acquire) {
            report.cancelled = true;
        }
        report.cancelled
    }

    /// Re-derive effective importance and list items due for demotion
    fn plan_migrations(&self, now: DateTime<Utc>) -> Vec<(Uuid, u64, Tier)> {
        let mut table = self.table_mut();
        let mut plan = Vec::new();
        for (id, entry) in table.entries.iter_mut() {
            let meta = &mut entry.meta;
            meta.effective_importance = effective_importance(meta, &self.weight, now);

            let policy = self.config.policy(meta.tier);
            let idle = idle_seconds(meta, now) > policy.idle_secs;
            let decayed = meta.effective_importance < policy.retention_floor;
            let due = match meta.tier {
                Tier::Archival => self.config.compress_archival && !meta.compressed,
                _ => true,
            };
            if idle && decayed && due {
                plan.push((*id, entry.revision, meta.tier));
            }
        }
        plan.sort_by_key(|&(id, _, tier)| (tier, id));
        plan
    }

    /// Bring `tier` back within budget with room for the incoming amount,
    /// cascading into colder tiers that overflow as a result.
    async fn relieve(
        &self,
        mut tier: Tier,
        mut incoming_items: usize,
        mut incoming_bytes: u64,
        exclude: Option<Uuid>,
        cancellable: bool,
        report: &mut SweepReport,
    ) -> Result<()> {
        loop {
            if !self.over_budget(tier, incoming_items, incoming_bytes) {
                return Ok(());
            }
            let policy = self.config.policy(tier);
            if policy.max_bytes.is_some_and(|max| incoming_bytes > max) || policy.max_items == Some(0) {
                return Err(self.capacity_error(tier, incoming_items));
            }

            let colder = tier.colder();
            let now = self.clock.now();
            for (id, revision) in self.relief_candidates(tier, exclude, colder.is_none(), now) {
                if !self.over_budget(tier, incoming_items, incoming_bytes) {
                    break;
                }
                if cancellable && self.cancelled(report) {
                    return Ok(());
                }
                match colder {
                    Some(to) => match self.demote(id, revision, tier, to).await {
                        Ok(Some(migration)) => report.moved.push(migration),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(%id, %tier, error = %e, "Demotion under pressure failed");
                            report.failed.push(id);
                        }
                    },
                    None => match self.evict(id, revision, now).await {
                        Ok(Some(record)) => report.evicted.push(record),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(%id, error = %e, "Eviction failed");
                            report.failed.push(id);
                        }
                    },
                }
            }

            if self.over_budget(tier, incoming_items, incoming_bytes) {
                return Err(self.capacity_error(tier, incoming_items));
            }
            match colder {
                Some(next) => {
                    tier = next;
                    incoming_items = 0;
                    incoming_bytes = 0;
                }
                None => return Ok(()),
            }
        }
    }

    fn over_budget(&self, tier: Tier, incoming_items: usize, incoming_bytes: u64) -> bool {
        let usage = self.usage(tier);
        let policy = self.config.policy(tier);
        policy.max_items.is_some_and(|max| usage.items + incoming_items > max)
            || policy.max_bytes.is_some_and(|max| usage.bytes + incoming_bytes > max)
    }

    /// Report the item budget if that is the one exceeded, else the byte budget
    fn capacity_error(&self, tier: Tier, incoming_items: usize) -> StratumError {
        let usage = self.usage(tier);
        let policy = self.config.policy(tier);
        let limit = match (policy.max_items, policy.max_bytes) {
            (Some(max), _) if usage.items + incoming_items > max => max,
            (_, Some(max)) => usize::try_from(max).unwrap_or(usize::MAX),
            (Some(max), None) => max,
            (None, None) => usize::MAX,
        };
        StratumError::CapacityExceeded { tier, limit }
    }

    /// Items of `tier` in the order they should leave it
    fn relief_candidates(
        &self,
        tier: Tier,
        exclude: Option<Uuid>,
        evicting: bool,
        now: DateTime<Utc>,
    ) -> Vec<(Uuid, u64)> {
        let metas: Vec<(MemoryItem, u64)> = {
            let table = self.table();
            table
                .entries
                .values()
                .filter(|e| e.meta.tier == tier && Some(e.meta.id) != exclude)
                .map(|e| (e.meta.clone(), e.revision))
                .collect()
        };

        let mut candidates = {
            let cache = self.cache();
            metas
                .iter()
                .map(|(meta, _)| self.eviction.candidate(meta, cache.frequency(&meta.id), now))
                .filter(|c| !(evicting && c.protected))
                .collect::<Vec<_>>()
        };
        self.eviction.order(&mut candidates);

        let revisions: HashMap<Uuid, u64> = metas.iter().map(|(meta, rev)| (meta.id, *rev)).collect();
        candidates
            .into_iter()
            .filter_map(|c| revisions.get(&c.id).map(|&rev| (c.id, rev)))
            .collect()
    }

    /// Move an item one tier down. `Ok(None)` if it changed since it was
    /// chosen; it is then left for the next sweep.
    async fn demote(&self, id: Uuid, revision: u64, from: Tier, to: Tier) -> Result<Option<Migration>> {
        let _lock = self.lock_item(id).await;
        let Some((meta, body)) = self.snapshot(id, revision, from) else {
            return Ok(None);
        };
        let body = match body {
            Some(body) => body,
            None => self.load_body(id).await?,
        };

        let mut item = assemble(&meta, &body);
        item.tier = to;
        self.write(&item).await?;

        let committed = {
            let mut table = self.table_mut();
            let current = table.get(&id).map(|e| e.revision);
            if current == Some(revision) {
                let resident = self.config.policy(to).resident;
                table.insert(Entry::new(item, resident, true));
                true
            } else {
                // Storage now disagrees with memory; rewrite on the next flush.
                if let Some(entry) = table.get_mut(&id) {
                    entry.persisted = false;
                }
                false
            }
        };
        if !committed {
            return Ok(None);
        }

        let migration = Migration { id, from, to };
        tracing::debug!(%id, %from, %to, "Demoted item");
        self.notify_migrated(migration);
        Ok(Some(migration))
    }

    /// Replace an archival item's content with its compressed form
    async fn compress(&self, id: Uuid, revision: u64) -> Result<bool> {
        let _lock = self.lock_item(id).await;
        let Some((meta, body)) = self.snapshot(id, revision, Tier::Archival) else {
            return Ok(false);
        };
        let body = match body {
            Some(body) => body,
            None => self.load_body(id).await?,
        };

        let mut item = assemble(&meta, &body);
        let Some(form) = self.compressor.compress(&item) else {
            return Ok(false);
        };
        let original = item.content.len();
        item.content = form.content;
        item.compressed = true;
        item.compressed_ref = Some(form.reference);
        self.write(&item).await?;

        let content = item.content.clone();
        let committed = {
            let mut table = self.table_mut();
            let current = table.get(&id).map(|e| e.revision);
            if current == Some(revision) {
                table.insert(Entry::new(item, self.config.archival.resident, true));
                true
            } else {
                if let Some(entry) = table.get_mut(&id) {
                    entry.persisted = false;
                }
                false
            }
        };
        if !committed {
            return Ok(false);
        }

        self.cache().remove(&id);
        self.index.reindex_text(id, &content);
        tracing::debug!(%id, original, compressed = content.len(), "Compressed archival item");
        Ok(true)
    }

    /// Remove an archival item under capacity pressure
    async fn evict(&self, id: Uuid, revision: u64, now: DateTime<Utc>) -> Result<Option<EvictionRecord>> {
        let _lock = self.lock_item(id).await;
        if self.snapshot(id, revision, Tier::Archival).is_none() {
            return Ok(None);
        }
        self.storage.delete(id).await?;

        let Some(entry) = self.table_mut().remove(&id) else {
            return Ok(None);
        };
        self.cache().remove(&id);
        self.index.remove(&id);

        let record = EvictionRecord::new(id, entry.meta.tier, now, EvictionReason::CapacityPressure);
        tracing::info!(%id, tier = %record.tier, "Evicted item under capacity pressure");
        self.notify_evicted(&record);
        Ok(Some(record))
    }

    /// Persist every pending write whose content is at hand
    async fn flush(&self, report: &mut SweepReport) {
        let pending: Vec<(MemoryItem, u64)> = {
            let table = self.table();
            table
                .entries
                .values()
                .filter(|e| !e.persisted)
                .filter_map(|e| e.body.as_ref().map(|body| (assemble(&e.meta, body), e.revision)))
                .collect()
        };

        for (item, revision) in pending {
            if self.cancelled(report) {
                return;
            }
            let id = item.id;
            let _lock = self.lock_item(id).await;
            if !self.contains(&id) {
                // Deleted while waiting for the lock
                continue;
            }
            if let Err(e) = self.write(&item).await {
                tracing::warn!(%id, error = %e, "Pending write failed again");
                report.failed.push(id);
                continue;
            }

            let mut table = self.table_mut();
            let Some(entry) = table.get_mut(&id) else {
                continue;
            };
            if entry.revision == revision {
                entry.persisted = true;
                if !self.config.policy(entry.meta.tier).resident {
                    entry.body = None;
                }
                report.flushed += 1;
            }
        }
    }

    /// Metadata and resident body of `id` if it is still at `revision` in `tier`
    fn snapshot(&self, id: Uuid, revision: u64, tier: Tier) -> Option<(MemoryItem, Option<Arc<ItemBody>>)> {
        let table = self.table();
        let entry = table.get(&id)?;
        (entry.revision == revision && entry.meta.tier == tier).then(|| (entry.meta.clone(), entry.body.clone()))
    }

    /// Content of a non-resident item, from the cache or storage
    async fn load_body(&self, id: Uuid) -> Result<Arc<ItemBody>> {
        let cached = self.cache().peek(&id).cloned();
        if let Some(body) = cached {
            return Ok(body);
        }

        let bytes = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| StratumError::Storage(format!("item {id} is tracked but missing from storage")))?;
        let item = Envelope::decode(&bytes)?;
        Ok(Arc::new(ItemBody {
            content: item.content,
            embedding: item.embedding,
        }))
    }

    /// Serialize storage I/O for `id` against deletes and other writers
    async fn lock_item(&self, id: Uuid) -> TokioMutexGuard<'_, ()> {
        let stripe = (id.as_u128() % ITEM_LOCK_STRIPES as u128) as usize;
        self.item_locks[stripe].lock().await
    }

    async fn write(&self, item: &MemoryItem) -> Result<()> {
        let bytes = Envelope::encode(item)?;
        self.storage.put(item.id, bytes).await
    }

    fn notify_migrated(&self, migration: Migration) {
        if let Some(listener) = &self.listener {
            listener.on_migrated(&migration);
        }
    }

    fn notify_evicted(&self, record: &EvictionRecord) {
        if let Some(listener) = &self.listener {
            listener.on_evicted(record);
        }
    }

    fn table(&self) -> RwLockReadGuard<'_, TierTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, TierTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> MutexGuard<'_, AdmissionCache<Uuid, Arc<ItemBody>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
