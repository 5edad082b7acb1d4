//! Test utilities for stratum - fakes and fixtures
//!
//! This module provides deterministic stand-ins for the engine's external
//! collaborators so unit and integration tests can drive time, storage
//! faults and embedding failures directly:
//! - [`ManualClock`]: a clock that only moves when told to
//! - [`FlakyStorage`]: in-memory storage with switchable faults and latency
//! - [`FailingEmbedder`]: an embedding provider that always errors
//! - [`RecordingListener`]: captures lifecycle events
//! - seeded vector generators and a brute-force nearest-neighbor oracle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::clock::Clock;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, StratumError};
use crate::index::DistanceMetric;
use crate::memory::{EvictionRecord, LifecycleListener, Migration};
use crate::storage::{InMemoryStorage, StorageAdapter, SweepCanceller};

/// Clock that stands still until advanced.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory storage whose operations can be made to fail or stall.
#[derive(Debug, Default)]
pub struct FlakyStorage {
    inner: InMemoryStorage,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_deletes: AtomicBool,
    put_delay: Mutex<Option<Duration>>,
    puts: AtomicUsize,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backing store, bypassing fault injection
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every put
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *self.put_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Successful puts so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageAdapter for FlakyStorage {
    async fn put(&self, id: Uuid, bytes: Bytes) -> Result<()> {
        let delay = *self.put_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StratumError::Storage(format!("injected put failure for {id}")));
        }
        self.inner.put(id, bytes).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Bytes>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StratumError::Storage(format!("injected get failure for {id}")));
        }
        self.inner.get(id).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StratumError::Storage(format!("injected delete failure for {id}")));
        }
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        self.inner.list().await
    }
}

/// Embedding provider that is always unavailable.
#[derive(Debug, Clone)]
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(StratumError::Embedding("provider offline".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Records every lifecycle event; optionally cancels a sweep once.
#[derive(Debug, Default)]
pub struct RecordingListener {
    migrations: Mutex<Vec<Migration>>,
    evictions: Mutex<Vec<EvictionRecord>>,
    cancel_after: Option<usize>,
    canceller: Mutex<Option<SweepCanceller>>,
}

impl RecordingListener {
    /// Cancel the running sweep when the `n`th migration is seen
    pub fn cancelling_after(n: usize) -> Self {
        Self {
            cancel_after: Some(n),
            ..Default::default()
        }
    }

    pub fn attach(&self, canceller: SweepCanceller) {
        *self.canceller.lock().unwrap_or_else(PoisonError::into_inner) = Some(canceller);
    }

    pub fn migrations(&self) -> Vec<Migration> {
        self.migrations.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn evictions(&self) -> Vec<EvictionRecord> {
        self.evictions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl LifecycleListener for RecordingListener {
    fn on_migrated(&self, migration: &Migration) {
        let seen = {
            let mut migrations = self.migrations.lock().unwrap_or_else(PoisonError::into_inner);
            migrations.push(*migration);
            migrations.len()
        };
        if self.cancel_after == Some(seen) {
            if let Some(canceller) = self.canceller.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                canceller.cancel();
            }
        }
    }

    fn on_evicted(&self, record: &EvictionRecord) {
        self.evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

/// `n` vectors of `dim` uniform components in [-1, 1]
pub fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..=1.0)).collect())
        .collect()
}

/// Exact `k` nearest ids by `metric`, ties broken by ascending id
pub fn brute_force_top_k(corpus: &[(Uuid, Vec<f32>)], query: &[f32], k: usize, metric: DistanceMetric) -> Vec<Uuid> {
    let mut scored: Vec<(f32, Uuid)> = corpus
        .iter()
        .map(|(id, vector)| (metric.distance(query, vector), *id))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}
