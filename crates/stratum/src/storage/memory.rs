//! In-process storage backed by a concurrent map

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::StorageAdapter;

/// Keeps every encoded item in memory. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    items: DashMap<Uuid, Bytes>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.items.contains_key(id)
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn put(&self, id: Uuid, bytes: Bytes) -> Result<()> {
        self.items.insert(id, bytes);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Bytes>> {
        Ok(self.items.get(&id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.items.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.items.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        Ok(ids)
    }
}
