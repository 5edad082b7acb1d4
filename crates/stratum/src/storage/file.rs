//! Directory-backed storage, one JSON file per item

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Result, StratumError};
use crate::storage::StorageAdapter;

const EXTENSION: &str = "json";

/// Stores each item as `<dir>/<uuid>.json`.
///
/// Writes go to a temporary sibling unique to each write and are renamed
/// into place, so a reader never observes a half-written file and concurrent
/// writes of one id never share a temporary.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StratumError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        tracing::debug!(dir = %dir.display(), "Opened file storage");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }
}

#[async_trait]
impl StorageAdapter for FileStorage {
    async fn put(&self, id: Uuid, bytes: Bytes) -> Result<()> {
        let path = self.path_for(id);
        let tmp = self.dir.join(format!("{id}.{EXTENSION}.{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StratumError::Storage(format!("write {}: {e}", tmp.display())));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StratumError::Storage(format!("rename into {}: {e}", path.display())));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Bytes>> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StratumError::Storage(format!("read {}: {e}", path.display()))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StratumError::Storage(format!("remove {}: {e}", path.display()))),
        }
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StratumError::Storage(format!("list {}: {e}", self.dir.display())))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StratumError::Storage(format!("list {}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok());
            match id {
                Some(id) => ids.push(id),
                None => tracing::warn!(path = %path.display(), "Skipping unrecognized file in storage directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn leftover_temporaries(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("tmp"))
            .count()
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();

        storage.put(id, Bytes::from_static(b"first")).await.unwrap();
        storage.put(id, Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(storage.get(id).await.unwrap(), Some(Bytes::from_static(b"second")));
        assert!(dir.path().join(format!("{id}.json")).exists());
        assert_eq!(leftover_temporaries(dir.path()), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_of_one_id_all_succeed() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..64 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.put(id, Bytes::from(format!("payload {i:02}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = storage.get(id).await.unwrap().unwrap();
        let stored = String::from_utf8(stored.to_vec()).unwrap();
        assert!(stored.starts_with("payload ") && stored.len() == "payload 00".len());
        assert_eq!(storage.list().await.unwrap(), vec![id]);
        assert_eq!(leftover_temporaries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_item_is_none() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();

        assert_eq!(storage.get(id).await.unwrap(), None);
        assert!(!storage.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("nested")).await.unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        storage.put(a, Bytes::from_static(b"a")).await.unwrap();
        storage.put(b, Bytes::from_static(b"b")).await.unwrap();
        std::fs::write(storage.dir().join("notes.txt"), "hi").unwrap();
        std::fs::write(storage.dir().join("not-a-uuid.json"), "{}").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(storage.list().await.unwrap(), expected);

        assert!(storage.delete(a).await.unwrap());
        assert_eq!(storage.list().await.unwrap(), vec![b]);
    }
}
