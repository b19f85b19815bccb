// src/store/file.rs
//! JSON snapshot store: the whole map is rewritten (tmp + rename) on every upsert.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::memory::pending_of;
use super::{sources_of, ItemQuery, Store, StoredItem};
use crate::error::StoreError;
use crate::ingest::types::{IdentityKey, SourceTag};

pub struct FileStore {
    path: PathBuf,
    items: Mutex<BTreeMap<IdentityKey, StoredItem>>,
}

impl FileStore {
    /// Open (or create) the snapshot at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let items = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => BTreeMap::new(),
            Ok(s) => {
                let rows: Vec<StoredItem> = serde_json::from_str(&s)?;
                rows.into_iter().map(|r| (r.identity_key(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            target: "store",
            path = %path.display(),
            items = items.len(),
            "file store opened"
        );
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn write_snapshot(
    path: &Path,
    items: &BTreeMap<IdentityKey, StoredItem>,
) -> Result<(), StoreError> {
    let rows: Vec<&StoredItem> = items.values().collect();
    let json = serde_json::to_vec_pretty(&rows)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Store for FileStore {
    async fn exists(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        Ok(self.items.lock().await.contains_key(key))
    }

    async fn upsert(&self, mut item: StoredItem) -> Result<(), StoreError> {
        let mut map = self.items.lock().await;
        let key = item.identity_key();
        let prev = map.get(&key).cloned();
        if let Some(p) = &prev {
            item.inserted_at = p.inserted_at;
        }
        map.insert(key.clone(), item);

        if let Err(e) = write_snapshot(&self.path, &map).await {
            // Memory must not run ahead of disk.
            match prev {
                Some(p) => map.insert(key, p),
                None => map.remove(&key),
            };
            tracing::warn!(target: "store", error = %e, path = %self.path.display(), "snapshot write failed");
            return Err(e);
        }
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        Ok(pending_of(self.items.lock().await.values(), limit))
    }

    async fn list(&self, query: &ItemQuery) -> Result<Vec<StoredItem>, StoreError> {
        Ok(query.apply(self.items.lock().await.values()))
    }

    async fn sources(&self) -> Result<Vec<SourceTag>, StoreError> {
        Ok(sources_of(self.items.lock().await.values()))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
