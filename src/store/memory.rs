// src/store/memory.rs
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{sources_of, ItemQuery, Store, StoredItem, SummaryStatus};
use crate::error::StoreError;
use crate::ingest::types::{IdentityKey, SourceTag};

/// In-process store; the map is the whole state.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<IdentityKey, StoredItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = StoredItem>) -> Self {
        let map = items
            .into_iter()
            .map(|it| (it.identity_key(), it))
            .collect();
        Self {
            items: Mutex::new(map),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<IdentityKey, StoredItem>>, StoreError> {
        self.items
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &IdentityKey) -> Option<StoredItem> {
        self.items.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(key))
    }

    async fn upsert(&self, mut item: StoredItem) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        let key = item.identity_key();
        if let Some(prev) = map.get(&key) {
            item.inserted_at = prev.inserted_at;
        }
        map.insert(key, item);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        Ok(pending_of(self.lock()?.values(), limit))
    }

    async fn list(&self, query: &ItemQuery) -> Result<Vec<StoredItem>, StoreError> {
        Ok(query.apply(self.lock()?.values()))
    }

    async fn sources(&self) -> Result<Vec<SourceTag>, StoreError> {
        Ok(sources_of(self.lock()?.values()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Oldest-inserted pending items first.
pub(crate) fn pending_of<'a>(
    items: impl Iterator<Item = &'a StoredItem>,
    limit: usize,
) -> Vec<StoredItem> {
    let mut rows: Vec<StoredItem> = items
        .filter(|it| it.status == SummaryStatus::Pending)
        .cloned()
        .collect();
    rows.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at));
    rows.truncate(limit);
    rows
}
