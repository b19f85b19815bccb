// src/store/mod.rs
//! Persistent item store: trait, record types and the per-cycle write lease.

pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::ingest::types::{CandidateItem, IdentityKey, SourceTag};

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Pending,
    Done,
    Failed,
}

/// Why the relevance filter accepted the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceRecord {
    pub keep: bool,
    pub reason: String,
}

/// Persisted form of an accepted candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub source: SourceTag,
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Backend name, or "extractive" for the local fallback.
    pub summarized_by: Option<String>,
    pub relevance: RelevanceRecord,
    pub status: SummaryStatus,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_hash: String,
}

impl StoredItem {
    /// A freshly accepted item, not yet summarized.
    pub fn pending(item: &CandidateItem, relevance: RelevanceRecord, now: DateTime<Utc>) -> Self {
        Self {
            source: item.source,
            external_id: item.external_id.clone(),
            title: item.title.clone(),
            body: item.body.clone(),
            url: item.url.clone(),
            domain: item.domain.clone(),
            published_at: item.published_at,
            summary: None,
            summarized_by: None,
            relevance,
            status: SummaryStatus::Pending,
            inserted_at: now,
            updated_at: now,
            content_hash: content_hash(&item.title, item.url.as_deref(), &item.body),
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.source, self.external_id.clone())
    }

    /// Rebuild the candidate so a pending item can go through the pool again.
    pub fn to_candidate(&self) -> CandidateItem {
        CandidateItem {
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            source: self.source,
            published_at: self.published_at,
            domain: self.domain.clone(),
            url: self.url.clone(),
            points: None,
            feed_title: None,
        }
    }

    pub fn mark_done(&mut self, summary: String, by: &str, now: DateTime<Utc>) {
        self.summary = Some(summary);
        self.summarized_by = Some(by.to_string());
        self.status = SummaryStatus::Done;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = SummaryStatus::Failed;
        self.updated_at = now;
    }
}

/// SHA-256 over title, url and the first 1000 chars of the body.
pub fn content_hash(title: &str, url: Option<&str>, body: &str) -> String {
    use sha2::{Digest, Sha256};
    let head: String = body.chars().take(1000).collect();
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"||");
    hasher.update(url.unwrap_or_default().as_bytes());
    hasher.update(b"||");
    hasher.update(head.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Listing filters for `GET /items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemQuery {
    #[serde(default)]
    pub source: Option<SourceTag>,
    /// Case-insensitive substring of the title.
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub only_summarized: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub(crate) fn sources_of<'a>(items: impl Iterator<Item = &'a StoredItem>) -> Vec<SourceTag> {
    items
        .map(|it| it.source)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 200;

impl ItemQuery {
    pub fn matches(&self, item: &StoredItem) -> bool {
        if let Some(src) = self.source {
            if item.source != src {
                return false;
            }
        }
        if let Some(q) = self.q.as_deref().filter(|q| !q.trim().is_empty()) {
            if !item
                .title
                .to_lowercase()
                .contains(&q.trim().to_lowercase())
            {
                return false;
            }
        }
        if let Some(d) = self.domain.as_deref().filter(|d| !d.trim().is_empty()) {
            if item.domain.as_deref() != Some(d.trim().to_ascii_lowercase().as_str()) {
                return false;
            }
        }
        if self.only_summarized && item.summary.is_none() {
            return false;
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    /// Filter, sort newest first (published, then inserted) and page.
    pub fn apply<'a, I>(&self, items: I) -> Vec<StoredItem>
    where
        I: IntoIterator<Item = &'a StoredItem>,
    {
        let mut rows: Vec<StoredItem> = items
            .into_iter()
            .filter(|it| self.matches(it))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.inserted_at.cmp(&a.inserted_at))
        });
        rows.into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.effective_limit())
            .collect()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn exists(&self, key: &IdentityKey) -> Result<bool, StoreError>;
    /// Insert or replace by identity key. An existing `inserted_at` is preserved.
    async fn upsert(&self, item: StoredItem) -> Result<(), StoreError>;
    /// Pending items, oldest insertion first.
    async fn pending(&self, limit: usize) -> Result<Vec<StoredItem>, StoreError>;
    async fn list(&self, query: &ItemQuery) -> Result<Vec<StoredItem>, StoreError>;
    /// Distinct source tags among stored items, sorted.
    async fn sources(&self) -> Result<Vec<SourceTag>, StoreError>;
    fn name(&self) -> &'static str;
}

/// Store handle shared by the API and the cycles, with an exclusive write lease.
#[derive(Clone)]
pub struct SharedStore {
    store: Arc<dyn Store>,
    writer: Arc<Mutex<()>>,
}

impl SharedStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Read access; never blocks on a running cycle.
    pub fn reader(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Wait for the write lease.
    pub async fn lease(&self) -> StoreLease {
        let guard = self.writer.clone().lock_owned().await;
        tracing::debug!(target: "store", store = self.store.name(), "store lease acquired");
        StoreLease {
            store: self.store.clone(),
            _guard: guard,
        }
    }

    /// Take the lease only if no cycle holds it.
    pub fn try_lease(&self) -> Option<StoreLease> {
        let guard = self.writer.clone().try_lock_owned().ok()?;
        tracing::debug!(target: "store", store = self.store.name(), "store lease acquired");
        Some(StoreLease {
            store: self.store.clone(),
            _guard: guard,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.writer.try_lock().is_err()
    }
}

/// Exclusive write access for one cycle; released on drop.
pub struct StoreLease {
    store: Arc<dyn Store>,
    _guard: OwnedMutexGuard<()>,
}

impl StoreLease {
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
}

impl Drop for StoreLease {
    fn drop(&mut self) {
        tracing::debug!(target: "store", store = self.store.name(), "store lease released");
    }
}
