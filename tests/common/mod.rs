// tests/common/mod.rs
//
// In-process test doubles shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;

use ai_news_agent::error::{BackendError, StoreError};
use ai_news_agent::ingest::types::{
    CandidateItem, FetchParams, IdentityKey, SourceFetcher, SourceTag,
};
use ai_news_agent::orchestrator::{CycleContext, CycleHandle, CycleOptions, CycleReport};
use ai_news_agent::progress::ProgressUpdate;
use ai_news_agent::relevance::{RelevanceConfig, RelevanceFilter};
use ai_news_agent::store::{
    ItemQuery, MemoryStore, RelevanceRecord, SharedStore, Store, StoredItem, SummaryStatus,
};
use ai_news_agent::summarize::{DynBackend, SummarizationBackend};

/// An item published an hour ago with a title that clearly matches the AI terms.
pub fn ai_item(source: SourceTag, id: &str) -> CandidateItem {
    CandidateItem::new(source, id, format!("LLM agents top new benchmark {id}"))
        .with_body(format!(
            "We release {id}. The model improves reasoning on several tasks. Code is available."
        ))
        .with_url(format!("https://lab.example/{id}"))
        .with_published_at(Utc::now() - chrono::Duration::hours(1))
}

/// Stored as already summarized.
pub fn done_row(item: &CandidateItem) -> StoredItem {
    let now = Utc::now();
    let mut row = StoredItem::pending(
        item,
        RelevanceRecord {
            keep: true,
            reason: "keyword_strong".into(),
        },
        now,
    );
    row.mark_done("already here".into(), "mock", now);
    row
}

/// Returns the same items on every call, or fails.
pub struct StaticFetcher {
    tag: SourceTag,
    items: Vec<CandidateItem>,
    fail: bool,
    delay: Duration,
    pub calls: AtomicUsize,
    /// Fetches that ran to the end.
    pub finished: AtomicUsize,
}

impl StaticFetcher {
    fn build(tag: SourceTag, items: Vec<CandidateItem>, fail: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            tag,
            items,
            fail,
            delay,
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    pub fn new(tag: SourceTag, items: Vec<CandidateItem>) -> Arc<Self> {
        Self::build(tag, items, false, Duration::ZERO)
    }

    pub fn failing(tag: SourceTag) -> Arc<Self> {
        Self::build(tag, Vec::new(), true, Duration::ZERO)
    }

    /// Sleeps before answering.
    pub fn slow(tag: SourceTag, items: Vec<CandidateItem>, delay: Duration) -> Arc<Self> {
        Self::build(tag, items, false, delay)
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, _params: &FetchParams) -> anyhow::Result<Vec<CandidateItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.items.clone())
    }

    fn tag(&self) -> SourceTag {
        self.tag
    }
}

/// Memory store that refuses writes for one key.
pub struct FlakyStore {
    inner: MemoryStore,
    broken: IdentityKey,
    /// Only refuse the final (done/failed) write; the pending row goes through.
    only_final: bool,
}

impl FlakyStore {
    pub fn new(broken: IdentityKey) -> Self {
        Self {
            inner: MemoryStore::new(),
            broken,
            only_final: false,
        }
    }

    pub fn failing_final_write(broken: IdentityKey) -> Self {
        Self {
            only_final: true,
            ..Self::new(broken)
        }
    }

    pub fn get(&self, key: &IdentityKey) -> Option<StoredItem> {
        self.inner.get(key)
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn exists(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    async fn upsert(&self, item: StoredItem) -> Result<(), StoreError> {
        let refuse = item.identity_key() == self.broken
            && (!self.only_final || item.status != SummaryStatus::Pending);
        if refuse {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.upsert(item).await
    }

    async fn pending(&self, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        self.inner.pending(limit).await
    }

    async fn list(&self, query: &ItemQuery) -> Result<Vec<StoredItem>, StoreError> {
        self.inner.list(query).await
    }

    async fn sources(&self) -> Result<Vec<SourceTag>, StoreError> {
        self.inner.sources().await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Backend with scripted behavior that records how many calls overlap.
pub struct ScriptedBackend {
    pub delay: Duration,
    pub fail_summaries: bool,
    pub classify: Result<bool, BackendError>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_summaries: false,
            classify: Ok(true),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_summaries: true,
            ..Self::ok()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_classify(mut self, answer: Result<bool, BackendError>) -> Self {
        self.classify = answer;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummarizationBackend for ScriptedBackend {
    async fn summarize(&self, text: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_summaries {
            return Err(BackendError::Status(503));
        }
        let first = text.lines().next().unwrap_or_default();
        Ok(format!("summary of {first}"))
    }

    async fn classify(&self, _text: &str, _question: &str) -> Result<bool, BackendError> {
        self.classify.clone()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn context(
    fetchers: Vec<Arc<StaticFetcher>>,
    store: Arc<dyn Store>,
    backend: Arc<ScriptedBackend>,
) -> Arc<CycleContext> {
    context_with(fetchers, store, backend, RelevanceConfig::default(), CycleOptions::default())
}

pub fn context_with(
    fetchers: Vec<Arc<StaticFetcher>>,
    store: Arc<dyn Store>,
    backend: Arc<ScriptedBackend>,
    relevance: RelevanceConfig,
    options: CycleOptions,
) -> Arc<CycleContext> {
    context_for_backend(fetchers, store, backend, relevance, options)
}

/// Same as `context_with`, for any backend.
pub fn context_for_backend(
    fetchers: Vec<Arc<StaticFetcher>>,
    store: Arc<dyn Store>,
    backend: DynBackend,
    relevance: RelevanceConfig,
    options: CycleOptions,
) -> Arc<CycleContext> {
    let fetchers: Vec<Arc<dyn SourceFetcher>> = fetchers
        .into_iter()
        .map(|f| f as Arc<dyn SourceFetcher>)
        .collect();
    Arc::new(CycleContext {
        fetchers,
        store: SharedStore::new(store),
        relevance: RelevanceFilter::new(relevance, Some(backend.clone())),
        backend,
        options,
    })
}

/// Drain the progress stream, then join the cycle.
pub async fn collect(handle: CycleHandle) -> (Vec<ProgressUpdate>, CycleReport) {
    let events: Vec<ProgressUpdate> = handle.events.collect().await;
    let report = handle.report.await.expect("cycle task panicked");
    (events, report)
}

pub fn names(events: &[ProgressUpdate]) -> Vec<&'static str> {
    events.iter().map(|u| u.event.name()).collect()
}
