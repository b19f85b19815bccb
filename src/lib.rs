// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod relevance;
pub mod store;
pub mod summarize;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::ingest::types::{CandidateItem, IdentityKey, RefreshRequest, SourceFetcher, SourceTag};
pub use crate::orchestrator::{run_cycle, try_run_cycle, CycleContext, CycleHandle, CycleReport};
pub use crate::progress::{ProgressEvent, ProgressUpdate};

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{BackendConfig, BackendKind, Settings};
use crate::ingest::providers::build_fetchers;
use crate::orchestrator::CycleOptions;
use crate::relevance::{RelevanceConfig, RelevanceFilter};
use crate::store::{FileStore, MemoryStore, SharedStore, Store};
use crate::summarize::build_backend;

/// Open the configured store: a JSON file, or memory when no path is set.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn Store>> {
    Ok(match &settings.store_path {
        Some(path) => Arc::new(
            FileStore::open(path.clone())
                .await
                .with_context(|| format!("opening store at {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    })
}

/// Wire live fetchers, the store, the backend and the relevance filter together.
pub async fn build_context(
    settings: &Settings,
    ai: &BackendConfig,
    relevance: RelevanceConfig,
    news_feeds: Vec<String>,
) -> anyhow::Result<Arc<CycleContext>> {
    let store = open_store(settings).await?;
    let backend = build_backend(ai)?;
    let fetchers = build_fetchers(settings, news_feeds)?;

    // Asking a disabled backend would only ever hit the error path.
    let classifier = (ai.provider != BackendKind::Disabled).then(|| backend.clone());
    let relevance = RelevanceFilter::new(
        relevance.with_classifier(
            ai.classifier_enabled,
            ai.classifier_fail_open,
            ai.classify_timeout(),
        ),
        classifier,
    );

    info!(
        target: "ingest",
        store = store.name(),
        backend = backend.name(),
        sources = fetchers.len(),
        "cycle context ready"
    );

    Ok(Arc::new(CycleContext {
        fetchers,
        store: SharedStore::new(store),
        backend,
        relevance,
        options: CycleOptions::from_config(settings, ai),
    }))
}
