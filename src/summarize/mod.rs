// src/summarize/mod.rs
//! Summarization backend abstraction, provider wiring and the worker pool.

pub mod cache;
pub mod extractive;
pub mod pool;
pub mod providers;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ai::{BackendConfig, BackendKind};
use crate::error::BackendError;

pub use cache::CachingBackend;
pub use pool::{PoolEvent, PoolOptions, Summary, SummaryOrigin, SummaryOutcome, SummarizerPool};
pub use providers::{DisabledBackend, MockBackend, OpenAiCompatBackend};

/// Text in, text out. Fallible and possibly rate limited.
#[async_trait]
pub trait SummarizationBackend: Send + Sync {
    /// Short summary of `text`.
    async fn summarize(&self, text: &str) -> Result<String, BackendError>;
    /// Yes/no answer to `question` about `text`.
    async fn classify(&self, text: &str, question: &str) -> Result<bool, BackendError>;
    /// Provider name for logs and `summarized_by`.
    fn name(&self) -> &'static str;
}

pub type DynBackend = Arc<dyn SummarizationBackend>;

fn test_mode_mock() -> bool {
    std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
}

/// Build the configured backend.
///
/// * `AI_TEST_MODE=mock` forces the deterministic mock backend.
/// * `cache_dir` or `daily_limit` wraps the provider in [`CachingBackend`].
pub fn build_backend(cfg: &BackendConfig) -> anyhow::Result<DynBackend> {
    let kind = if test_mode_mock() {
        BackendKind::Mock
    } else {
        cfg.provider
    };

    let inner: DynBackend = match kind {
        BackendKind::Disabled => return Ok(Arc::new(DisabledBackend)),
        BackendKind::Mock => Arc::new(MockBackend::default()),
        BackendKind::Ollama | BackendKind::OpenAi => Arc::new(OpenAiCompatBackend::new(cfg)?),
    };

    if cfg.cache_dir.is_none() && cfg.daily_limit.is_none() {
        return Ok(inner);
    }
    let cache_dir = cfg
        .cache_dir
        .clone()
        .unwrap_or_else(cache::default_cache_dir);
    Ok(Arc::new(CachingBackend::new(inner, cache_dir, cfg.daily_limit)))
}
