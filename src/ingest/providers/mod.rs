// src/ingest/providers/mod.rs
pub mod arxiv;
pub mod feed;
pub mod hn;
pub mod rss;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Settings;
use crate::ingest::types::SourceFetcher;

pub use arxiv::ArxivFetcher;
pub use hn::HnFetcher;
pub use rss::RssFetcher;

/// Live fetchers for every configured source. Hacker News is left out when disabled.
pub fn build_fetchers(settings: &Settings, news_feeds: Vec<String>) -> Result<Vec<Arc<dyn SourceFetcher>>> {
    let timeout = Duration::from_secs(settings.fetch_timeout_secs.max(1));
    let mut out: Vec<Arc<dyn SourceFetcher>> = Vec::with_capacity(3);
    if !settings.arxiv_feeds.is_empty() {
        out.push(Arc::new(ArxivFetcher::from_feeds(
            settings.arxiv_feeds.clone(),
            timeout,
        )?));
    }
    if settings.hn_enable {
        out.push(Arc::new(HnFetcher::from_algolia(timeout)?));
    }
    if !news_feeds.is_empty() {
        out.push(Arc::new(RssFetcher::from_feeds(news_feeds, timeout)?));
    }
    Ok(out)
}
