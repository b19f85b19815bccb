// src/ingest/providers/arxiv.rs
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use super::feed::{fetch_feed, fetch_many, http_client, parse_feed, FeedEntry, ParsedFeed};
use crate::ingest::types::{CandidateItem, FetchParams, SourceFetcher, SourceTag};

pub const ARXIV_API_BASE: &str = "https://export.arxiv.org/api/query";

pub struct ArxivFetcher {
    mode: Mode,
}

enum Mode {
    Fixture(Vec<String>),
    Http {
        client: reqwest::Client,
        feeds: Vec<String>,
        api_base: String,
    },
}

impl ArxivFetcher {
    /// Parse the given RSS/Atom documents instead of hitting the network.
    pub fn from_fixtures<S: Into<String>>(docs: impl IntoIterator<Item = S>) -> Self {
        Self {
            mode: Mode::Fixture(docs.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_feeds(feeds: Vec<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            mode: Mode::Http {
                client: http_client(timeout)?,
                feeds,
                api_base: ARXIV_API_BASE.to_string(),
            },
        })
    }

    /// Point the Atom API fallback somewhere else (tests, mirrors).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        if let Mode::Http { api_base, .. } = &mut self.mode {
            *api_base = base.into();
        }
        self
    }

    fn items_from(feed: &ParsedFeed) -> Vec<CandidateItem> {
        feed.entries.iter().filter_map(entry_to_item).collect()
    }
}

/// `https://arxiv.org/abs/2410.01234v2` → `2410.01234`; old-style ids keep their archive.
pub fn arxiv_id(s: &str) -> Option<String> {
    static RE_ID: OnceCell<Regex> = OnceCell::new();
    let re = RE_ID.get_or_init(|| {
        Regex::new(r"(?:abs|pdf)/((?:\d{4}\.\d{4,5})|(?:[a-z\-]+(?:\.[A-Z]{2})?/\d{7}))(?:v\d+)?")
            .unwrap()
    });
    re.captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// arXiv RSS descriptions start with "arXiv:… Announce Type: new Abstract: …".
fn strip_announce_prefix(desc: &str) -> &str {
    match desc.find("Abstract:") {
        Some(i) => desc[i + "Abstract:".len()..].trim(),
        None => desc,
    }
}

fn entry_to_item(e: &FeedEntry) -> Option<CandidateItem> {
    let id = arxiv_id(&e.link).or_else(|| e.id.as_deref().and_then(arxiv_id))?;
    let mut item = CandidateItem::new(SourceTag::Arxiv, id, e.title.clone())
        .with_body(strip_announce_prefix(&e.description))
        .with_url(e.link.clone());
    item.published_at = e.published_at;
    Some(item)
}

/// `https://arxiv.org/rss/cs.AI` → `cs.AI`.
fn category_of(feed_url: &str) -> Option<&str> {
    feed_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|c| c.contains('.'))
}

#[async_trait]
impl SourceFetcher for ArxivFetcher {
    async fn fetch(&self, _params: &FetchParams) -> Result<Vec<CandidateItem>> {
        match &self.mode {
            Mode::Fixture(docs) => {
                let mut out = Vec::new();
                for d in docs {
                    out.extend(Self::items_from(&parse_feed(d)?));
                }
                Ok(out)
            }
            Mode::Http {
                client,
                feeds,
                api_base,
            } => {
                let mut out = Vec::new();
                for (url, feed) in fetch_many(client, feeds, "arxiv").await? {
                    if !feed.entries.is_empty() {
                        out.extend(Self::items_from(&feed));
                        continue;
                    }
                    // RSS is empty on weekends; the API is not.
                    let Some(cat) = category_of(&url) else {
                        continue;
                    };
                    let api = format!(
                        "{api_base}?search_query=cat:{cat}&sortBy=submittedDate&sortOrder=descending&max_results=50"
                    );
                    match fetch_feed(client, &api).await {
                        Ok(feed) => out.extend(Self::items_from(&feed)),
                        Err(e) => {
                            tracing::warn!(error = ?e, provider = "arxiv", %cat, "atom api fallback failed")
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn tag(&self) -> SourceTag {
        SourceTag::Arxiv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_drop_version_and_url() {
        assert_eq!(
            arxiv_id("https://arxiv.org/abs/2410.01234v2").as_deref(),
            Some("2410.01234")
        );
        assert_eq!(
            arxiv_id("http://arxiv.org/pdf/2501.00001").as_deref(),
            Some("2501.00001")
        );
        assert_eq!(
            arxiv_id("http://arxiv.org/abs/cs/0112017v1").as_deref(),
            Some("cs/0112017")
        );
        assert_eq!(arxiv_id("https://example.com/post"), None);
    }

    #[test]
    fn category_from_feed_url() {
        assert_eq!(category_of("https://arxiv.org/rss/cs.AI"), Some("cs.AI"));
        assert_eq!(category_of("https://arxiv.org/rss/"), None);
    }

    #[test]
    fn announce_prefix_is_removed() {
        assert_eq!(
            strip_announce_prefix("arXiv:2410.01234v1 Announce Type: new Abstract: We study X."),
            "We study X."
        );
        assert_eq!(strip_announce_prefix("Plain text."), "Plain text.");
    }
}
