// src/ingest/types.rs
use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of source types the pipeline knows how to fetch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Arxiv,
    HackerNews,
    Rss,
}

impl SourceTag {
    pub const ALL: [SourceTag; 3] = [SourceTag::Arxiv, SourceTag::HackerNews, SourceTag::Rss];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Arxiv => "arxiv",
            SourceTag::HackerNews => "hacker_news",
            SourceTag::Rss => "rss",
        }
    }

    /// Lenient parse used by query strings and env vars ("hn", "HackerNews", ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "arxiv" | "papers" => Some(SourceTag::Arxiv),
            "hacker_news" | "hackernews" | "hn" => Some(SourceTag::HackerNews),
            "rss" | "news" | "blogs" => Some(SourceTag::Rss),
            _ => None,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (source tag, external id): unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub source: SourceTag,
    pub external_id: String,
}

impl IdentityKey {
    pub fn new(source: SourceTag, external_id: impl Into<String>) -> Self {
        Self {
            source,
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.external_id)
    }
}

/// A not-yet-accepted item pulled from a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub external_id: String, // URL or arXiv id
    pub title: String,
    pub body: String, // normalized abstract / description, may be empty
    pub source: SourceTag,
    pub published_at: Option<DateTime<Utc>>,
    pub domain: Option<String>,
    pub url: Option<String>,
    pub points: Option<i64>, // Hacker News only
    pub feed_title: Option<String>,
}

impl CandidateItem {
    pub fn new(source: SourceTag, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: title.into(),
            body: String::new(),
            source,
            published_at: None,
            domain: None,
            url: None,
            points: None,
            feed_title: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.domain = domain_of(&url);
        self.url = Some(url);
        self
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(self.source, self.external_id.clone())
    }

    /// Title and body joined, used for keyword matching and as backend input.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body)
        }
    }
}

/// Lowercased host without a leading `www.`.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Per-source knobs of a refresh request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilters {
    /// Drop aggregator items below this score (Hacker News points).
    #[serde(default)]
    pub min_points: Option<i64>,
    /// Query terms for search-based sources. Empty = provider defaults.
    #[serde(default)]
    pub search_terms: Vec<String>,
    /// Keep only items whose domain ends with one of these. Empty = allow all.
    #[serde(default)]
    pub domain_allow_list: Vec<String>,
}

/// Parameters of one ingestion cycle. Immutable while the cycle runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// Discard items older than this many days. `None` or 0 disables the cutoff.
    #[serde(default)]
    pub max_age_days: Option<u32>,
    /// Maximum number of items summarized in this cycle.
    pub limit: usize,
    /// Concurrent summarization calls; <= 1 means sequential.
    pub concurrency: usize,
    /// Sources to run. Empty = every configured source.
    #[serde(default)]
    pub sources: Vec<SourceTag>,
    #[serde(default)]
    pub filters: BTreeMap<SourceTag, SourceFilters>,
}

impl Default for RefreshRequest {
    fn default() -> Self {
        Self {
            max_age_days: Some(7),
            limit: 30,
            concurrency: 1,
            sources: Vec::new(),
            filters: BTreeMap::new(),
        }
    }
}

impl RefreshRequest {
    pub fn filters_for(&self, tag: SourceTag) -> SourceFilters {
        self.filters.get(&tag).cloned().unwrap_or_default()
    }

    pub fn includes(&self, tag: SourceTag) -> bool {
        self.sources.is_empty() || self.sources.contains(&tag)
    }

    /// Oldest acceptable publish time, if a cutoff is set.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.max_age_days {
            Some(days) if days > 0 => Some(now - chrono::Duration::days(i64::from(days))),
            _ => None,
        }
    }
}

/// What a fetcher gets to see of the request.
#[derive(Debug, Clone, Default)]
pub struct FetchParams {
    pub cutoff: Option<DateTime<Utc>>,
    pub filters: SourceFilters,
}

#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<CandidateItem>>;
    fn tag(&self) -> SourceTag;
    fn name(&self) -> &'static str {
        self.tag().as_str()
    }
}
