// src/ingest/providers/hn.rs
//! Hacker News via the Algolia search API.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use super::feed::http_client;
use crate::config::settings::DEFAULT_HN_TERMS;
use crate::ingest::normalize_text;
use crate::ingest::types::{CandidateItem, FetchParams, SourceFetcher, SourceTag};

pub const ALGOLIA_BASE: &str = "https://hn.algolia.com/api/v1";
pub const HN_ITEM_URL: &str = "https://news.ycombinator.com/item?id=";
const HITS_PER_PAGE: u32 = 50;

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "objectID")]
    object_id: Option<String>,
    title: Option<String>,
    story_title: Option<String>,
    url: Option<String>,
    story_url: Option<String>,
    created_at: Option<String>,
    created_at_i: Option<i64>,
    points: Option<i64>,
}

pub struct HnFetcher {
    mode: Mode,
}

enum Mode {
    Fixture(Vec<String>),
    Http {
        client: reqwest::Client,
        base: String,
    },
}

impl HnFetcher {
    /// Parse the given Algolia JSON responses instead of hitting the network.
    pub fn from_fixtures<S: Into<String>>(pages: impl IntoIterator<Item = S>) -> Self {
        Self {
            mode: Mode::Fixture(pages.into_iter().map(Into::into).collect()),
        }
    }

    pub fn from_algolia(timeout: Duration) -> Result<Self> {
        Self::with_base(ALGOLIA_BASE, timeout)
    }

    pub fn with_base(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            mode: Mode::Http {
                client: http_client(timeout)?,
                base: base.into().trim_end_matches('/').to_string(),
            },
        })
    }

    fn parse_page(s: &str) -> Result<Vec<CandidateItem>> {
        let resp: SearchResp = serde_json::from_str(s).context("parsing algolia json")?;
        Ok(resp.hits.into_iter().filter_map(hit_to_item).collect())
    }

    async fn get_page(client: &reqwest::Client, url: &str, query: &[(&str, String)]) -> Result<Vec<CandidateItem>> {
        let body = client
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .text()
            .await
            .context("algolia .text()")?;
        Self::parse_page(&body)
    }
}

fn hit_to_item(h: Hit) -> Option<CandidateItem> {
    let title = normalize_text(h.title.as_deref().or(h.story_title.as_deref()).unwrap_or_default());
    if title.is_empty() {
        return None;
    }
    // Ask HN and friends have no external URL.
    let url = h
        .url
        .or(h.story_url)
        .filter(|u| !u.trim().is_empty())
        .or_else(|| h.object_id.as_ref().map(|id| format!("{HN_ITEM_URL}{id}")))?;

    let published_at = h
        .created_at_i
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .or_else(|| {
            h.created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
        });

    let mut item = CandidateItem::new(SourceTag::HackerNews, url.clone(), title).with_url(url);
    item.published_at = published_at;
    item.points = h.points;
    Some(item)
}

/// Keep the first hit per URL.
fn dedup_by_id(items: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| seen.insert(i.external_id.clone()))
        .collect()
}

#[async_trait]
impl SourceFetcher for HnFetcher {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<CandidateItem>> {
        match &self.mode {
            Mode::Fixture(pages) => {
                let mut out = Vec::new();
                for p in pages {
                    out.extend(Self::parse_page(p)?);
                }
                Ok(dedup_by_id(out))
            }
            Mode::Http { client, base } => {
                let terms: Vec<String> = if params.filters.search_terms.is_empty() {
                    DEFAULT_HN_TERMS.iter().map(|s| s.to_string()).collect()
                } else {
                    params.filters.search_terms.clone()
                };

                let by_date = format!("{base}/search_by_date");
                let mut requests: Vec<(String, Vec<(&str, String)>)> = terms
                    .iter()
                    .map(|term| {
                        let mut q = vec![
                            ("query", term.clone()),
                            ("tags", "story".to_string()),
                            ("hitsPerPage", HITS_PER_PAGE.to_string()),
                            ("page", "0".to_string()),
                        ];
                        if let Some(c) = params.cutoff {
                            q.push(("numericFilters", format!("created_at_i>{}", c.timestamp())));
                        }
                        (by_date.clone(), q)
                    })
                    .collect();
                requests.push((
                    format!("{base}/search"),
                    vec![
                        ("tags", "front_page".to_string()),
                        ("hitsPerPage", HITS_PER_PAGE.to_string()),
                        ("page", "0".to_string()),
                    ],
                ));

                let total = requests.len();
                let results = futures::future::join_all(
                    requests
                        .iter()
                        .map(|(url, q)| Self::get_page(client, url, q)),
                )
                .await;

                let mut out = Vec::new();
                let mut failures = 0usize;
                for res in results {
                    match res {
                        Ok(items) => out.extend(items),
                        Err(e) => {
                            failures += 1;
                            tracing::warn!(error = ?e, provider = "hacker_news", "algolia request failed");
                            counter!("ingest_feed_errors_total", "provider" => "hacker_news").increment(1);
                        }
                    }
                }
                if failures == total {
                    return Err(anyhow!("all {total} algolia requests failed"));
                }
                Ok(dedup_by_id(out))
            }
        }
    }

    fn tag(&self) -> SourceTag {
        SourceTag::HackerNews
    }
}
