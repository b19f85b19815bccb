// src/ingest/providers/feed.rs
//! Shared RSS 2.0 / Atom parsing for the feed-based providers.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::normalize_text;

/// Browser-like UA; several blogs reject unknown agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<Text>,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element text that may carry attributes (`<title type="html">`).
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

/// One entry of a parsed feed, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub id: Option<String>,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// RFC 2822 (RSS) first, then RFC 3339 (Atom).
pub fn parse_feed_date(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), 0)
}

/// Parse RSS 2.0 or Atom, whichever the document root says it is.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);

    let parsed = if looks_like_atom(&xml_clean) {
        let feed: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
        parse_atom(feed)
    } else {
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
        parse_rss(rss)
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_parse_ms").record(ms);
    Ok(parsed)
}

fn looks_like_atom(xml: &str) -> bool {
    let head: String = xml.chars().take(512).collect();
    head.contains("<feed") && !head.contains("<rss")
}

fn parse_rss(rss: Rss) -> ParsedFeed {
    let mut entries = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let link = it.link.map(|l| l.trim().to_string()).unwrap_or_default();
        if link.is_empty() {
            continue;
        }
        entries.push(FeedEntry {
            title: normalize_text(it.title.as_deref().unwrap_or_default()),
            link,
            id: it.guid.map(|g| g.value.trim().to_string()).filter(|g| !g.is_empty()),
            description: normalize_text(it.description.as_deref().unwrap_or_default()),
            published_at: it.pub_date.as_deref().and_then(parse_feed_date),
        });
    }
    ParsedFeed {
        title: rss.channel.title.map(|t| normalize_text(&t)),
        entries,
    }
}

fn parse_atom(feed: AtomFeed) -> ParsedFeed {
    let mut entries = Vec::with_capacity(feed.entry.len());
    for e in feed.entry {
        // Prefer rel="alternate" (or no rel), then any href.
        let link = e
            .link
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| e.link.first())
            .and_then(|l| l.href.clone())
            .unwrap_or_default();
        if link.is_empty() {
            continue;
        }
        let description = e
            .summary
            .or(e.content)
            .map(|t| normalize_text(&t.value))
            .unwrap_or_default();
        let published_at = e
            .published
            .as_deref()
            .or(e.updated.as_deref())
            .and_then(parse_feed_date);
        entries.push(FeedEntry {
            title: normalize_text(&e.title.unwrap_or_default().value),
            link,
            id: e.id.map(|i| i.trim().to_string()),
            description,
            published_at,
        });
    }
    ParsedFeed {
        title: feed.title.map(|t| normalize_text(&t.value)),
        entries,
    }
}

/// XML has no named entities beyond the basic five; blogs use HTML ones anyway.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow!("building http client: {e}"))
}

/// GET a feed and parse it; non-2xx is an error.
pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<ParsedFeed> {
    let body = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()
        .with_context(|| format!("GET {url}"))?
        .text()
        .await
        .with_context(|| format!("reading body of {url}"))?;
    parse_feed(&body).with_context(|| format!("parsing feed {url}"))
}

/// Fetch several feeds; individual failures are logged and skipped.
/// Errors only when every feed failed.
pub async fn fetch_many(
    client: &reqwest::Client,
    urls: &[String],
    provider: &'static str,
) -> Result<Vec<(String, ParsedFeed)>> {
    let results =
        futures::future::join_all(urls.iter().map(|u| async move { (u, fetch_feed(client, u).await) }))
            .await;

    let mut out = Vec::with_capacity(results.len());
    let mut last_err = None;
    for (url, res) in results {
        match res {
            Ok(feed) => out.push((url.clone(), feed)),
            Err(e) => {
                tracing::warn!(error = ?e, provider, url = %url, "feed fetch failed");
                metrics::counter!("ingest_feed_errors_total", "provider" => provider).increment(1);
                last_err = Some(e);
            }
        }
    }
    match (out.is_empty(), last_err) {
        (true, Some(e)) => Err(e.context(format!("all {} {provider} feeds failed", urls.len()))),
        _ => Ok(out),
    }
}
