// src/ingest/providers/rss.rs
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use metrics::counter;

use super::feed::{fetch_many, http_client, parse_feed, ParsedFeed};
use crate::ingest::types::{CandidateItem, FetchParams, SourceFetcher, SourceTag};

/// Blog and news feeds, RSS 2.0 or Atom.
pub struct RssFetcher {
    mode: Mode,
}

enum Mode {
    Fixture(Vec<String>),
    Http {
        client: reqwest::Client,
        feeds: Vec<String>,
    },
}

impl RssFetcher {
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
            },
        })
    }

    fn items_from(feed: ParsedFeed) -> Vec<CandidateItem> {
        let feed_title = feed.title;
        let out: Vec<CandidateItem> = feed
            .entries
            .into_iter()
            .filter(|e| !e.title.is_empty())
            .map(|e| {
                let mut item = CandidateItem::new(SourceTag::Rss, e.link.clone(), e.title)
                    .with_body(e.description)
                    .with_url(e.link);
                item.published_at = e.published_at;
                item.feed_title = feed_title.clone();
                item
            })
            .collect();
        counter!("ingest_items_parsed_total", "provider" => "rss").increment(out.len() as u64);
        out
    }
}

#[async_trait]
impl SourceFetcher for RssFetcher {
    async fn fetch(&self, _params: &FetchParams) -> Result<Vec<CandidateItem>> {
        match &self.mode {
            Mode::Fixture(docs) => {
                let mut out = Vec::new();
                for d in docs {
                    out.extend(Self::items_from(parse_feed(d)?));
                }
                Ok(out)
            }
            Mode::Http { client, feeds } => Ok(fetch_many(client, feeds, "rss")
                .await?
                .into_iter()
                .flat_map(|(_, feed)| Self::items_from(feed))
                .collect()),
        }
    }

    fn tag(&self) -> SourceTag {
        SourceTag::Rss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOG: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Lab Blog</title>
<item><title>Scaling agents</title><link>https://www.lab.example/agents</link>
<pubDate>Mon, 13 Oct 2025 10:00:00 GMT</pubDate><description>Agents at scale.</description></item>
<item><title></title><link>https://www.lab.example/untitled</link></item>
</channel></rss>"#;

    #[tokio::test]
    async fn entries_carry_link_domain_and_feed_title() {
        let f = RssFetcher::from_fixtures([BLOG]);
        let items = f.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.external_id, "https://www.lab.example/agents");
        assert_eq!(it.domain.as_deref(), Some("lab.example"));
        assert_eq!(it.feed_title.as_deref(), Some("Lab Blog"));
        assert_eq!(it.body, "Agents at scale.");
    }

    #[tokio::test]
    async fn every_feed_failing_is_an_error() {
        let f = RssFetcher::from_feeds(
            vec!["http://127.0.0.1:9/a.xml".into(), "http://127.0.0.1:9/b.xml".into()],
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(f.fetch(&FetchParams::default()).await.is_err());
    }
}
