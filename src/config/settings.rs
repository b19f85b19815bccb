// src/config/settings.rs
//! Application settings: `config/app.toml` plus env overrides.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{RefreshRequest, SourceFilters, SourceTag};

pub const DEFAULT_APP_CONFIG_PATH: &str = "config/app.toml";
pub const ENV_APP_CONFIG_PATH: &str = "APP_CONFIG_PATH";

pub const DEFAULT_HN_TERMS: [&str; 8] = [
    "AI",
    "LLM",
    "machine learning",
    "deep learning",
    "NLP",
    "OpenAI",
    "人工智能",
    "大模型",
];

pub const DEFAULT_ARXIV_FEEDS: [&str; 1] = ["https://arxiv.org/rss/cs.AI"];

fn default_store_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/items.json"))
}
fn default_max_age_days() -> u32 {
    7
}
fn default_summarize_limit() -> usize {
    30
}
fn default_summarize_concurrency() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_hn_terms() -> Vec<String> {
    DEFAULT_HN_TERMS.iter().map(|s| s.to_string()).collect()
}
fn default_hn_min_points() -> i64 {
    10
}
fn default_arxiv_feeds() -> Vec<String> {
    DEFAULT_ARXIV_FEEDS.iter().map(|s| s.to_string()).collect()
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_progress_buffer() -> usize {
    64
}
fn default_refresh_interval_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Required on refresh/cancel endpoints when set.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// JSON snapshot file; `None` keeps items in memory only.
    #[serde(default = "default_store_path")]
    pub store_path: Option<PathBuf>,
    #[serde(default = "default_max_age_days")]
    pub max_age_days_default: u32,
    #[serde(default = "default_summarize_limit")]
    pub summarize_limit: usize,
    #[serde(default = "default_summarize_concurrency")]
    pub summarize_concurrency: usize,
    #[serde(default = "default_true")]
    pub hn_enable: bool,
    #[serde(default = "default_hn_terms")]
    pub hn_query_terms: Vec<String>,
    #[serde(default = "default_hn_min_points")]
    pub hn_min_points: i64,
    #[serde(default = "default_arxiv_feeds")]
    pub arxiv_feeds: Vec<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
    #[serde(default)]
    pub scheduler_enabled: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admin_token: None,
            store_path: default_store_path(),
            max_age_days_default: default_max_age_days(),
            summarize_limit: default_summarize_limit(),
            summarize_concurrency: default_summarize_concurrency(),
            hn_enable: true,
            hn_query_terms: default_hn_terms(),
            hn_min_points: default_hn_min_points(),
            arxiv_feeds: default_arxiv_feeds(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            progress_buffer: default_progress_buffer(),
            scheduler_enabled: false,
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Settings = toml::from_str(s).context("parsing app settings toml")?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading app settings from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// `$APP_CONFIG_PATH` or `config/app.toml` (defaults when absent), then env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(ENV_APP_CONFIG_PATH) {
            Ok(p) => Self::load_from(Path::new(&p))?,
            Err(_) => {
                let p = Path::new(DEFAULT_APP_CONFIG_PATH);
                if p.exists() {
                    Self::load_from(p)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Env wins over the file. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_str("ADMIN_TOKEN") {
            self.admin_token = Some(v);
        }
        if let Some(v) = env_str("STORE_PATH") {
            self.store_path = match v.as_str() {
                ":memory:" => None,
                _ => Some(PathBuf::from(v)),
            };
        }
        if let Some(v) = env_parse("MAX_AGE_DAYS_DEFAULT") {
            self.max_age_days_default = v;
        }
        if let Some(v) = env_parse_bool("HN_ENABLE") {
            self.hn_enable = v;
        }
        if let Some(v) = env_str("HN_QUERY_TERMS") {
            self.hn_query_terms = split_terms(&v);
        }
        if let Some(v) = env_parse("HN_MIN_POINTS") {
            self.hn_min_points = v;
        }
        if let Some(v) = env_parse("SUMMARIZE_CONCURRENCY") {
            self.summarize_concurrency = v;
        }
        if let Some(v) = env_parse("REFRESH_INTERVAL_SECS") {
            self.refresh_interval_secs = v;
        }
        if let Some(v) = env_parse_bool("SCHEDULER_ENABLED") {
            self.scheduler_enabled = v;
        }
    }

    /// The request a scheduled cycle (or a bare `/refresh/stream`) runs with.
    pub fn default_request(&self) -> RefreshRequest {
        let mut filters = BTreeMap::new();
        filters.insert(
            SourceTag::HackerNews,
            SourceFilters {
                min_points: Some(self.hn_min_points),
                search_terms: self.hn_query_terms.clone(),
                domain_allow_list: Vec::new(),
            },
        );
        let sources = if self.hn_enable {
            Vec::new()
        } else {
            vec![SourceTag::Arxiv, SourceTag::Rss]
        };
        RefreshRequest {
            max_age_days: Some(self.max_age_days_default),
            limit: self.summarize_limit,
            concurrency: self.summarize_concurrency,
            sources,
            filters,
        }
    }
}

/// Comma-separated list; blanks dropped.
pub fn split_terms(s: &str) -> Vec<String> {
    s.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_str(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse::<T>().ok())
}

fn env_parse_bool(key: &str) -> Option<bool> {
    match env_str(key)?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let s = Settings::from_toml_str(
            r#"
admin_token = "s3cret"
hn_min_points = 25
hn_query_terms = ["agents"]
"#,
        )
        .unwrap();
        assert_eq!(s.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(s.hn_min_points, 25);
        assert_eq!(s.hn_query_terms, vec!["agents".to_string()]);
        assert_eq!(s.max_age_days_default, 7);
        assert_eq!(s.summarize_limit, 30);
        assert_eq!(s.arxiv_feeds, vec!["https://arxiv.org/rss/cs.AI".to_string()]);
    }

    #[test]
    fn default_request_carries_hn_filters() {
        let s = Settings::default();
        let req = s.default_request();
        assert_eq!(req.max_age_days, Some(7));
        assert_eq!(req.limit, 30);
        assert_eq!(req.concurrency, 1);
        assert!(req.sources.is_empty());
        let hn = req.filters_for(SourceTag::HackerNews);
        assert_eq!(hn.min_points, Some(10));
        assert_eq!(hn.search_terms.len(), 8);
    }

    #[test]
    fn hn_disabled_excludes_source() {
        let s = Settings {
            hn_enable: false,
            ..Default::default()
        };
        let req = s.default_request();
        assert!(!req.includes(SourceTag::HackerNews));
        assert!(req.includes(SourceTag::Arxiv));
    }

    #[test]
    fn split_terms_trims_and_drops_blanks() {
        assert_eq!(
            split_terms(" LLM, ,agents ,"),
            vec!["LLM".to_string(), "agents".to_string()]
        );
    }
}
