// src/ingest/config.rs
//! Blog feed list: `$FEEDS_PATH`, `config/feeds.toml`, `config/feeds.json`, or the built-in list.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const ENV_PATH: &str = "FEEDS_PATH";

pub const DEFAULT_NEWS_FEEDS: [&str; 12] = [
    "https://bair.berkeley.edu/blog/feed.xml",
    "https://feeds.feedburner.com/nvidiablog",
    "https://www.microsoft.com/en-us/research/feed/",
    "https://www.sciencedaily.com/rss/computers_math/artificial_intelligence.xml",
    "https://research.facebook.com/feed/",
    "https://openai.com/news/rss.xml",
    "https://deepmind.google/blog/feed/basic/",
    "https://news.mit.edu/rss/topic/artificial-intelligence2",
    "https://www.technologyreview.com/topic/artificial-intelligence/feed",
    "https://www.wired.com/feed/tag/ai/latest/rss",
    "https://raw.githubusercontent.com/Olshansk/rss-feeds/refs/heads/main/feeds/feed_ollama.xml",
    "https://raw.githubusercontent.com/Olshansk/rss-feeds/refs/heads/main/feeds/feed_anthropic.xml",
];

pub fn default_news_feeds() -> Vec<String> {
    DEFAULT_NEWS_FEEDS.iter().map(|s| s.to_string()).collect()
}

/// Load a feed list from an explicit path. Supports TOML or JSON formats.
pub fn load_feeds_from(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed list from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_feeds(&content, ext.as_str())
}

/// 1) $FEEDS_PATH  2) config/feeds.toml  3) config/feeds.json  4) built-in list
pub fn load_feeds_default() -> Result<Vec<String>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        }
        return Err(anyhow!("FEEDS_PATH points to non-existent path"));
    }
    for p in ["config/feeds.toml", "config/feeds.json"] {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_feeds_from(&pb);
        }
    }
    Ok(default_news_feeds())
}

fn parse_feeds(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("feeds");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported feed list format"))
}

fn parse_toml(s: &str) -> Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct TomlFeeds {
        feeds: Vec<String>,
    }
    let v: TomlFeeds = toml::from_str(s)?;
    clean_list(v.feeds)
}

fn parse_json(s: &str) -> Result<Vec<String>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    clean_list(v)
}

/// Trim, drop blanks and repeats (first occurrence wins), require http(s) URLs.
fn clean_list(items: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if t.is_empty() || out.iter().any(|o| o == t) {
            continue;
        }
        let url = reqwest::Url::parse(t).with_context(|| format!("invalid feed url {t:?}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("feed url must be http(s): {t}"));
        }
        out.push(t.to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn dedup_trim_and_formats_work() {
        let toml = r#"feeds = [" https://a.example/rss ", "", "https://b.example/feed", "https://b.example/feed"]"#;
        let json = r#"["https://c.example/atom.xml", "  https://a.example/rss  ", ""]"#;
        assert_eq!(
            parse_toml(toml).unwrap(),
            vec!["https://a.example/rss".to_string(), "https://b.example/feed".to_string()]
        );
        assert_eq!(
            parse_json(json).unwrap(),
            vec!["https://c.example/atom.xml".to_string(), "https://a.example/rss".to_string()]
        );
    }

    #[test]
    fn non_http_urls_are_rejected() {
        assert!(parse_json(r#"["ftp://a.example/rss"]"#).is_err());
        assert!(parse_json(r#"["not a url"]"#).is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        // isolate CWD so the repo's config/ does not interfere
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_PATH);

        let v = load_feeds_default().unwrap();
        assert_eq!(v.len(), DEFAULT_NEWS_FEEDS.len());

        fs::create_dir_all("config").unwrap();
        fs::write("config/feeds.toml", r#"feeds = ["https://only.example/rss"]"#).unwrap();
        assert_eq!(
            load_feeds_default().unwrap(),
            vec!["https://only.example/rss".to_string()]
        );

        // env wins
        let p_json = tmp.path().join("feeds.json");
        fs::write(&p_json, r#"["https://env.example/rss"]"#).unwrap();
        env::set_var(ENV_PATH, p_json.display().to_string());
        assert_eq!(
            load_feeds_default().unwrap(),
            vec!["https://env.example/rss".to_string()]
        );

        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_feeds_default().is_err());
        env::remove_var(ENV_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
