// tests/ingest_config.rs
use std::{env, fs};

use ai_news_agent::config::{BackendConfig, BackendKind, Settings};
use ai_news_agent::ingest::config::{load_feeds_default, load_feeds_from};
use ai_news_agent::ingest::types::SourceTag;
use ai_news_agent::relevance::RelevanceConfig;
use ai_news_agent::build_context;

const ENV_KEYS: [&str; 9] = [
    "APP_CONFIG_PATH",
    "AI_CONFIG_PATH",
    "RELEVANCE_CONFIG_PATH",
    "FEEDS_PATH",
    "AI_TEST_MODE",
    "STORE_PATH",
    "HN_ENABLE",
    "HN_QUERY_TERMS",
    "SUMMARIZE_CONCURRENCY",
];

fn clear_env() {
    for k in ENV_KEYS {
        env::remove_var(k);
    }
}

#[test]
fn feed_lists_in_toml_and_json() {
    let dir = tempfile::tempdir().unwrap();

    let p_toml = dir.path().join("feeds.toml");
    fs::write(
        &p_toml,
        r#"feeds = [" https://a.example/rss ", "", "https://a.example/rss"]"#,
    )
    .unwrap();
    assert_eq!(
        load_feeds_from(&p_toml).unwrap(),
        vec!["https://a.example/rss".to_string()]
    );

    let p_json = dir.path().join("feeds.json");
    fs::write(&p_json, r#"["https://b.example/atom.xml"]"#).unwrap();
    assert_eq!(
        load_feeds_from(&p_json).unwrap(),
        vec!["https://b.example/atom.xml".to_string()]
    );

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, r#"feeds = ["ftp://c.example/feed"]"#).unwrap();
    assert!(load_feeds_from(&bad).is_err());
}

#[serial_test::serial]
#[test]
fn env_paths_and_overrides_win_over_files() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();

    let app = dir.path().join("app.toml");
    fs::write(
        &app,
        r#"
summarize_limit = 12
summarize_concurrency = 2
hn_min_points = 25
scheduler_enabled = true
"#,
    )
    .unwrap();
    let ai = dir.path().join("ai.json");
    fs::write(&ai, r#"{"provider":"mock","degraded_after":3}"#).unwrap();
    let rel = dir.path().join("relevance.toml");
    fs::write(&rel, "[relevance]\nterms = [\"LLM\", \"agent\"]\nweak_max_hits = 0\n").unwrap();
    let feeds = dir.path().join("feeds.json");
    fs::write(&feeds, r#"["https://c.example/feed"]"#).unwrap();

    env::set_var("APP_CONFIG_PATH", &app);
    env::set_var("AI_CONFIG_PATH", &ai);
    env::set_var("RELEVANCE_CONFIG_PATH", &rel);
    env::set_var("FEEDS_PATH", &feeds);
    env::set_var("SUMMARIZE_CONCURRENCY", "4");
    env::set_var("HN_ENABLE", "false");
    env::set_var("HN_QUERY_TERMS", "rag, agents");

    let s = Settings::load().unwrap();
    assert_eq!(s.summarize_limit, 12);
    assert_eq!(s.summarize_concurrency, 4);
    assert_eq!(s.hn_min_points, 25);
    assert!(!s.hn_enable);
    assert_eq!(s.hn_query_terms, vec!["rag", "agents"]);
    assert!(s.scheduler_enabled);
    let req = s.default_request();
    assert_eq!(req.sources, vec![SourceTag::Arxiv, SourceTag::Rss]);
    assert_eq!(req.concurrency, 4);

    let b = BackendConfig::load_default().unwrap();
    assert_eq!(b.provider, BackendKind::Mock);
    assert_eq!(b.degraded_after, 3);

    let r = RelevanceConfig::from_toml().unwrap();
    assert_eq!(r.terms, vec!["agent", "llm"]);
    assert_eq!(r.weak_max_hits, 0);

    assert_eq!(load_feeds_default().unwrap(), vec!["https://c.example/feed"]);

    clear_env();
}

#[serial_test::serial]
#[tokio::test]
async fn context_wires_a_file_store_and_the_mock_backend() {
    clear_env();
    env::set_var("AI_TEST_MODE", "mock");
    let dir = tempfile::tempdir().unwrap();
    env::set_var("STORE_PATH", dir.path().join("data/items.json"));

    let settings = Settings::load().unwrap();
    let ctx = build_context(
        &settings,
        &BackendConfig::default(),
        RelevanceConfig::default(),
        vec!["https://c.example/feed".into()],
    )
    .await
    .unwrap();

    assert_eq!(ctx.backend.name(), "mock");
    assert_eq!(ctx.store.reader().name(), "file");
    let tags: Vec<_> = ctx.fetchers.iter().map(|f| f.tag()).collect();
    assert_eq!(tags, vec![SourceTag::Arxiv, SourceTag::HackerNews, SourceTag::Rss]);
    assert!(dir.path().join("data").is_dir());

    clear_env();
}
