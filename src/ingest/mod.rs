// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod types;

use crate::ingest::types::{CandidateItem, RefreshRequest};
use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// Max chars kept from a normalized body.
pub const BODY_CHAR_CAP: usize = 4000;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_cycles_total", "Refresh cycles started.");
        describe_counter!(
            "ingest_items_fetched_total",
            "Candidate items returned by source fetchers."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetch/parse errors."
        );
        describe_counter!(
            "ingest_dedup_known_total",
            "Candidates dropped because their identity key was already stored."
        );
        describe_counter!(
            "ingest_filtered_total",
            "Candidates dropped by age/points/domain filters or the relevance filter."
        );
        describe_counter!(
            "summarize_backend_errors_total",
            "Failed summarization backend calls."
        );
        describe_counter!(
            "summarize_fallback_total",
            "Summaries produced by the extractive fallback."
        );
        describe_counter!(
            "summarize_rate_limited_total",
            "Backend calls refused by the daily call limit."
        );
        describe_counter!(
            "ingest_items_parsed_total",
            "Entries parsed from feeds and search pages."
        );
        describe_counter!("ingest_feed_errors_total", "Single feed or search request failures.");
        describe_counter!(
            "relevance_decisions_total",
            "Relevance decisions, labelled by reason."
        );
        describe_counter!(
            "progress_observers_dropped_total",
            "Progress observers detached because they fell behind."
        );
        describe_counter!("ingest_scheduled_runs_total", "Cycles run by the scheduler.");
        describe_histogram!("summarize_call_ms", "Summarization call time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_last_cycle_ts",
            "Unix ts when the last refresh cycle finished."
        );
    });
}

/// Normalize feed text: decode entities, strip tags, fold quotes and whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap
    if out.chars().count() > BODY_CHAR_CAP {
        out = out.chars().take(BODY_CHAR_CAP).collect();
    }

    out
}

/// Case-insensitive suffix match on the domain, so "openai.com" admits "blog.openai.com".
pub fn is_domain_allowed(domain: Option<&str>, allow_list: &[String]) -> bool {
    if allow_list.is_empty() {
        return true;
    }
    let Some(domain) = domain else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    allow_list.iter().any(|a| {
        let a = a.trim().trim_start_matches("www.").to_ascii_lowercase();
        !a.is_empty() && (domain == a || domain.ends_with(&format!(".{a}")))
    })
}

/// Apply the request's age cutoff and per-source points/domain filters.
/// Returns (kept, dropped_count). Undated items count as too old when a cutoff is set.
pub fn apply_request_filters(
    now: DateTime<Utc>,
    items: Vec<CandidateItem>,
    request: &RefreshRequest,
) -> (Vec<CandidateItem>, usize) {
    let cutoff = request.cutoff(now);
    let mut dropped = 0usize;
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        let filters = request.filters_for(item.source);

        let fresh = match (cutoff, item.published_at) {
            (None, _) => true,
            (Some(c), Some(at)) => at >= c,
            (Some(_), None) => false,
        };
        let enough_points = match (filters.min_points, item.points) {
            (Some(min), Some(p)) => p >= min,
            _ => true,
        };
        let allowed = is_domain_allowed(item.domain.as_deref(), &filters.domain_allow_list);

        if fresh && enough_points && allowed {
            kept.push(item);
        } else {
            dropped += 1;
        }
    }

    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{SourceFilters, SourceTag};

    #[test]
    fn normalize_text_collapses_ws_and_keeps_sentences() {
        let s = "  Hello,&nbsp;&nbsp; world.  Second<br/>line!  ";
        let out = normalize_text(s);
        assert_eq!(out, "Hello, world. Second line!");
    }

    #[test]
    fn domain_allow_list_matches_subdomains() {
        let wl = vec!["openai.com".to_string(), "www.deepmind.google".into()];
        assert!(is_domain_allowed(Some("openai.com"), &wl));
        assert!(is_domain_allowed(Some("blog.OpenAI.com"), &wl));
        assert!(is_domain_allowed(Some("deepmind.google"), &wl));
        assert!(!is_domain_allowed(Some("notopenai.com"), &wl));
        assert!(!is_domain_allowed(None, &wl));
        assert!(is_domain_allowed(None, &[]));
    }

    #[test]
    fn request_filters_drop_stale_undated_and_low_points() {
        let now = Utc::now();
        let mut req = RefreshRequest {
            max_age_days: Some(7),
            ..Default::default()
        };
        req.filters.insert(
            SourceTag::HackerNews,
            SourceFilters {
                min_points: Some(10),
                ..Default::default()
            },
        );

        let fresh = CandidateItem::new(SourceTag::Rss, "a", "fresh")
            .with_published_at(now - chrono::Duration::days(1));
        let stale = CandidateItem::new(SourceTag::Rss, "b", "stale")
            .with_published_at(now - chrono::Duration::days(30));
        let undated = CandidateItem::new(SourceTag::Rss, "c", "undated");
        let mut low = CandidateItem::new(SourceTag::HackerNews, "d", "low")
            .with_published_at(now);
        low.points = Some(3);
        let mut high = low.clone();
        high.external_id = "e".into();
        high.points = Some(50);

        let (kept, dropped) =
            apply_request_filters(now, vec![fresh, stale, undated, low, high], &req);
        let ids: Vec<_> = kept.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e"]);
        assert_eq!(dropped, 3);
    }
}
