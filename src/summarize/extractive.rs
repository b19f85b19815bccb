// src/summarize/extractive.rs
//! Local fallback: the first two sentences of the description.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Name recorded in `summarized_by` for fallback summaries.
pub const EXTRACTIVE_NAME: &str = "extractive";

pub const SUMMARY_CHAR_CAP: usize = 180;
pub const TITLE_CHAR_CAP: usize = 120;

fn clean(text: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    static RE_URL: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    let re_url = RE_URL.get_or_init(|| Regex::new(r"https?://\S+").unwrap());
    let out = re_ws.replace_all(text, " ");
    let out = re_url.replace_all(out.trim(), "");
    out.trim().to_string()
}

/// Split after runs of sentence punctuation (ASCII or CJK) followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    static RE_END: OnceCell<Regex> = OnceCell::new();
    let re_end = RE_END.get_or_init(|| Regex::new(r"([。！？.!?]+)\s+").unwrap());

    let mut out = Vec::new();
    let mut start = 0;
    for caps in re_end.captures_iter(text) {
        let (Some(all), Some(punct)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push(&text[start..punct.end()]);
        start = all.end();
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// `None` only when both title and body are empty.
pub fn summarize_extractive(title: &str, body: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() && body.trim().is_empty() {
        return None;
    }
    let desc = clean(body);
    if desc.is_empty() {
        return Some(take_chars(title, TITLE_CHAR_CAP));
    }
    let out = split_sentences(&desc)
        .into_iter()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ");
    let out = out.trim();
    if !out.is_empty() {
        Some(take_chars(out, SUMMARY_CHAR_CAP))
    } else if !title.is_empty() {
        Some(take_chars(title, TITLE_CHAR_CAP))
    } else {
        None
    }
}
