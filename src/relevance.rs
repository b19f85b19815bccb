// src/relevance.rs
//! Relevance gate: keyword stage plus an optional yes/no classifier for weak matches.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ingest::types::CandidateItem;
use crate::summarize::DynBackend;

// --- env defaults & names ---
pub const DEFAULT_RELEVANCE_CONFIG_PATH: &str = "config/relevance.toml";
pub const ENV_RELEVANCE_CONFIG_PATH: &str = "RELEVANCE_CONFIG_PATH";

pub const DEFAULT_WEAK_MAX_HITS: usize = 1;
pub const DEFAULT_CLASSIFIER_QUESTION: &str =
    "Is the following item closely related to AI algorithms, models or research? Answer yes or no.";

pub const DEFAULT_TERMS: [&str; 34] = [
    "ai",
    "ml",
    "dl",
    "llm",
    "transformer",
    "gpt",
    "bert",
    "diffusion",
    "rl",
    "neural",
    "embedding",
    "prompt",
    "finetune",
    "lora",
    "rag",
    "agent",
    "arxiv",
    "benchmark",
    "dataset",
    "pretrain",
    "foundation model",
    "self-supervised",
    "人工智能",
    "机器学习",
    "深度学习",
    "大模型",
    "神经网络",
    "扩散模型",
    "强化学习",
    "检索增强",
    "微调",
    "算法",
    "论文",
    "machine learning",
];

// Dev logging gate: NEWS_DEV_LOG=1 AND dev env (debug or SHUTTLE_ENV in {local,development,dev})
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var("NEWS_DEV_LOG").ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Anonymized dev log of one decision. Never logs raw text.
fn dev_log_decision(text: &str, decision: &Decision) {
    if !dev_logging_enabled() {
        return;
    }
    let id = anon_hash(text);
    let hits: Vec<&str> = decision.hits.iter().take(5).map(String::as_str).collect();
    info!(
        target: "relevance",
        %id,
        keep = decision.keep,
        reason = decision.reason.as_str(),
        hits = ?hits
    );
}

/* ----------------------------
Config
---------------------------- */

#[derive(Debug, Clone, Default, Deserialize)]
struct RelevanceFile {
    #[serde(default)]
    relevance: RelevanceSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RelevanceSection {
    #[serde(default)]
    terms: Option<Vec<String>>,
    #[serde(default)]
    weak_max_hits: Option<usize>,
    #[serde(default)]
    classifier_question: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceConfig {
    /// Lowercased, trimmed, unique.
    pub terms: Vec<String>,
    /// A match with at most this many distinct hits is weak and goes to the classifier.
    pub weak_max_hits: usize,
    pub classifier_enabled: bool,
    /// Keep weak matches when the classifier call fails.
    pub classifier_fail_open: bool,
    pub classify_timeout: Duration,
    pub classifier_question: String,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            terms: clean_terms(DEFAULT_TERMS.iter().map(|s| s.to_string())),
            weak_max_hits: DEFAULT_WEAK_MAX_HITS,
            classifier_enabled: true,
            classifier_fail_open: true,
            classify_timeout: Duration::from_secs(12),
            classifier_question: DEFAULT_CLASSIFIER_QUESTION.to_string(),
        }
    }
}

impl RelevanceConfig {
    /// Load from RELEVANCE_CONFIG_PATH or "config/relevance.toml"; defaults when the default path is absent.
    pub fn from_toml() -> anyhow::Result<Self> {
        let explicit = std::env::var(ENV_RELEVANCE_CONFIG_PATH).ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RELEVANCE_CONFIG_PATH));

        if explicit.is_none() && !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read relevance config at {}: {}",
                path.display(),
                e
            )
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from a TOML string; missing keys keep their defaults.
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let file: RelevanceFile = toml::from_str(toml_str)?;
        let mut cfg = Self::default();
        if let Some(terms) = file.relevance.terms {
            let terms = clean_terms(terms);
            if terms.is_empty() {
                anyhow::bail!("relevance config has an empty term list");
            }
            cfg.terms = terms;
        }
        if let Some(n) = file.relevance.weak_max_hits {
            cfg.weak_max_hits = n;
        }
        if let Some(q) = file.relevance.classifier_question.filter(|q| !q.trim().is_empty()) {
            cfg.classifier_question = q;
        }
        Ok(cfg)
    }

    /// Classifier switches live in the backend config.
    pub fn with_classifier(mut self, enabled: bool, fail_open: bool, timeout: Duration) -> Self {
        self.classifier_enabled = enabled;
        self.classifier_fail_open = fail_open;
        self.classify_timeout = timeout;
        self
    }
}

fn clean_terms(items: impl IntoIterator<Item = String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let set: BTreeSet<String> = items
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().collect()
}

/* ----------------------------
Decision
---------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    KeywordMiss,
    KeywordStrong,
    /// Weak match kept without asking (classifier off or no backend).
    KeywordWeak,
    ClassifierYes,
    ClassifierNo,
    ClassifierErrorFailOpen,
    ClassifierErrorFailClosed,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::KeywordMiss => "keyword_miss",
            DecisionReason::KeywordStrong => "keyword_strong",
            DecisionReason::KeywordWeak => "keyword_weak",
            DecisionReason::ClassifierYes => "classifier_yes",
            DecisionReason::ClassifierNo => "classifier_no",
            DecisionReason::ClassifierErrorFailOpen => "classifier_error_fail_open",
            DecisionReason::ClassifierErrorFailClosed => "classifier_error_fail_closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub keep: bool,
    pub reason: DecisionReason,
    /// Distinct terms found, sorted.
    pub hits: Vec<String>,
}

/* ----------------------------
Filter
---------------------------- */

/// Stateless apart from the optional classifier backend.
#[derive(Clone)]
pub struct RelevanceFilter {
    cfg: RelevanceConfig,
    backend: Option<DynBackend>,
}

impl RelevanceFilter {
    pub fn new(cfg: RelevanceConfig, backend: Option<DynBackend>) -> Self {
        Self { cfg, backend }
    }

    /// Keyword stage only.
    pub fn keywords_only(cfg: RelevanceConfig) -> Self {
        Self::new(cfg, None)
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.cfg
    }

    /// Distinct terms contained in `text`, case-insensitively.
    pub fn keyword_hits(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.cfg
            .terms
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .cloned()
            .collect()
    }

    pub async fn evaluate(&self, item: &CandidateItem) -> Decision {
        let text = item.text();
        let decision = self.evaluate_text(&text).await;
        counter!("relevance_decisions_total", "reason" => decision.reason.as_str()).increment(1);
        dev_log_decision(&text, &decision);
        decision
    }

    async fn evaluate_text(&self, text: &str) -> Decision {
        let hits = self.keyword_hits(text);
        if hits.is_empty() {
            return Decision {
                keep: false,
                reason: DecisionReason::KeywordMiss,
                hits,
            };
        }
        // A "no" could not reject a strong match, so don't ask.
        if hits.len() > self.cfg.weak_max_hits {
            return Decision {
                keep: true,
                reason: DecisionReason::KeywordStrong,
                hits,
            };
        }
        let backend = match (&self.backend, self.cfg.classifier_enabled) {
            (Some(b), true) => b,
            _ => {
                return Decision {
                    keep: true,
                    reason: DecisionReason::KeywordWeak,
                    hits,
                }
            }
        };

        let verdict = tokio::time::timeout(
            self.cfg.classify_timeout,
            backend.classify(text, &self.cfg.classifier_question),
        )
        .await;

        let (keep, reason) = match verdict {
            Ok(Ok(true)) => (true, DecisionReason::ClassifierYes),
            Ok(Ok(false)) => (false, DecisionReason::ClassifierNo),
            Ok(Err(e)) => {
                tracing::warn!(target: "relevance", error = %e, backend = backend.name(), "classifier call failed");
                self.on_classifier_error()
            }
            Err(_) => {
                tracing::warn!(
                    target: "relevance",
                    timeout_ms = self.cfg.classify_timeout.as_millis() as u64,
                    backend = backend.name(),
                    "classifier call timed out"
                );
                self.on_classifier_error()
            }
        };
        Decision { keep, reason, hits }
    }

    fn on_classifier_error(&self) -> (bool, DecisionReason) {
        if self.cfg.classifier_fail_open {
            (true, DecisionReason::ClassifierErrorFailOpen)
        } else {
            (false, DecisionReason::ClassifierErrorFailClosed)
        }
    }
}
