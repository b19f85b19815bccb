// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";
pub const ENV_AI_CONFIG_PATH: &str = "AI_CONFIG_PATH";

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434/v1";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Which summarization backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    #[serde(alias = "open_ai")]
    OpenAi,
    Mock,
    Disabled,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAi => "openai",
            BackendKind::Mock => "mock",
            BackendKind::Disabled => "disabled",
        }
    }
}

fn default_summarize_timeout_secs() -> u64 {
    15
}
fn default_classify_timeout_secs() -> u64 {
    12
}
fn default_temperature() -> f32 {
    0.2
}
fn default_summary_max_tokens() -> u32 {
    200
}
fn default_true() -> bool {
    true
}
fn default_degraded_after() -> u32 {
    5
}

/// Backend configuration loaded from `config/ai.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub provider: BackendKind,
    /// OpenAI-compatible base URL; provider default when absent.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read OPENAI_API_KEY (openai) or OLLAMA_API_KEY (ollama).
    #[serde(default)]
    pub api_key: String,
    /// Real backend calls per day; cache hits are free. `None` = unlimited.
    #[serde(default)]
    pub daily_limit: Option<u32>,
    /// Response cache directory. `None` disables the file cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_summarize_timeout_secs")]
    pub summarize_timeout_secs: u64,
    #[serde(default = "default_classify_timeout_secs")]
    pub classify_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    /// Ask the backend to confirm weak keyword matches.
    #[serde(default = "default_true")]
    pub classifier_enabled: bool,
    /// Keep weak matches when the classifier call fails.
    #[serde(default = "default_true")]
    pub classifier_fail_open: bool,
    /// Use the extractive summary when the backend fails.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    /// Consecutive backend failures before the cycle stops early. 0 disables.
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: BackendKind::default(),
            base_url: None,
            model: None,
            api_key: String::new(),
            daily_limit: None,
            cache_dir: None,
            summarize_timeout_secs: default_summarize_timeout_secs(),
            classify_timeout_secs: default_classify_timeout_secs(),
            temperature: default_temperature(),
            summary_max_tokens: default_summary_max_tokens(),
            classifier_enabled: true,
            classifier_fail_open: true,
            fallback_enabled: true,
            degraded_after: default_degraded_after(),
        }
    }
}

impl BackendConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: BackendConfig = serde_json::from_str(data)?;

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider {
                BackendKind::OpenAi => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                BackendKind::Ollama => env::var("OLLAMA_API_KEY").unwrap_or_default(),
                BackendKind::Mock | BackendKind::Disabled => String::new(),
            };
        }

        if !(0.0..=2.0).contains(&cfg.temperature) {
            cfg.temperature = default_temperature();
        }
        if cfg.summarize_timeout_secs == 0 {
            cfg.summarize_timeout_secs = default_summarize_timeout_secs();
        }
        if cfg.classify_timeout_secs == 0 {
            cfg.classify_timeout_secs = default_classify_timeout_secs();
        }

        Ok(cfg)
    }

    /// `$AI_CONFIG_PATH`, then `config/ai.json`, then defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_AI_CONFIG_PATH) {
            return Self::load_from_file(&p)
                .map_err(|e| anyhow::anyhow!("Failed to load backend config at {p}: {e}"));
        }
        let p = Path::new(DEFAULT_AI_CONFIG_PATH);
        if p.exists() {
            return Self::load_from_file(p);
        }
        Ok(Self::default())
    }

    pub fn effective_base_url(&self) -> String {
        let base = self.base_url.as_deref().unwrap_or(match self.provider {
            BackendKind::OpenAi => DEFAULT_OPENAI_BASE_URL,
            _ => DEFAULT_OLLAMA_BASE_URL,
        });
        base.trim_end_matches('/').to_string()
    }

    pub fn effective_model(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.provider {
                BackendKind::OpenAi => DEFAULT_OPENAI_MODEL,
                _ => DEFAULT_OLLAMA_MODEL,
            }
            .to_string()
        })
    }

    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }
}
