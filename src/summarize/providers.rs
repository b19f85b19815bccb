// src/summarize/providers.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::SummarizationBackend;
use crate::config::ai::{BackendConfig, BackendKind};
use crate::error::BackendError;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a technology news editor. Summarize the item in \
2-3 short sentences focused on new models, methods, data and metrics. Output only the summary.";
const CLASSIFY_SYSTEM_PROMPT: &str = "Answer strictly yes or no.";

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: String,
}

/// `/chat/completions` client; serves both Ollama and OpenAI.
pub struct OpenAiCompatBackend {
    http: reqwest::Client,
    name: &'static str,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    summary_max_tokens: u32,
    summarize_timeout: Duration,
    classify_timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("ai-news-agent/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        let name = match cfg.provider {
            BackendKind::OpenAi => "openai",
            _ => "ollama",
        };
        Ok(Self {
            http,
            name,
            base_url: cfg.effective_base_url(),
            api_key: cfg.api_key.clone(),
            model: cfg.effective_model(),
            temperature: cfg.temperature,
            summary_max_tokens: cfg.summary_max_tokens,
            summarize_timeout: cfg.summarize_timeout(),
            classify_timeout: cfg.classify_timeout(),
        })
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        let req = ChatReq {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let mut rb = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(timeout)
            .json(&req);
        if !self.api_key.is_empty() {
            rb = rb.bearer_auth(&self.api_key);
        }

        let resp = rb.send().await.map_err(|e| match BackendError::from(e) {
            BackendError::Timeout(_) => BackendError::Timeout(timeout),
            other => other,
        })?;
        if !resp.status().is_success() {
            return Err(BackendError::Status(resp.status().as_u16()));
        }
        let body: ChatResp = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(BackendError::Malformed("empty completion".into()));
        }
        Ok(content)
    }
}

/// "yes"/"no" with anything after it; other replies are malformed.
pub fn parse_yes_no(reply: &str) -> Result<bool, BackendError> {
    let r = reply
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if r.starts_with('y') {
        Ok(true)
    } else if r.starts_with('n') {
        Ok(false)
    } else {
        Err(BackendError::Malformed(format!("not a yes/no answer: {reply:?}")))
    }
}

#[async_trait]
impl SummarizationBackend for OpenAiCompatBackend {
    async fn summarize(&self, text: &str) -> Result<String, BackendError> {
        self.chat(
            SUMMARY_SYSTEM_PROMPT,
            text,
            self.temperature,
            self.summary_max_tokens,
            self.summarize_timeout,
        )
        .await
    }

    async fn classify(&self, text: &str, question: &str) -> Result<bool, BackendError> {
        let prompt = format!("{question}\n\n{text}");
        let reply = self
            .chat(CLASSIFY_SYSTEM_PROMPT, &prompt, 0.1, 4, self.classify_timeout)
            .await?;
        parse_yes_no(&reply)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Every call fails with `Disabled`; the pool falls back to extractive summaries.
pub struct DisabledBackend;

#[async_trait]
impl SummarizationBackend for DisabledBackend {
    async fn summarize(&self, _text: &str) -> Result<String, BackendError> {
        Err(BackendError::Disabled)
    }

    async fn classify(&self, _text: &str, _question: &str) -> Result<bool, BackendError> {
        Err(BackendError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic backend for local runs and tests.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub classify_answer: bool,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            classify_answer: true,
        }
    }
}

#[async_trait]
impl SummarizationBackend for MockBackend {
    async fn summarize(&self, text: &str) -> Result<String, BackendError> {
        let first_line: String = text.lines().next().unwrap_or_default().chars().take(100).collect();
        Ok(format!("[mock] {}", first_line.trim()))
    }

    async fn classify(&self, _text: &str, _question: &str) -> Result<bool, BackendError> {
        Ok(self.classify_answer)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
