// src/error.rs
//! Error taxonomy for one refresh cycle.
//!
//! Per-item errors are absorbed by the orchestrator and surfaced as progress
//! events. `CycleAborted` ends a cycle early, and so does `DegradedMode` when the
//! extractive fallback is off.

use std::time::Duration;

use thiserror::Error;

use crate::ingest::types::{IdentityKey, SourceTag};

/// Failure of a single summarization or classification call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend http error: {0}")]
    Http(String),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("malformed backend response: {0}")]
    Malformed(String),
    #[error("backend disabled")]
    Disabled,
    #[error("daily backend call limit of {0} reached")]
    RateLimited(u32),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured duration
            BackendError::Timeout(Duration::ZERO)
        } else if let Some(status) = e.status() {
            BackendError::Status(status.as_u16())
        } else if e.is_decode() {
            BackendError::Malformed(e.to_string())
        } else {
            BackendError::Http(e.to_string())
        }
    }
}

/// Failure of a store lookup or write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Everything that can go wrong inside a cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("source {tag} unavailable: {reason}")]
    SourceUnavailable { tag: SourceTag, reason: String },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),
    #[error("failed to persist {key}: {error}")]
    StoreWriteFailed { key: IdentityKey, error: StoreError },
    #[error("backend degraded after {consecutive_failures} consecutive failures")]
    DegradedMode { consecutive_failures: u32 },
    #[error("cycle aborted by caller")]
    CycleAborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_part() {
        let e = CycleError::SourceUnavailable {
            tag: SourceTag::HackerNews,
            reason: "connection refused".into(),
        };
        assert_eq!(
            e.to_string(),
            "source hacker_news unavailable: connection refused"
        );

        let e: CycleError = BackendError::RateLimited(20).into();
        assert!(e.to_string().contains("daily backend call limit of 20"));

        let e = CycleError::StoreWriteFailed {
            key: IdentityKey::new(SourceTag::Arxiv, "2410.00001"),
            error: StoreError::Unavailable("disk full".into()),
        };
        assert_eq!(
            e.to_string(),
            "failed to persist arxiv:2410.00001: store unavailable: disk full"
        );
    }
}
