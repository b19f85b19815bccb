// src/summarize/pool.rs
//! Bounded-concurrency summarization with extractive fallback.
//!
//! Outcomes are yielded in completion order. At most `concurrency` backend calls
//! are in flight; no new item starts once the cancellation token fires.
//! Once degraded mode is signalled with the fallback on, items that have not
//! started yet skip the backend and go straight to the extractive summary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;

use super::extractive::{summarize_extractive, EXTRACTIVE_NAME};
use super::DynBackend;
use crate::error::BackendError;
use crate::ingest::types::CandidateItem;

#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Calls in flight; values <= 1 run sequentially.
    pub concurrency: usize,
    pub call_timeout: Duration,
    pub fallback_enabled: bool,
    /// Consecutive backend failures that signal degraded mode. 0 disables.
    /// `BackendError::Disabled` never counts.
    pub degraded_after: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            call_timeout: Duration::from_secs(15),
            fallback_enabled: true,
            degraded_after: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryOrigin {
    Backend,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    pub origin: SummaryOrigin,
    /// Backend name, or "extractive".
    pub by: String,
    /// The backend failure a fallback summary replaced.
    pub backend_error: Option<BackendError>,
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub item: CandidateItem,
    pub result: Result<Summary, BackendError>,
    pub elapsed: Duration,
}

impl SummaryOutcome {
    /// The backend failure behind this outcome, even if a fallback covered it.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match &self.result {
            Ok(s) => s.backend_error.as_ref(),
            Err(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PoolEvent {
    Finished(SummaryOutcome),
    /// Emitted once, right after the outcome that tripped the threshold.
    Degraded { consecutive_failures: u32 },
}

pub struct SummarizerPool {
    backend: DynBackend,
    opts: PoolOptions,
}

impl SummarizerPool {
    pub fn new(backend: DynBackend, opts: PoolOptions) -> Self {
        Self { backend, opts }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.opts
    }

    /// Lazy stream of outcomes in completion order.
    pub fn summarize_all(
        &self,
        items: Vec<CandidateItem>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, PoolEvent> {
        let backend = self.backend.clone();
        let opts = self.opts.clone();
        let width = opts.concurrency.max(1);
        let degraded_after = opts.degraded_after;

        let fallback_enabled = opts.fallback_enabled;
        let bypass = Arc::new(AtomicBool::new(false));
        let bypass_on_trip = bypass.clone();

        let mut consecutive = 0u32;
        let mut signalled = false;

        stream::iter(items)
            .take_while(move |_| futures::future::ready(!cancel.is_cancelled()))
            .map(move |item| summarize_one(backend.clone(), opts.clone(), bypass.clone(), item))
            .buffer_unordered(width)
            .flat_map(move |outcome| {
                match outcome.backend_error() {
                    // A disabled backend is configuration, not an outage.
                    Some(BackendError::Disabled) => {}
                    Some(_) => consecutive = consecutive.saturating_add(1),
                    None => consecutive = 0,
                }
                let trip = degraded_after > 0 && !signalled && consecutive >= degraded_after;

                let mut out = vec![PoolEvent::Finished(outcome)];
                if trip {
                    signalled = true;
                    if fallback_enabled {
                        bypass_on_trip.store(true, Ordering::SeqCst);
                    }
                    tracing::warn!(
                        target: "summarize",
                        consecutive_failures = consecutive,
                        extractive_only = fallback_enabled,
                        "backend degraded"
                    );
                    out.push(PoolEvent::Degraded {
                        consecutive_failures: consecutive,
                    });
                }
                stream::iter(out)
            })
            .boxed()
    }
}

async fn summarize_one(
    backend: DynBackend,
    opts: PoolOptions,
    bypass: Arc<AtomicBool>,
    item: CandidateItem,
) -> SummaryOutcome {
    let t0 = Instant::now();

    if bypass.load(Ordering::SeqCst) {
        if let Some(text) = summarize_extractive(&item.title, &item.body) {
            counter!("summarize_fallback_total").increment(1);
            return SummaryOutcome {
                item,
                result: Ok(Summary {
                    text,
                    origin: SummaryOrigin::Fallback,
                    by: EXTRACTIVE_NAME.to_string(),
                    backend_error: None,
                }),
                elapsed: t0.elapsed(),
            };
        }
    }

    let text = item.text();

    let called = match tokio::time::timeout(opts.call_timeout, backend.summarize(&text)).await {
        Ok(Ok(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Ok(Ok(_)) => Err(BackendError::Malformed("empty summary".into())),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BackendError::Timeout(opts.call_timeout)),
    };
    let elapsed = t0.elapsed();
    histogram!("summarize_call_ms").record(elapsed.as_secs_f64() * 1_000.0);

    let result = match called {
        Ok(text) => Ok(Summary {
            text,
            origin: SummaryOrigin::Backend,
            by: backend.name().to_string(),
            backend_error: None,
        }),
        Err(e) => {
            counter!("summarize_backend_errors_total").increment(1);
            tracing::warn!(
                target: "summarize",
                error = %e,
                backend = backend.name(),
                item = %item.identity_key(),
                "backend summarize failed"
            );
            let fallback = if opts.fallback_enabled {
                summarize_extractive(&item.title, &item.body)
            } else {
                None
            };
            match fallback {
                Some(text) => {
                    counter!("summarize_fallback_total").increment(1);
                    Ok(Summary {
                        text,
                        origin: SummaryOrigin::Fallback,
                        by: EXTRACTIVE_NAME.to_string(),
                        backend_error: Some(e),
                    })
                }
                None => Err(e),
            }
        }
    };

    SummaryOutcome {
        item,
        result,
        elapsed,
    }
}
