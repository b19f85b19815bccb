// src/orchestrator.rs
//! One ingestion cycle: fetch → filter → dedup → relevance → summarize → persist.
//!
//! The coordinating task is the only store writer. Every completion is
//! persisted before its progress event goes out, and exactly one terminal
//! event (`completed` or `failed`) ends the stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, Settings};
use crate::dedup::filter_new;
use crate::error::CycleError;
use crate::ingest::apply_request_filters;
use crate::ingest::types::{
    CandidateItem, FetchParams, IdentityKey, RefreshRequest, SourceFetcher, SourceTag,
};
use crate::progress::{self, CycleStatus, ProgressEmitter, ProgressEvent, ProgressStream};
use crate::relevance::RelevanceFilter;
use crate::store::{RelevanceRecord, SharedStore, Store, StoreLease, StoredItem};
use crate::summarize::{
    DynBackend, PoolEvent, PoolOptions, SummarizerPool, SummaryOrigin, SummaryOutcome,
};

#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub call_timeout: Duration,
    pub fetch_timeout: Duration,
    pub fallback_enabled: bool,
    pub degraded_after: u32,
    pub progress_buffer: usize,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(20),
            fallback_enabled: true,
            degraded_after: 5,
            progress_buffer: 64,
        }
    }
}

impl CycleOptions {
    pub fn from_config(settings: &Settings, backend: &BackendConfig) -> Self {
        Self {
            call_timeout: backend.summarize_timeout(),
            fetch_timeout: Duration::from_secs(settings.fetch_timeout_secs.max(1)),
            fallback_enabled: backend.fallback_enabled,
            degraded_after: backend.degraded_after,
            progress_buffer: settings.progress_buffer,
        }
    }
}

/// Everything a cycle needs; shared by the API and the scheduler.
pub struct CycleContext {
    pub fetchers: Vec<Arc<dyn SourceFetcher>>,
    pub store: SharedStore,
    pub backend: DynBackend,
    pub relevance: RelevanceFilter,
    pub options: CycleOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Fetching,
    Filtering,
    Summarizing,
    Draining,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub phase: CyclePhase,
    pub status: Option<CycleStatus>,
    /// Reason of a FAILED cycle.
    pub failure: Option<String>,
    pub fetched: usize,
    /// Dropped by age/points/domain filters.
    pub stale: usize,
    /// Already stored, or repeated within the batch.
    pub known: usize,
    pub rejected: usize,
    pub accepted: usize,
    pub summarized: usize,
    /// Subset of `summarized` produced by the extractive fallback.
    pub fallback: usize,
    pub failed: usize,
    /// Left pending for a later cycle.
    pub deferred: usize,
    pub source_errors: Vec<(SourceTag, String)>,
    pub lookup_errors: usize,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn skipped(&self) -> usize {
        self.stale + self.known + self.rejected
    }
}

/// A running cycle: its progress stream, final report and cancel switch.
pub struct CycleHandle {
    pub events: ProgressStream,
    pub report: JoinHandle<CycleReport>,
    pub cancel: CancellationToken,
}

/// Spawn a cycle; waits for the store lease if another cycle holds it.
pub fn run_cycle(
    ctx: Arc<CycleContext>,
    request: RefreshRequest,
    cancel: CancellationToken,
) -> CycleHandle {
    let (mut emitter, events) = progress::channel(ctx.options.progress_buffer);
    let token = cancel.clone();
    let report = tokio::spawn(async move {
        let lease = ctx.store.lease().await;
        execute(&ctx, lease, &request, &mut emitter, &token).await
    });
    CycleHandle {
        events,
        report,
        cancel,
    }
}

/// Spawn a cycle only if the store is free.
pub fn try_run_cycle(
    ctx: Arc<CycleContext>,
    request: RefreshRequest,
    cancel: CancellationToken,
) -> Option<CycleHandle> {
    let lease = ctx.store.try_lease()?;
    let (mut emitter, events) = progress::channel(ctx.options.progress_buffer);
    let token = cancel.clone();
    let report = tokio::spawn(async move {
        execute(&ctx, lease, &request, &mut emitter, &token).await
    });
    Some(CycleHandle {
        events,
        report,
        cancel,
    })
}

/// Run a cycle on the current task.
pub async fn run(
    ctx: &CycleContext,
    request: &RefreshRequest,
    emitter: &mut ProgressEmitter,
    cancel: &CancellationToken,
) -> CycleReport {
    let lease = ctx.store.lease().await;
    execute(ctx, lease, request, emitter, cancel).await
}

async fn execute(
    ctx: &CycleContext,
    lease: StoreLease,
    request: &RefreshRequest,
    emitter: &mut ProgressEmitter,
    cancel: &CancellationToken,
) -> CycleReport {
    let t0 = Instant::now();
    counter!("ingest_cycles_total").increment(1);
    let mut report = CycleReport::default();

    let selected: Vec<Arc<dyn SourceFetcher>> = ctx
        .fetchers
        .iter()
        .filter(|f| request.includes(f.tag()))
        .cloned()
        .collect();
    emitter.emit(ProgressEvent::Started {
        total: selected.len(),
    });
    tracing::info!(
        target: "ingest",
        sources = selected.len(),
        limit = request.limit,
        concurrency = request.concurrency,
        "cycle started"
    );

    if selected.is_empty() {
        return fail(report, emitter, t0, "no sources selected".into());
    }

    // FETCHING
    report.phase = CyclePhase::Fetching;
    let now = Utc::now();
    let Some(candidates) = fetch_all(ctx, &selected, request, now, emitter, &mut report, cancel).await
    else {
        return finish(report, emitter, t0, CycleStatus::Cancelled);
    };
    if report.source_errors.len() == selected.len() {
        let reason = format!("all {} sources unavailable", selected.len());
        return fail(report, emitter, t0, reason);
    }

    // FILTERING
    report.phase = CyclePhase::Filtering;
    report.fetched = candidates.len();
    let store = lease.store();

    let (in_window, stale) = apply_request_filters(now, candidates, request);
    report.stale = stale;

    let dedup = filter_new(in_window, store).await;
    report.known = dedup.known + dedup.in_batch_duplicates;
    report.lookup_errors = dedup.lookup_errors.len();
    emitter.emit(ProgressEvent::Deduplicated {
        fresh: dedup.fresh.len(),
        known: report.known,
    });

    let mut accepted: Vec<(CandidateItem, RelevanceRecord)> = Vec::new();
    for item in dedup.fresh {
        if cancel.is_cancelled() {
            break;
        }
        let decision = ctx.relevance.evaluate(&item).await;
        if decision.keep {
            accepted.push((
                item,
                RelevanceRecord {
                    keep: true,
                    reason: decision.reason.as_str().to_string(),
                },
            ));
        } else {
            report.rejected += 1;
        }
    }
    counter!("ingest_filtered_total").increment((report.stale + report.rejected) as u64);
    emitter.emit(ProgressEvent::Filtered {
        kept: accepted.len(),
        dropped: report.stale + report.rejected,
    });
    if cancel.is_cancelled() {
        return finish(report, emitter, t0, CycleStatus::Cancelled);
    }

    // SUMMARIZING: persist as pending first, so nothing accepted is lost.
    report.phase = CyclePhase::Summarizing;
    let mut rows: HashMap<IdentityKey, StoredItem> = HashMap::new();
    let mut work: Vec<CandidateItem> = Vec::new();
    for (item, relevance) in accepted {
        let row = StoredItem::pending(&item, relevance, now);
        let key = row.identity_key();
        match store.upsert(row.clone()).await {
            Ok(()) => {
                report.accepted += 1;
                rows.insert(key, row);
                work.push(item);
            }
            Err(error) => {
                let err = CycleError::StoreWriteFailed { key, error };
                tracing::warn!(target: "ingest", error = %err, "persist failed");
                report.failed += 1;
                emitter.emit(ProgressEvent::ItemFailed {
                    id: item.identity_key().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    // Backlog from earlier cycles goes after the new items.
    match store.pending(usize::MAX).await {
        Ok(backlog) => {
            for row in backlog {
                let key = row.identity_key();
                if rows.contains_key(&key) {
                    continue;
                }
                work.push(row.to_candidate());
                rows.insert(key, row);
            }
        }
        Err(e) => {
            tracing::warn!(target: "ingest", error = %e, "could not read pending backlog");
        }
    }
    if work.len() > request.limit {
        report.deferred += work.len() - request.limit;
        work.truncate(request.limit);
    }

    let pool = SummarizerPool::new(
        ctx.backend.clone(),
        PoolOptions {
            concurrency: request.concurrency,
            call_timeout: ctx.options.call_timeout,
            fallback_enabled: ctx.options.fallback_enabled,
            degraded_after: ctx.options.degraded_after,
        },
    );
    let pool_cancel = cancel.child_token();
    let mut started: HashSet<IdentityKey> = work.iter().map(|c| c.identity_key()).collect();
    let mut outcomes = pool.summarize_all(work, pool_cancel.clone());
    let mut degraded = false;

    while let Some(ev) = outcomes.next().await {
        match ev {
            PoolEvent::Finished(outcome) => {
                started.remove(&outcome.item.identity_key());
                record_outcome(store, &mut rows, outcome, emitter, &mut report).await;
            }
            PoolEvent::Degraded {
                consecutive_failures,
            } => {
                let err = CycleError::DegradedMode {
                    consecutive_failures,
                };
                degraded = true;
                if ctx.options.fallback_enabled {
                    // The pool finishes the rest extractively.
                    tracing::warn!(target: "ingest", error = %err, "finishing without the backend");
                } else {
                    tracing::warn!(target: "ingest", error = %err, "stopping new summarization work");
                    pool_cancel.cancel();
                    report.phase = CyclePhase::Draining;
                }
            }
        }
        if cancel.is_cancelled() && report.phase != CyclePhase::Draining {
            tracing::info!(target: "ingest", error = %CycleError::CycleAborted, "draining in-flight calls");
            report.phase = CyclePhase::Draining;
        }
    }
    // Never started: still pending in the store.
    report.deferred += started.len();

    let status = if degraded {
        CycleStatus::Degraded
    } else if cancel.is_cancelled() {
        CycleStatus::Cancelled
    } else {
        CycleStatus::Ok
    };
    drop(lease);
    finish(report, emitter, t0, status)
}

/// Fetch every selected source concurrently. `None` when cancelled.
///
/// Fetches already started run to completion (each is bounded by
/// `fetch_timeout`); cancellation is observed before and after them.
async fn fetch_all(
    ctx: &CycleContext,
    selected: &[Arc<dyn SourceFetcher>],
    request: &RefreshRequest,
    now: chrono::DateTime<Utc>,
    emitter: &mut ProgressEmitter,
    report: &mut CycleReport,
    cancel: &CancellationToken,
) -> Option<Vec<CandidateItem>> {
    if cancel.is_cancelled() {
        return None;
    }
    let cutoff = request.cutoff(now);
    let fetch_timeout = ctx.options.fetch_timeout;
    let fetches = selected.iter().map(|f| {
        let params = FetchParams {
            cutoff,
            filters: request.filters_for(f.tag()),
        };
        async move {
            let res = tokio::time::timeout(fetch_timeout, f.fetch(&params)).await;
            (f.tag(), f.name(), res)
        }
    });

    let results = futures::future::join_all(fetches).await;

    let mut out = Vec::new();
    for (tag, name, res) in results {
        let reason = match res {
            Ok(Ok(items)) => {
                counter!("ingest_items_fetched_total", "source" => tag.as_str()).increment(items.len() as u64);
                tracing::info!(target: "ingest", source = name, count = items.len(), "fetched");
                emitter.emit(ProgressEvent::Fetched {
                    source: tag,
                    count: items.len(),
                });
                out.extend(items);
                continue;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("fetch timed out after {}s", fetch_timeout.as_secs()),
        };
        let err = CycleError::SourceUnavailable {
            tag,
            reason: reason.clone(),
        };
        tracing::warn!(target: "ingest", error = %err, provider = name, "source unavailable");
        counter!("ingest_source_errors_total", "source" => tag.as_str()).increment(1);
        emitter.emit(ProgressEvent::SourceUnavailable {
            source: tag,
            reason: reason.clone(),
        });
        report.source_errors.push((tag, reason));
    }
    if cancel.is_cancelled() {
        tracing::info!(target: "ingest", error = %CycleError::CycleAborted, "cancelled after fetching");
        return None;
    }
    Some(out)
}

/// Persist one pool outcome, then report it.
async fn record_outcome(
    store: &dyn Store,
    rows: &mut HashMap<IdentityKey, StoredItem>,
    outcome: SummaryOutcome,
    emitter: &mut ProgressEmitter,
    report: &mut CycleReport,
) {
    let key = outcome.item.identity_key();
    let now = Utc::now();
    let mut row = match rows.remove(&key) {
        Some(r) => r,
        None => StoredItem::pending(
            &outcome.item,
            RelevanceRecord {
                keep: true,
                reason: "backlog".into(),
            },
            now,
        ),
    };

    let (ok_summary, backend_failure) = match outcome.result {
        Ok(summary) => {
            let fallback = summary.origin == SummaryOrigin::Fallback;
            row.mark_done(summary.text, &summary.by, now);
            (Some((summary.by, fallback)), None)
        }
        Err(e) => {
            row.mark_failed(now);
            (None, Some(CycleError::BackendUnavailable(e)))
        }
    };

    let title = row.title.clone();
    if let Err(error) = store.upsert(row).await {
        let err = CycleError::StoreWriteFailed {
            key: key.clone(),
            error,
        };
        tracing::warn!(target: "ingest", error = %err, "persist failed");
        report.failed += 1;
        emitter.emit(ProgressEvent::ItemFailed {
            id: key.to_string(),
            reason: err.to_string(),
        });
        return;
    }

    match (ok_summary, backend_failure) {
        (Some((by, fallback)), _) => {
            report.summarized += 1;
            if fallback {
                report.fallback += 1;
            }
            emitter.emit(ProgressEvent::ItemSummarized {
                id: key.to_string(),
                title,
                by,
            });
        }
        (None, Some(err)) => {
            report.failed += 1;
            emitter.emit(ProgressEvent::ItemFailed {
                id: key.to_string(),
                reason: err.to_string(),
            });
        }
        (None, None) => {}
    }
}

fn finish(
    mut report: CycleReport,
    emitter: &mut ProgressEmitter,
    t0: Instant,
    status: CycleStatus,
) -> CycleReport {
    report.phase = CyclePhase::Done;
    report.status = Some(status);
    report.duration_ms = t0.elapsed().as_millis() as u64;
    gauge!("ingest_last_cycle_ts").set(Utc::now().timestamp() as f64);
    emitter.emit(ProgressEvent::Completed {
        summarized: report.summarized,
        failed: report.failed,
        skipped: report.skipped(),
        deferred: report.deferred,
        duration_ms: report.duration_ms,
        status,
    });
    tracing::info!(
        target: "ingest",
        summarized = report.summarized,
        fallback = report.fallback,
        failed = report.failed,
        skipped = report.skipped(),
        deferred = report.deferred,
        status = ?status,
        duration_ms = report.duration_ms,
        "cycle completed"
    );
    report
}

fn fail(
    mut report: CycleReport,
    emitter: &mut ProgressEmitter,
    t0: Instant,
    reason: String,
) -> CycleReport {
    report.phase = CyclePhase::Failed;
    report.duration_ms = t0.elapsed().as_millis() as u64;
    tracing::warn!(target: "ingest", %reason, "cycle failed");
    emitter.emit(ProgressEvent::Failed {
        reason: reason.clone(),
    });
    report.failure = Some(reason);
    report
}
