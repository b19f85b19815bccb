// src/progress.rs
//! Cycle progress events and the bounded channel that carries them to one observer.
//!
//! The cycle never waits on its observer: a full buffer or a closed receiver
//! detaches the emitter and the cycle continues unobserved.

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;

use crate::ingest::types::SourceTag;

/// How a cycle that reached DONE ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Ok,
    Degraded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// `total` = number of sources this cycle fetches.
    Started { total: usize },
    Fetched { source: SourceTag, count: usize },
    SourceUnavailable { source: SourceTag, reason: String },
    Deduplicated { fresh: usize, known: usize },
    Filtered { kept: usize, dropped: usize },
    ItemSummarized { id: String, title: String, by: String },
    ItemFailed { id: String, reason: String },
    Completed {
        summarized: usize,
        failed: usize,
        skipped: usize,
        deferred: usize,
        duration_ms: u64,
        status: CycleStatus,
    },
    Failed { reason: String },
}

impl ProgressEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Started { .. } => "started",
            ProgressEvent::Fetched { .. } => "fetched",
            ProgressEvent::SourceUnavailable { .. } => "source_unavailable",
            ProgressEvent::Deduplicated { .. } => "deduplicated",
            ProgressEvent::Filtered { .. } => "filtered",
            ProgressEvent::ItemSummarized { .. } => "item_summarized",
            ProgressEvent::ItemFailed { .. } => "item_failed",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Strictly increasing within a cycle, starting at 1.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

impl ProgressUpdate {
    pub fn is_terminal(&self) -> bool {
        self.event.is_terminal()
    }
}

pub struct ProgressEmitter {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
    seq: u64,
}

pub fn channel(capacity: usize) -> (ProgressEmitter, ProgressStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ProgressEmitter {
            tx: Some(tx),
            seq: 0,
        },
        ProgressStream {
            inner: ReceiverStream::new(rx),
        },
    )
}

impl ProgressEmitter {
    /// An emitter with no observer (scheduled cycles).
    pub fn detached() -> Self {
        Self { tx: None, seq: 0 }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    /// Number of events emitted so far, delivered or not.
    pub fn emitted(&self) -> u64 {
        self.seq
    }

    /// Never blocks. Returns the update's sequence number.
    pub fn emit(&mut self, event: ProgressEvent) -> u64 {
        self.seq += 1;
        let update = ProgressUpdate {
            seq: self.seq,
            at: Utc::now(),
            event,
        };
        tracing::debug!(target: "ingest", seq = update.seq, event = update.event.name(), "progress");

        if let Some(tx) = &self.tx {
            match tx.try_send(update) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(target: "ingest", seq = self.seq, "progress observer too slow; detaching");
                    metrics::counter!("progress_observers_dropped_total").increment(1);
                    self.tx = None;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(target: "ingest", seq = self.seq, "progress observer disconnected");
                    self.tx = None;
                }
            }
        }
        self.seq
    }
}

/// Receiving side; ends after the terminal event or when the emitter detaches.
pub struct ProgressStream {
    inner: ReceiverStream<ProgressUpdate>,
}

impl Stream for ProgressStream {
    type Item = ProgressUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
