// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::types::RefreshRequest;
use crate::orchestrator::{self, CycleContext};
use crate::progress::ProgressEmitter;

#[derive(Clone, Debug)]
pub struct RefreshSchedulerCfg {
    pub interval_secs: u64,
    pub request: RefreshRequest,
}

/// Run an unobserved cycle every `interval_secs` until `shutdown` fires.
/// A tick that finds a cycle running waits for it (the store lease queues).
pub fn spawn_refresh_scheduler(
    ctx: Arc<CycleContext>,
    cfg: RefreshSchedulerCfg,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            let mut emitter = ProgressEmitter::detached();
            let report =
                orchestrator::run(&ctx, &cfg.request, &mut emitter, &shutdown.child_token()).await;
            counter!("ingest_scheduled_runs_total").increment(1);

            tracing::info!(
                target: "ingest",
                summarized = report.summarized,
                failed = report.failed,
                skipped = report.skipped(),
                deferred = report.deferred,
                phase = ?report.phase,
                "scheduled refresh tick"
            );
        }
        tracing::info!(target: "ingest", "refresh scheduler stopped");
    })
}
