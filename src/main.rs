//! AI News Agent: binary entrypoint.
//! Loads configuration, wires the ingestion cycle and serves the HTTP surface.

use ai_news_agent::config::{BackendConfig, Settings};
use ai_news_agent::ingest::config::load_feeds_default;
use ai_news_agent::ingest::scheduler::{spawn_refresh_scheduler, RefreshSchedulerCfg};
use ai_news_agent::metrics::Metrics;
use ai_news_agent::relevance::RelevanceConfig;
use ai_news_agent::{build_context, router, AppState};
use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - NEWS_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("NEWS_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ai_news_agent=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    enable_dev_tracing();

    let settings = Settings::load()?;
    let ai = BackendConfig::load_default()?;
    let relevance = RelevanceConfig::from_toml()?;
    let feeds = load_feeds_default()?;

    let metrics = Metrics::init()?;
    let ctx = build_context(&settings, &ai, relevance, feeds).await?;

    if settings.scheduler_enabled {
        let cfg = RefreshSchedulerCfg {
            interval_secs: settings.refresh_interval_secs,
            request: settings.default_request(),
        };
        tracing::info!(target: "ingest", interval_secs = cfg.interval_secs, "refresh scheduler enabled");
        // Runs for the lifetime of the service.
        let _scheduler = spawn_refresh_scheduler(ctx.clone(), cfg, CancellationToken::new());
    }

    let router = router(AppState::new(ctx, settings)).merge(metrics.router());
    Ok(router.into())
}
