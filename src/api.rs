// src/api.rs
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::config::settings::split_terms;
use crate::config::Settings;
use crate::ingest::types::{RefreshRequest, SourceTag};
use crate::orchestrator::{try_run_cycle, CycleContext};
use crate::store::{ItemQuery, StoredItem};

pub const MAX_REFRESH_LIMIT: usize = 500;
pub const MAX_REFRESH_CONCURRENCY: usize = 20;

type ApiError = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    ctx: Arc<CycleContext>,
    settings: Arc<Settings>,
    /// Cancel switch of the cycle started over HTTP, tagged with its run id.
    active: Arc<Mutex<Option<(u64, CancellationToken)>>>,
    runs: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(ctx: Arc<CycleContext>, settings: Settings) -> Self {
        Self {
            ctx,
            settings: Arc::new(settings),
            active: Arc::new(Mutex::new(None)),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn context(&self) -> &Arc<CycleContext> {
        &self.ctx
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/items", get(list_items))
        .route("/items/sources", get(list_sources))
        .route("/refresh/stream", get(refresh_stream))
        .route("/refresh/cancel", post(refresh_cancel))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn list_items(
    State(state): State<AppState>,
    Query(q): Query<ItemQuery>,
) -> Result<Json<Vec<StoredItem>>, ApiError> {
    state
        .ctx
        .store
        .reader()
        .list(&q)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(target: "api", error = %e, "listing items failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

/// Distinct sources present in the store.
async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<SourceTag>>, ApiError> {
    state
        .ctx
        .store
        .reader()
        .sources()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(target: "api", error = %e, "listing sources failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    token: Option<String>,
    max_age_days: Option<u32>,
    limit: Option<usize>,
    concurrency: Option<usize>,
    /// Comma-separated source tags.
    sources: Option<String>,
    hn_min_points: Option<i64>,
    /// Comma-separated Hacker News search terms.
    hn_terms: Option<String>,
    /// Comma-separated domain allow list, applied to every source.
    domains: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

fn authorize(settings: &Settings, token: Option<&str>) -> Result<(), ApiError> {
    match settings.admin_token.as_deref().filter(|t| !t.is_empty()) {
        Some(expected) if token != Some(expected) => {
            Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
        }
        _ => Ok(()),
    }
}

/// Layer the query parameters over the configured default request.
pub fn build_request(settings: &Settings, q: &RefreshQuery) -> Result<RefreshRequest, ApiError> {
    let mut req = settings.default_request();

    if let Some(days) = q.max_age_days {
        req.max_age_days = Some(days);
    }
    if let Some(limit) = q.limit {
        if !(1..=MAX_REFRESH_LIMIT).contains(&limit) {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("limit must be within 1..={MAX_REFRESH_LIMIT}"),
            ));
        }
        req.limit = limit;
    }
    if let Some(n) = q.concurrency {
        if !(1..=MAX_REFRESH_CONCURRENCY).contains(&n) {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("concurrency must be within 1..={MAX_REFRESH_CONCURRENCY}"),
            ));
        }
        req.concurrency = n;
    }
    if let Some(raw) = q.sources.as_deref() {
        let mut tags = Vec::new();
        for s in split_terms(raw) {
            let tag = SourceTag::parse(&s)
                .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown source '{s}'")))?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        req.sources = tags;
    }

    let hn = req.filters.entry(SourceTag::HackerNews).or_default();
    if let Some(p) = q.hn_min_points {
        hn.min_points = Some(p);
    }
    if let Some(terms) = q.hn_terms.as_deref() {
        let terms = split_terms(terms);
        if !terms.is_empty() {
            hn.search_terms = terms;
        }
    }
    if let Some(domains) = q.domains.as_deref() {
        let allow = split_terms(domains);
        for tag in SourceTag::ALL {
            req.filters.entry(tag).or_default().domain_allow_list = allow.clone();
        }
    }
    Ok(req)
}

async fn refresh_stream(
    State(state): State<AppState>,
    Query(q): Query<RefreshQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    authorize(&state.settings, q.token.as_deref())?;
    let request = build_request(&state.settings, &q)?;

    let cancel = CancellationToken::new();
    let Some(handle) = try_run_cycle(state.ctx.clone(), request, cancel.clone()) else {
        return Err((
            StatusCode::CONFLICT,
            "a refresh cycle is already running".into(),
        ));
    };
    let run_id = state.runs.fetch_add(1, Ordering::Relaxed) + 1;
    *state.active.lock().await = Some((run_id, cancel));
    tracing::info!(target: "api", run_id, "refresh cycle started over http");

    // The cycle outlives a disconnected client; clear the switch once it ends.
    let active = state.active.clone();
    let report = handle.report;
    tokio::spawn(async move {
        if let Err(e) = report.await {
            tracing::error!(target: "api", error = %e, "refresh cycle task crashed");
        }
        let mut slot = active.lock().await;
        if slot.as_ref().is_some_and(|(id, _)| *id == run_id) {
            *slot = None;
        }
    });

    let events = handle.events.map(|update| {
        let event = Event::default()
            .event(update.event.name())
            .id(update.seq.to_string());
        Ok(match event.json_data(&update) {
            Ok(ev) => ev,
            Err(e) => Event::default().event("error").data(e.to_string()),
        })
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn refresh_cancel(
    State(state): State<AppState>,
    Query(q): Query<TokenQuery>,
) -> Result<StatusCode, ApiError> {
    authorize(&state.settings, q.token.as_deref())?;
    let slot = state.active.lock().await;
    match slot.as_ref() {
        Some((_, token)) if !token.is_cancelled() => {
            token.cancel();
            tracing::info!(target: "api", "refresh cycle cancellation requested");
            Ok(StatusCode::ACCEPTED)
        }
        _ => Err((StatusCode::NOT_FOUND, "no refresh cycle running".into())),
    }
}
