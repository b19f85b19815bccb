// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use ai_news_agent::config::Settings;
use ai_news_agent::ingest::types::SourceTag;
use ai_news_agent::orchestrator::CycleContext;
use ai_news_agent::store::MemoryStore;
use ai_news_agent::{router, AppState};

use common::*;

const BODY_LIMIT: usize = 1024 * 1024;

fn test_context() -> Arc<CycleContext> {
    let hn = ai_item(SourceTag::HackerNews, "hn-1");
    let mut older = ai_item(SourceTag::Arxiv, "2410.00001");
    older.published_at = older.published_at.map(|d| d - chrono::Duration::hours(5));
    let store = Arc::new(MemoryStore::with_items([done_row(&hn), done_row(&older)]));
    context(
        vec![StaticFetcher::new(
            SourceTag::Rss,
            vec![ai_item(SourceTag::Rss, "fresh-post")],
        )],
        store,
        Arc::new(ScriptedBackend::ok()),
    )
}

fn app(ctx: Arc<CycleContext>, admin_token: Option<&str>) -> Router {
    let settings = Settings {
        admin_token: admin_token.map(str::to_string),
        store_path: None,
        ..Default::default()
    };
    router(AppState::new(ctx, settings))
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, body) = get(app(test_context(), None), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "OK");
}

#[tokio::test]
async fn items_are_listed_newest_first_and_filterable() {
    let ctx = test_context();

    let (status, body) = get(app(ctx.clone(), None), "/items").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).expect("json list");
    let rows = v.as_array().expect("array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["source"], "hacker_news");
    assert_eq!(rows[1]["external_id"], "2410.00001");
    assert_eq!(rows[0]["status"], "done");

    let (_, body) = get(app(ctx, None), "/items?source=arxiv&only_summarized=true&limit=5").await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn sources_lists_distinct_stored_tags_sorted() {
    let (status, body) = get(app(test_context(), None), "/items/sources").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).expect("json list");
    assert_eq!(v, serde_json::json!(["arxiv", "hacker_news"]));

    let empty = context(vec![], Arc::new(MemoryStore::new()), Arc::new(ScriptedBackend::ok()));
    let (_, body) = get(app(empty, None), "/items/sources").await;
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn refresh_requires_the_admin_token_when_configured() {
    let (status, _) = get(app(test_context(), Some("s3cret")), "/refresh/stream?token=wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(app(test_context(), Some("s3cret")), "/refresh/stream").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_streams_progress_until_completed() {
    let ctx = test_context();
    let (status, body) = get(app(ctx.clone(), Some("s3cret")), "/refresh/stream?token=s3cret&limit=5").await;
    assert_eq!(status, StatusCode::OK);

    assert!(body.contains("event: started"), "body: {body}");
    assert!(body.contains("event: fetched"));
    assert!(body.contains("event: item_summarized"));
    assert!(body.contains("event: completed"));
    assert!(body.trim_end().ends_with('}'), "completed must be last: {body}");

    let (_, items) = get(app(ctx, None), "/items?source=rss").await;
    let v: Json = serde_json::from_str(&items).unwrap();
    assert_eq!(v[0]["summary"], "summary of LLM agents top new benchmark fresh-post");
}

#[tokio::test]
async fn refresh_conflicts_while_a_cycle_holds_the_store() {
    let ctx = test_context();
    let _lease = ctx.store.lease().await;
    let (status, _) = get(app(ctx.clone(), None), "/refresh/stream").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn bad_refresh_parameters_are_rejected() {
    let (status, body) = get(app(test_context(), None), "/refresh/stream?concurrency=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("concurrency"));
}

#[tokio::test]
async fn cancel_without_a_running_cycle_is_not_found() {
    let req = Request::builder()
        .method("POST")
        .uri("/refresh/cancel")
        .body(Body::empty())
        .expect("build POST /refresh/cancel");
    let resp = app(test_context(), None).oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
