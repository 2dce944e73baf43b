// tests/api_http.rs
//
// HTTP-level tests for the control Router without opening sockets.
// Requests go through tower::ServiceExt::oneshot against an App wired to mocks.
//
// Covered:
// - GET /health
// - sources CRUD, toggle, manual crawl
// - scheduler start / status / stop
// - articles listing, decisions, rewrite, publish retry, review resend

mod common;

use serde_json::{json, Value as Json};
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use newsflow::article::NewArticle;
use newsflow::cancel::Cancel;

const BODY_LIMIT: usize = 1024 * 1024;

async fn call(app: &Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Json::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

/// Ingest one article straight into the lifecycle and push it to review.
async fn reviewed_article(h: &common::Harness, key: &str) -> u64 {
    let ins = h
        .app
        .lifecycle
        .intake(NewArticle {
            key: key.to_string(),
            title: "Headline".into(),
            content: "raw body".into(),
            ..Default::default()
        })
        .await
        .expect("intake");
    h.app
        .lifecycle
        .advance_new(ins.article.id, &Cancel::never())
        .await
        .expect("advance");
    ins.article.id
}

#[tokio::test]
async fn health_returns_ok() {
    let h = common::harness();
    let (status, body) = call(&h.app.router(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Json::String("OK".into()));
}

#[tokio::test]
async fn source_crud_round_trip() {
    let h = common::harness();
    let app = h.app.router();

    let (status, created) = call(
        &app,
        "POST",
        "/sources",
        Some(json!({ "name": "Daily", "url": "https://daily.test/", "interval_minutes": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().expect("id");
    assert_eq!(created["interval_minutes"], 10);
    assert_eq!(created["enabled"], true);
    assert_eq!(created["last_seen_key"], Json::Null);

    let (status, _) = call(
        &app,
        "POST",
        "/sources",
        Some(json!({ "name": "Again", "url": "https://daily.test/" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "duplicate url");

    let (status, err) = call(
        &app,
        "POST",
        "/sources",
        Some(json!({ "name": "Bad", "url": "ftp://nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("invalid source"));

    let (status, _) = call(
        &app,
        "POST",
        "/sources",
        Some(json!({ "name": "Forever", "url": "https://forever.test/", "interval_minutes": 1u64 << 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "interval beyond one week");

    let (status, updated) = call(
        &app,
        "PUT",
        &format!("/sources/{id}"),
        Some(json!({ "interval_minutes": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["interval_minutes"], 30);
    assert_eq!(updated["name"], "Daily");

    let (_, toggled) = call(&app, "POST", &format!("/sources/{id}/toggle"), None).await;
    assert_eq!(toggled["enabled"], false);

    let (status, list) = call(&app, "GET", "/sources", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = call(&app, "DELETE", &format!("/sources/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", &format!("/sources/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "DELETE", &format!("/sources/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_crawl_is_accepted_then_conflicts_while_running() {
    let h = common::harness();
    h.fetcher
        .set_scan_delay(std::time::Duration::from_millis(200));
    h.fetcher.set_listing("https://slow.test/", &[]);
    let id = h.add_source("https://slow.test/");
    let app = h.app.router();

    let (status, body) = call(&app, "POST", &format!("/sources/{id}/crawl"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "started");

    let (status, body) = call(&app, "POST", &format!("/sources/{id}/crawl"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["outcome"], "in_flight");

    let (status, _) = call(&app, "POST", "/sources/999/crawl", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    h.settle().await;
}

#[tokio::test]
async fn scheduler_start_status_stop() {
    let h = common::harness();
    let app = h.app.router();

    let (_, first) = call(&app, "POST", "/scheduler/start", None).await;
    assert_eq!(first, json!({ "started": true, "running": true }));
    let (_, again) = call(&app, "POST", "/scheduler/start", None).await;
    assert_eq!(again["started"], false, "second start is a no-op");

    let (status, st) = call(&app, "GET", "/scheduler/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(st["running"], true);
    assert_eq!(st["in_flight"], 0);

    let (_, stopped) = call(&app, "POST", "/scheduler/stop", None).await;
    assert_eq!(stopped, json!({ "running": false, "was_running": true }));
    let (_, st) = call(&app, "GET", "/scheduler/status", None).await;
    assert_eq!(st["running"], false);
}

#[tokio::test]
async fn decision_approve_publishes_and_repeat_is_ignored() {
    let h = common::harness();
    let id = reviewed_article(&h, "https://a.test/1").await;
    let app = h.app.router();

    let (status, a) = call(&app, "GET", &format!("/articles/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(a["status"], "under_review");

    let uri = format!("/articles/{id}/decision");
    let (status, out) = call(&app, "POST", &uri, Some(json!({ "action": "approve", "reviewer": "ed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["outcome"], "applied");
    assert_eq!(out["article"]["status"], "published");
    assert_eq!(out["article"]["publish_id"], format!("post-{id}"));

    let (status, out) = call(&app, "POST", &uri, Some(json!({ "action": "approve" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["outcome"], "ignored");
    assert_eq!(h.publisher.calls(), 1);

    let (status, _) = call(&app, "POST", &format!("/articles/{id}/publish"), None).await;
    assert_eq!(status, StatusCode::CONFLICT, "published articles cannot be re-published");
}

#[tokio::test]
async fn decision_body_is_validated() {
    let h = common::harness();
    let id = reviewed_article(&h, "https://a.test/2").await;
    let app = h.app.router();
    let uri = format!("/articles/{id}/decision");

    let (status, _) = call(&app, "POST", &uri, Some(json!({ "action": "shrug" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "POST", &uri, Some(json!({ "action": "edit" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "edit needs text or an instruction");

    let (status, out) = call(
        &app,
        "POST",
        &uri,
        Some(json!({ "action": "edit", "manual_text": "hand written" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["article"]["status"], "under_review");
    assert_eq!(out["article"]["rewritten"], "hand written");

    let (status, _) = call(&app, "POST", "/articles/4242/decision", Some(json!({ "action": "reject" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_publish_can_be_retried_over_http() {
    let h = common::harness();
    let id = reviewed_article(&h, "https://a.test/3").await;
    let app = h.app.router();
    h.publisher.set_failing(true);

    let (_, out) = call(
        &app,
        "POST",
        &format!("/articles/{id}/decision"),
        Some(json!({ "action": "approve" })),
    )
    .await;
    assert_eq!(out["article"]["status"], "failed");

    h.publisher.set_failing(false);
    let (status, a) = call(&app, "POST", &format!("/articles/{id}/publish"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(a["status"], "published");
    assert_eq!(a["failure"], Json::Null);
}

#[tokio::test]
async fn rewrite_and_review_resend() {
    let h = common::harness();
    let id = reviewed_article(&h, "https://a.test/4").await;
    let app = h.app.router();

    let (status, a) = call(&app, "POST", &format!("/articles/{id}/rewrite"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(a["rewritten"], "rewritten: raw body");
    assert_eq!(h.rewriter.last_instruction(), None);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/articles/{id}/rewrite"),
        Some(json!({ "instruction": "shorter" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.rewriter.last_instruction().as_deref(), Some("shorter"));

    let before = h.review.submitted().len();
    let (status, a) = call(&app, "POST", &format!("/articles/{id}/review"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(a["status"], "under_review");
    assert_eq!(h.review.submitted().len(), before + 1);
}

#[tokio::test]
async fn articles_list_is_paged_newest_first() {
    let h = common::harness();
    for i in 0..5 {
        reviewed_article(&h, &format!("https://a.test/p{i}")).await;
    }
    let app = h.app.router();

    let (status, page) = call(&app, "GET", "/articles?skip=1&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<u64> = page
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![4, 3]);

    let (_, all) = call(&app, "GET", "/articles?limit=0", None).await;
    assert_eq!(all.as_array().unwrap().len(), 1, "limit is clamped to at least one");
}
