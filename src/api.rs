// src/api.rs
//! HTTP control surface.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::article::{Article, ArticleId};
use crate::error::ControlError;
use crate::lifecycle::{DecisionOutcome, Lifecycle};
use crate::registry::{NewSource, Source, SourceId, SourceUpdate, StartOutcome};
use crate::review::{DecisionEvent, ReviewAction};
use crate::scheduler::{Scheduler, SchedulerStatus};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;

type ApiResult<T> = Result<T, ControlError>;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub lifecycle: Arc<Lifecycle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/scheduler/start", post(scheduler_start))
        .route("/scheduler/stop", post(scheduler_stop))
        .route("/scheduler/status", get(scheduler_status))
        .route("/sources", get(list_sources).post(create_source))
        .route(
            "/sources/{id}",
            get(get_source).put(update_source).delete(delete_source),
        )
        .route("/sources/{id}/toggle", post(toggle_source))
        .route("/sources/{id}/crawl", post(crawl_source))
        .route("/articles", get(list_articles))
        .route("/articles/{id}", get(get_article))
        .route("/articles/{id}/decision", post(decide))
        .route("/articles/{id}/rewrite", post(rewrite_article))
        .route("/articles/{id}/publish", post(publish_article))
        .route("/articles/{id}/review", post(review_article))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn scheduler_start(State(st): State<AppState>) -> Json<Value> {
    let started = st.scheduler.start();
    Json(json!({ "started": started, "running": true }))
}

async fn scheduler_stop(State(st): State<AppState>) -> Json<Value> {
    let was_running = st.scheduler.stop().await;
    Json(json!({ "running": false, "was_running": was_running }))
}

async fn scheduler_status(State(st): State<AppState>) -> Json<SchedulerStatus> {
    Json(st.scheduler.status())
}

async fn list_sources(State(st): State<AppState>) -> Json<Vec<Source>> {
    Json(st.scheduler.registry().list())
}

async fn create_source(
    State(st): State<AppState>,
    Json(body): Json<NewSource>,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let source = st.scheduler.register(body)?;
    Ok((StatusCode::CREATED, Json(source)))
}

async fn get_source(State(st): State<AppState>, Path(id): Path<SourceId>) -> ApiResult<Json<Source>> {
    Ok(Json(st.scheduler.registry().get(id)?))
}

async fn update_source(
    State(st): State<AppState>,
    Path(id): Path<SourceId>,
    Json(body): Json<SourceUpdate>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.scheduler.update(id, body)?))
}

async fn delete_source(
    State(st): State<AppState>,
    Path(id): Path<SourceId>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.scheduler.remove_source(id).await?))
}

async fn toggle_source(
    State(st): State<AppState>,
    Path(id): Path<SourceId>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.scheduler.toggle(id)?))
}

async fn crawl_source(
    State(st): State<AppState>,
    Path(id): Path<SourceId>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (status, outcome) = match st.scheduler.crawl_now(id)? {
        StartOutcome::Started => (StatusCode::ACCEPTED, "started"),
        StartOutcome::InFlight => (StatusCode::CONFLICT, "in_flight"),
        StartOutcome::Retired => return Err(ControlError::SourceNotFound(id)),
    };
    Ok((status, Json(json!({ "source_id": id, "outcome": outcome }))))
}

#[derive(Debug, Deserialize)]
struct Paging {
    skip: Option<usize>,
    limit: Option<usize>,
}

async fn list_articles(
    State(st): State<AppState>,
    Query(p): Query<Paging>,
) -> ApiResult<Json<Vec<Article>>> {
    let limit = p.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let items = st
        .lifecycle
        .store()
        .list(p.skip.unwrap_or(0), limit)
        .await?;
    Ok(Json(items))
}

async fn get_article(
    State(st): State<AppState>,
    Path(id): Path<ArticleId>,
) -> ApiResult<Json<Article>> {
    st.lifecycle
        .store()
        .get(id)
        .await?
        .map(Json)
        .ok_or(ControlError::ArticleNotFound(id))
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    action: String,
    instruction: Option<String>,
    manual_text: Option<String>,
    reviewer: Option<String>,
}

async fn decide(
    State(st): State<AppState>,
    Path(id): Path<ArticleId>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<DecisionOutcome>> {
    let action = ReviewAction::from_parts(&body.action, body.instruction, body.manual_text)
        .map_err(ControlError::InvalidRequest)?;
    let outcome = st
        .lifecycle
        .decide(DecisionEvent {
            article_id: id,
            action,
            reviewer: body.reviewer,
        })
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
struct RewriteBody {
    instruction: Option<String>,
}

/// The body is optional; an empty POST rewrites without an instruction.
async fn rewrite_article(
    State(st): State<AppState>,
    Path(id): Path<ArticleId>,
    body: Bytes,
) -> ApiResult<Json<Article>> {
    let body: RewriteBody = if body.iter().all(u8::is_ascii_whitespace) {
        RewriteBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ControlError::InvalidRequest(format!("rewrite body: {e}")))?
    };
    let instruction = body.instruction.filter(|i| !i.trim().is_empty());
    Ok(Json(st.lifecycle.manual_rewrite(id, instruction).await?))
}

async fn publish_article(
    State(st): State<AppState>,
    Path(id): Path<ArticleId>,
) -> ApiResult<Json<Article>> {
    Ok(Json(st.lifecycle.retry_publish(id).await?))
}

async fn review_article(
    State(st): State<AppState>,
    Path(id): Path<ArticleId>,
) -> ApiResult<Json<Article>> {
    Ok(Json(st.lifecycle.resend_review(id).await?))
}
