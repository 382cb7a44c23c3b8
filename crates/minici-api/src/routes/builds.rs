//! Build trigger and status endpoints.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Json, Router};
use minici_core::job::JobHandle;
use minici_core::{BuildId, BuildRecord, TriggerSource};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_builds).post(trigger_build))
        .route("/{id}", get(get_build))
        .route("/{id}/logs", get(get_build_logs))
}

#[derive(Debug, Deserialize)]
struct TriggerRequest {
    repository: Option<String>,
    branch: Option<String>,
}

async fn trigger_build(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<JobHandle>), ApiError> {
    let repository = req
        .repository
        .ok_or_else(|| ApiError::BadRequest("repository is required".to_string()))?;
    let handle = state
        .builds
        .trigger(&repository, req.branch.as_deref(), TriggerSource::Manual)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_builds(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BuildRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.builds.list_recent(limit).await?))
}

fn parse_id(id: &str) -> Result<BuildId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid build id: {id}")))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BuildRecord>, ApiError> {
    Ok(Json(state.builds.get(parse_id(&id)?).await?))
}

/// Build output as plain text.
async fn get_build_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<([(header::HeaderName, &'static str); 1], String), ApiError> {
    let build = state.builds.get(parse_id(&id)?).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        build.output,
    ))
}
