//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use crate::history::HistoryError;

const DEFAULT_RUNS_LIMIT: usize = 20;
const MAX_RUNS_LIMIT: usize = 500;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{name}/last", get(last_completion))
        .route("/jobs/{name}/runs", get(recent_runs))
}

/// History lookups that fail are reported, never shown as "no prior run".
struct ApiError(HistoryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "History lookup failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        Self(e)
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let jobs: Vec<Value> = state
        .chain
        .entries()
        .into_iter()
        .map(|entry| {
            json!({
                "job": entry.job,
                "schedule": entry.schedule,
                "next_fire": entry.next_fire.map(|t| t.to_rfc3339()),
                "running": state.chain.is_running(&entry.job),
            })
        })
        .collect();

    let total = jobs.len();
    Json(json!({ "data": jobs, "meta": { "total": total } }))
}

async fn last_completion(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let last = state.history.last_completion(&name).await?;
    Ok(Json(json!({
        "data": {
            "job": name,
            "last_completion": last.map(|t| t.to_rfc3339()),
        }
    })))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn recent_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT).min(MAX_RUNS_LIMIT);
    let runs = state.history.recent_runs(&name, limit).await?;
    let total = runs.len();
    Ok(Json(json!({ "data": runs, "meta": { "total": total } })))
}
