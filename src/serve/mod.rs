//! HTTP API for the dashboard.
//!
//! Read-only: every handler is a store fetch plus (for the aggregated
//! endpoints) pure window math from [`crate::query`]. Store failures are
//! isolated per request and surfaced as an `{"error": ...}` payload;
//! nothing here can crash the serving process.

pub mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::query;
use crate::store::Store;

use health::HealthMetrics;

/// Shared handler state.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub metrics: Arc<HealthMetrics>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Error payload returned to the dashboard.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        error!(error = %format!("{err:#}"), "query failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DayParams {
    #[serde(default)]
    tz_offset: i32,
    #[serde(default)]
    compare: bool,
}

#[derive(Debug, Deserialize)]
struct HeatmapParams {
    #[serde(default)]
    tz_offset: i32,
}

/// Builds the API router.
pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/checkpoints", get(list_checkpoints))
        .route("/api/checkpoint/{id}/day/{date}", get(checkpoint_day))
        .route("/api/checkpoint/{id}/heatmap", get(checkpoint_heatmap))
        .route("/api/latest", get(latest_status))
        .route("/api/countries", get(list_countries))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Binds and serves the API until the token is cancelled.
pub async fn run<S: Store + 'static>(
    addr: SocketAddr,
    state: AppState<S>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding API server to {addr}"))?;

    info!(%addr, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("serving API")?;

    Ok(())
}

fn track<S, T>(state: &AppState<S>, endpoint: &str, result: &Result<T, ApiError>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    state
        .metrics
        .http_requests
        .with_label_values(&[endpoint, status])
        .inc();

    if result.is_err() {
        state.metrics.query_errors.inc();
    }
}

async fn list_checkpoints<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Response, ApiError> {
    let result = state
        .store
        .list_checkpoints()
        .await
        .map(|rows| Json(rows).into_response())
        .map_err(ApiError::internal);

    track(&state, "checkpoints", &result);
    result
}

async fn checkpoint_day<S: Store>(
    State(state): State<AppState<S>>,
    path: Result<Path<(i64, String)>, PathRejection>,
    query: Result<Query<DayParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let result = match (path, query) {
        (Ok(Path((id, date))), Ok(Query(params))) => {
            day_response(&state, id, &date, &params).await
        }
        (Err(rejection), _) => Err(ApiError::bad_request(rejection.body_text())),
        (_, Err(rejection)) => Err(ApiError::bad_request(rejection.body_text())),
    };

    track(&state, "day", &result);
    result
}

async fn day_response<S: Store>(
    state: &AppState<S>,
    id: i64,
    date: &str,
    params: &DayParams,
) -> Result<Response, ApiError> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("invalid date {date:?}, expected YYYY-MM-DD")))?;

    let view = query::day_view(
        state.store.as_ref(),
        id,
        date,
        params.tz_offset,
        params.compare,
    )
    .await
    .map_err(ApiError::internal)?;

    Ok(Json(view).into_response())
}

async fn checkpoint_heatmap<S: Store>(
    State(state): State<AppState<S>>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<HeatmapParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let result = match (path, query) {
        (Ok(Path(id)), Ok(Query(params))) => {
            query::heatmap_view(state.store.as_ref(), id, params.tz_offset, Utc::now())
                .await
                .map(|buckets| Json(buckets).into_response())
                .map_err(ApiError::internal)
        }
        (Err(rejection), _) => Err(ApiError::bad_request(rejection.body_text())),
        (_, Err(rejection)) => Err(ApiError::bad_request(rejection.body_text())),
    };

    track(&state, "heatmap", &result);
    result
}

async fn latest_status<S: Store>(State(state): State<AppState<S>>) -> Result<Response, ApiError> {
    let result = state
        .store
        .latest_status()
        .await
        .map(|rows| Json(rows).into_response())
        .map_err(ApiError::internal);

    track(&state, "latest", &result);
    result
}

async fn list_countries<S: Store>(State(state): State<AppState<S>>) -> Result<Response, ApiError> {
    let result = state
        .store
        .list_countries()
        .await
        .map(|rows| Json(rows).into_response())
        .map_err(ApiError::internal);

    track(&state, "countries", &result);
    result
}

async fn metrics<S: Store>(State(state): State<AppState<S>>) -> Result<Response, ApiError> {
    state
        .metrics
        .encode()
        .map(|body| body.into_response())
        .map_err(ApiError::internal)
}
