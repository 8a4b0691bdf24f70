use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::fetch::{FetchStatusReport, StartedFetch};
use crate::server::AppState;
use crate::types::FetchInfo;

use super::ApiError;

/// Request body for starting a fetch. An empty object uses the configured
/// listing prefix.
#[derive(Debug, Default, Deserialize)]
pub struct StartFetchRequest {
    /// Overrides the configured bucket prefix for this run.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Starts a background fetch and returns its snapshot name.
#[instrument(skip(state, req))]
pub async fn start_fetch(
    State(state): State<AppState>,
    Json(req): Json<StartFetchRequest>,
) -> Result<(StatusCode, Json<StartedFetch>), ApiError> {
    let started = state.fetches.start(req.prefix).await?;
    info!(snapshot = %started.snapshot, "fetch accepted");
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// Lists every snapshot in the catalog, newest first.
#[instrument(skip(state))]
pub async fn list_fetches(
    State(state): State<AppState>,
) -> Result<Json<Vec<FetchInfo>>, ApiError> {
    Ok(Json(state.catalog.list().await?))
}

/// Reports the running fetch with its live object count, if one is in flight.
pub async fn fetch_status(
    State(state): State<AppState>,
) -> Result<Json<FetchStatusReport>, ApiError> {
    Ok(Json(state.fetches.status().await?))
}

/// Cancels the running fetch. The run finalizes as `canceled` in the
/// background; this only delivers the signal.
#[instrument(skip(state))]
pub async fn cancel_fetch(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let snapshot = state.fetches.cancel()?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"snapshot": snapshot, "canceling": true})),
    ))
}

/// Returns the fetch metadata row of one snapshot.
#[instrument(skip(state), fields(snapshot = %snapshot))]
pub async fn get_fetch(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
) -> Result<Json<FetchInfo>, ApiError> {
    Ok(Json(state.catalog.fetch_info(&snapshot).await?))
}

/// Deletes a snapshot database. Refused with 409 while its fetch is running.
#[instrument(skip(state), fields(snapshot = %snapshot))]
pub async fn delete_fetch(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete(&snapshot).await?;
    info!(snapshot = %snapshot, "snapshot deleted");
    Ok(StatusCode::NO_CONTENT)
}
