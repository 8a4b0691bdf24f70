use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::server::AppState;
use crate::types::{LinkStats, ManifestSet};

use super::ApiError;

/// Request body for loading a manifest.
#[derive(Debug, Deserialize)]
pub struct LoadManifestRequest {
    /// HTTP(S) URL of the manifest document.
    pub url: String,
}

/// Manifest info with the progress of an in-flight link run, when any.
#[derive(Debug, Serialize)]
pub struct ManifestResponse {
    #[serde(flatten)]
    pub manifest: ManifestSet,
    /// Running link progress; absent unless a link is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_in_progress: Option<LinkStats>,
}

/// Fetches the manifest at `url` and replaces the snapshot's manifest,
/// clearing prior links in the same transaction.
#[instrument(skip(state, req), fields(snapshot = %snapshot, url = %req.url))]
pub async fn load_manifest(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
    Json(req): Json<LoadManifestRequest>,
) -> Result<Json<ManifestSet>, ApiError> {
    let result = state.manifests.load(&snapshot, &req.url).await;
    let label = if result.is_ok() { "success" } else { "failure" };
    crate::metrics::MANIFEST_LOADS_TOTAL
        .with_label_values(&[label])
        .inc();
    let set = result?;
    info!(snapshot = %snapshot, entries = set.entries.len(), "manifest replaced");
    Ok(Json(set))
}

/// Returns the loaded manifest with entries, last link stats, and any
/// in-flight link progress.
#[instrument(skip(state), fields(snapshot = %snapshot))]
pub async fn get_manifest(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
) -> Result<Json<ManifestResponse>, ApiError> {
    let manifest = state.manifests.get(&snapshot).await?;
    let link_in_progress = state.manifests.link_progress(&snapshot);
    Ok(Json(ManifestResponse {
        manifest,
        link_in_progress,
    }))
}

/// Relinks every object in the snapshot against the loaded manifest and
/// returns the run's statistics.
#[instrument(skip(state), fields(snapshot = %snapshot))]
pub async fn link_manifest(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
) -> Result<Json<LinkStats>, ApiError> {
    let timer = crate::metrics::LINK_DURATION.start_timer();
    let result = state.manifests.link(&snapshot).await;
    let label = if result.is_ok() { "success" } else { "failure" };
    crate::metrics::LINK_RUNS_TOTAL.with_label_values(&[label]).inc();
    let stats = result?;
    timer.observe_duration();
    Ok(Json(stats))
}

/// Removes the manifest and every link into it. Supersedes an in-flight
/// link run rather than failing.
#[instrument(skip(state), fields(snapshot = %snapshot))]
pub async fn clear_manifest(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manifests.clear(&snapshot).await?;
    Ok(StatusCode::NO_CONTENT)
}
