use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::server::AppState;

/// Liveness probe: returns 200 OK if the server process is running.
pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Readiness probe: returns 200 OK when the data directory is writable.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let probe = state.catalog.data_dir().join(".readyz");
    match std::fs::write(&probe, b"ok").and_then(|()| std::fs::remove_file(&probe)) {
        Ok(()) => Ok(Json(json!({"status": "ready", "data_dir_writable": true}))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "data_dir_writable": false,
                "error": e.to_string(),
            })),
        )),
    }
}
