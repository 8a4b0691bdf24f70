use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers::{fetches, health, manifest, metrics, objects};
use super::middleware;
use super::AppState;

/// Builds the axum router with all routes, middleware, and shared state.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let body_limit = state.config.server.max_request_body_mb * 1024 * 1024;

    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/readyz", get(health::readiness_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route(
            "/v1/fetches",
            post(fetches::start_fetch).get(fetches::list_fetches),
        )
        .route("/v1/fetches/status", get(fetches::fetch_status))
        .route("/v1/fetches/active", delete(fetches::cancel_fetch))
        .route(
            "/v1/fetches/:snapshot",
            get(fetches::get_fetch).delete(fetches::delete_fetch),
        )
        .route(
            "/v1/fetches/:snapshot/objects/query",
            post(objects::query_objects),
        )
        .route(
            "/v1/fetches/:snapshot/objects/download",
            post(objects::download_objects),
        )
        .route(
            "/v1/fetches/:snapshot/manifest",
            put(manifest::load_manifest)
                .get(manifest::get_manifest)
                .delete(manifest::clear_manifest),
        )
        .route(
            "/v1/fetches/:snapshot/manifest/link",
            post(manifest::link_manifest),
        )
        .layer(axum::middleware::from_fn(middleware::http_metrics))
        .layer(TimeoutLayer::new(timeout))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}
