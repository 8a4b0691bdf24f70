//! HTTP surface: router, middleware, and request handlers.

pub mod handlers;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use crate::catalog::SnapshotCatalog;
use crate::config::Config;
use crate::fetch::FetchManager;
use crate::manifest::ManifestService;

/// Shared application state injected into all handlers via axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: SnapshotCatalog,
    pub fetches: Arc<FetchManager>,
    pub manifests: Arc<ManifestService>,
}
