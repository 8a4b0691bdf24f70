//! Application startup and bootstrap logic.
//!
//! Extracted from `main.rs` so the whole application can be assembled in
//! tests with `StorageBackend::Local` and a temp data directory, no cloud
//! credentials needed.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::bucket::BucketClient;
use crate::catalog::SnapshotCatalog;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::FetchManager;
use crate::manifest::ManifestService;
use crate::server::routes::build_router;
use crate::server::AppState;

/// Resolve the configuration file path.
///
/// Priority:
/// 1. `GONDOLA_CONFIG` environment variable
/// 2. `./gondola.toml` if it exists
/// 3. None (use defaults)
pub fn resolve_config_path() -> Option<String> {
    std::env::var("GONDOLA_CONFIG").ok().or_else(|| {
        let default = "gondola.toml";
        std::path::Path::new(default)
            .exists()
            .then(|| default.to_string())
    })
}

/// Initialize tracing subscriber from logging config.
///
/// Supports JSON and plain text formats. Uses `RUST_LOG` env var if set,
/// otherwise falls back to `config.logging.level`.
pub fn init_logging(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Build the application router and its background machinery.
///
/// Returns the axum `Router` ready to be served and a shutdown channel
/// sender; sending `true` stops an in-flight fetch run gracefully.
pub async fn build_app(config: Config) -> Result<(Router, watch::Sender<bool>)> {
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        bucket = %config.storage.bucket,
        backend = %config.storage.backend,
        data_dir = %config.catalog.data_dir.display(),
        batch_size = config.catalog.batch_size,
        "configuration loaded"
    );

    crate::metrics::init();

    let catalog = SnapshotCatalog::new(&config.catalog)?;
    let bucket = BucketClient::from_config(&config.storage)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let fetches = Arc::new(FetchManager::new(
        catalog.clone(),
        bucket,
        &config.catalog,
        &config.storage,
        shutdown_rx,
    ));
    // A lease from a crashed run would otherwise block fetches for a full
    // TTL window.
    fetches.clear_stale_lease();

    let manifests = Arc::new(ManifestService::new(
        catalog.clone(),
        &config.manifest,
        &config.catalog,
    )?);

    let state = AppState {
        config: Arc::new(config),
        catalog,
        fetches,
        manifests,
    };
    Ok((build_router(state), shutdown_tx))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageBackend;

    fn test_config(tmp: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Local;
        config.storage.bucket = tmp.path().join("bucket").to_string_lossy().to_string();
        config.catalog.data_dir = tmp.path().join("fetches");
        config
    }

    #[test]
    fn test_resolve_config_path_from_env() {
        let original = std::env::var("GONDOLA_CONFIG").ok();

        std::env::set_var("GONDOLA_CONFIG", "foo.toml");
        let path = resolve_config_path();

        match original {
            Some(v) => std::env::set_var("GONDOLA_CONFIG", v),
            None => std::env::remove_var("GONDOLA_CONFIG"),
        }

        assert_eq!(path, Some("foo.toml".to_string()));
    }

    #[tokio::test]
    async fn test_build_app_local_storage() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(&tmp);

        let (_router, shutdown_tx) = build_app(config).await.unwrap();
        assert!(tmp.path().join("fetches").is_dir());

        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn test_build_app_clears_stale_lease() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(&tmp);
        let data_dir = config.catalog.data_dir.clone();
        std::fs::create_dir_all(&data_dir).unwrap();
        let stale = serde_json::json!({
            "holder_id": "gondola-dead",
            "acquired_at": "2020-01-01T00:00:00Z",
            "expires_at": "2020-01-01T04:00:00Z",
        });
        std::fs::write(data_dir.join("fetch.lock"), stale.to_string()).unwrap();

        let (_router, shutdown_tx) = build_app(config).await.unwrap();
        assert!(!data_dir.join("fetch.lock").exists());
        let _ = shutdown_tx.send(true);
    }
}
