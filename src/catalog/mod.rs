//! Snapshot catalog: the data directory of per-fetch SQLite databases.
//!
//! The catalog owns snapshot naming and lookup and wraps the blocking
//! store and query layers in `spawn_blocking` for the async handlers.

pub mod query;
pub mod store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::{GondolaError, Result};
use crate::pattern::CompiledFilter;
use crate::types::{FetchInfo, FetchStatus, ManifestSet, ObjectPage, QueryFilters, SortOrder};

pub use store::SnapshotStore;

/// Snapshot name for a fetch started at `at`: the UTC start time with
/// colons flattened so it stays a portable file name.
pub fn snapshot_name_for(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%SZ").to_string()
}

/// Rejects names that could escape the data directory.
pub fn validate_snapshot_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(GondolaError::InvalidSnapshotName {
            name: name.to_string(),
        });
    }
    Ok(())
}

pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GondolaError::Internal(format!("blocking task failed: {e}")))?
}

/// Directory of snapshot databases.
#[derive(Debug, Clone)]
pub struct SnapshotCatalog {
    data_dir: PathBuf,
}

impl SnapshotCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            data_dir: config.data_dir.clone(),
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Store handle for a snapshot name, whether or not the file exists.
    pub fn store(&self, snapshot: &str) -> Result<SnapshotStore> {
        validate_snapshot_name(snapshot)?;
        Ok(SnapshotStore::new(self.data_dir.join(format!("{snapshot}.db"))))
    }

    /// Store handle for a snapshot that must already exist.
    pub fn existing(&self, snapshot: &str) -> Result<SnapshotStore> {
        let store = self.store(snapshot)?;
        if !store.exists() {
            return Err(GondolaError::SnapshotNotFound {
                snapshot: snapshot.to_string(),
            });
        }
        Ok(store)
    }

    /// Lists every snapshot, newest first. Files that cannot be read as a
    /// snapshot database are skipped with a warning instead of failing the
    /// whole listing.
    pub async fn list(&self) -> Result<Vec<FetchInfo>> {
        let data_dir = self.data_dir.clone();
        run_blocking(move || {
            let mut infos = Vec::new();
            for entry in std::fs::read_dir(&data_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("db") {
                    continue;
                }
                match SnapshotStore::new(path.clone()).fetch_info() {
                    Ok(info) => infos.push(info),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                    }
                }
            }
            infos.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            Ok(infos)
        })
        .await
    }

    pub async fn fetch_info(&self, snapshot: &str) -> Result<FetchInfo> {
        let store = self.existing(snapshot)?;
        run_blocking(move || store.fetch_info()).await
    }

    /// Deletes a snapshot database and its WAL sidecars. A snapshot whose
    /// fetch is still running cannot be deleted.
    pub async fn delete(&self, snapshot: &str) -> Result<()> {
        let store = self.existing(snapshot)?;
        let name = snapshot.to_string();
        run_blocking(move || {
            let info = store.fetch_info()?;
            if info.status == FetchStatus::Running {
                return Err(GondolaError::SnapshotRunning { snapshot: name });
            }
            let path = store.path().to_path_buf();
            std::fs::remove_file(&path)?;
            for suffix in ["-wal", "-shm"] {
                let mut sidecar = path.clone().into_os_string();
                sidecar.push(suffix);
                let _ = std::fs::remove_file(PathBuf::from(sidecar));
            }
            debug!(snapshot = %store.snapshot(), "deleted snapshot");
            Ok(())
        })
        .await
    }

    /// Runs a filtered page query against a snapshot.
    pub async fn query_objects(
        &self,
        snapshot: &str,
        filter: CompiledFilter,
        filters: QueryFilters,
        sort: SortOrder,
        page: usize,
        page_size: usize,
    ) -> Result<ObjectPage> {
        let store = self.existing(snapshot)?;
        run_blocking(move || {
            let conn = store.connect()?;
            query::run_query(&conn, &filter, &filters, sort, page, page_size)
        })
        .await
    }

    /// Collects filtered object names for the download endpoint.
    pub async fn object_names(
        &self,
        snapshot: &str,
        filter: CompiledFilter,
        filters: QueryFilters,
    ) -> Result<Vec<String>> {
        let store = self.existing(snapshot)?;
        run_blocking(move || {
            let conn = store.connect()?;
            query::filtered_names(&conn, &filter, &filters)
        })
        .await
    }

    /// Reads the manifest loaded against a snapshot, if any.
    pub async fn manifest(&self, snapshot: &str) -> Result<Option<ManifestSet>> {
        let store = self.existing(snapshot)?;
        run_blocking(move || store.manifest()).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectRecord;
    use tempfile::TempDir;

    fn catalog(dir: &TempDir) -> SnapshotCatalog {
        let config = CatalogConfig {
            data_dir: dir.path().to_path_buf(),
            batch_size: 1000,
            lease_ttl_secs: 3600,
        };
        SnapshotCatalog::new(&config).unwrap()
    }

    #[test]
    fn test_snapshot_name_format() {
        let at: DateTime<Utc> = "2024-01-31T12:30:45Z".parse().unwrap();
        assert_eq!(snapshot_name_for(at), "2024-01-31T12-30-45Z");
    }

    #[test]
    fn test_validate_snapshot_name_rejects_traversal() {
        assert!(validate_snapshot_name("2024-01-31T12-30-45Z").is_ok());
        for bad in ["", "../etc", "a/b", "a\\b", "x..y"] {
            assert!(
                validate_snapshot_name(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_list_sorts_newest_first_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);

        let older = catalog.store("2024-01-01T00-00-00Z").unwrap();
        drop(
            older
                .create("b", None, "2024-01-01T00:00:00Z".parse().unwrap())
                .unwrap(),
        );
        let newer = catalog.store("2024-02-01T00-00-00Z").unwrap();
        drop(
            newer
                .create("b", None, "2024-02-01T00:00:00Z".parse().unwrap())
                .unwrap(),
        );
        std::fs::write(dir.path().join("garbage.db"), b"not a database").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let infos = catalog.list().await.unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].snapshot, "2024-02-01T00-00-00Z");
        assert_eq!(infos[1].snapshot, "2024-01-01T00-00-00Z");
    }

    #[tokio::test]
    async fn test_existing_rejects_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let err = catalog.fetch_info("2024-01-01T00-00-00Z").await.unwrap_err();
        assert!(matches!(err, GondolaError::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_refuses_running_fetch() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let store = catalog.store("2024-01-01T00-00-00Z").unwrap();
        drop(store.create("b", None, Utc::now()).unwrap());

        let err = catalog.delete("2024-01-01T00-00-00Z").await.unwrap_err();
        assert!(matches!(err, GondolaError::SnapshotRunning { .. }));

        store
            .finalize(FetchStatus::Success, None, Utc::now())
            .unwrap();
        catalog.delete("2024-01-01T00-00-00Z").await.unwrap();
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_query_objects_through_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let store = catalog.store("2024-01-01T00-00-00Z").unwrap();
        let mut conn = store.create("b", None, Utc::now()).unwrap();
        SnapshotStore::insert_objects(
            &mut conn,
            &[ObjectRecord {
                name: "readme.txt".into(),
                size: 5,
                updated: None,
                time_created: None,
                custom_time: None,
            }],
        )
        .unwrap();
        drop(conn);

        let filter = crate::pattern::compile_patterns::<String>(&[], 20, 4096).unwrap();
        let page = catalog
            .query_objects(
                "2024-01-01T00-00-00Z",
                filter,
                QueryFilters::default(),
                SortOrder::NameAsc,
                1,
                200,
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "readme.txt");
    }
}
