//! Manifest lifecycle: load, link, inspect, clear.
//!
//! All manifest mutations for a snapshot funnel through a per-snapshot
//! gate so load and link never interleave. A link run additionally pins
//! the gate's epoch; clearing the manifest bumps the epoch and waits for
//! the gate instead of failing, which makes an in-flight link abort at
//! its next chunk boundary and roll back. Last writer wins.

pub mod linker;
pub mod loader;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::catalog::{run_blocking, SnapshotCatalog};
use crate::config::{CatalogConfig, ManifestConfig};
use crate::error::{GondolaError, Result};
use crate::types::{LinkStats, ManifestSet};

pub use linker::run_link;
pub use loader::{parse_manifest, LoadedManifest, ManifestLoader};

#[derive(Debug, Default)]
struct Gate {
    lock: Arc<Mutex<()>>,
    epoch: AtomicU64,
}

/// Coordinates manifest operations across snapshots.
#[derive(Debug)]
pub struct ManifestService {
    catalog: SnapshotCatalog,
    loader: ManifestLoader,
    batch_size: usize,
    gates: DashMap<String, Arc<Gate>>,
    progress: Arc<DashMap<String, LinkStats>>,
}

impl ManifestService {
    pub fn new(
        catalog: SnapshotCatalog,
        manifest_config: &ManifestConfig,
        catalog_config: &CatalogConfig,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            loader: ManifestLoader::new(manifest_config)?,
            batch_size: catalog_config.batch_size,
            gates: DashMap::new(),
            progress: Arc::new(DashMap::new()),
        })
    }

    fn gate(&self, snapshot: &str) -> Arc<Gate> {
        self.gates.entry(snapshot.to_string()).or_default().clone()
    }

    /// Fetches and parses the manifest at `url`, then replaces the
    /// snapshot's manifest (entries and links) in one transaction.
    pub async fn load(&self, snapshot: &str, url: &str) -> Result<ManifestSet> {
        let store = self.catalog.existing(snapshot)?;
        let gate = self.gate(snapshot);
        let _guard = gate.lock.clone().try_lock_owned().map_err(|_| {
            GondolaError::LinkingInProgress {
                snapshot: snapshot.to_string(),
            }
        })?;

        let loaded = self.loader.load(url).await?;
        let loaded_at = Utc::now();
        let set = run_blocking(move || {
            store.replace_manifest(
                &loaded.source_url,
                &loaded.content_hash,
                loaded_at,
                &loaded.entries,
            )
        })
        .await?;
        info!(snapshot, entries = set.entries.len(), "manifest loaded");
        Ok(set)
    }

    /// The loaded manifest for a snapshot, or a not-found error.
    pub async fn get(&self, snapshot: &str) -> Result<ManifestSet> {
        self.catalog
            .manifest(snapshot)
            .await?
            .ok_or_else(|| GondolaError::ManifestNotFound {
                snapshot: snapshot.to_string(),
            })
    }

    /// Relinks every object in the snapshot against the loaded manifest.
    pub async fn link(&self, snapshot: &str) -> Result<LinkStats> {
        let store = self.catalog.existing(snapshot)?;
        let gate = self.gate(snapshot);
        let _guard = gate.lock.clone().try_lock_owned().map_err(|_| {
            GondolaError::LinkingInProgress {
                snapshot: snapshot.to_string(),
            }
        })?;
        let epoch = gate.epoch.load(Ordering::Acquire);

        let set = {
            let store = store.clone();
            run_blocking(move || store.manifest()).await?
        };
        let Some(set) = set else {
            return Err(GondolaError::ManifestNotFound {
                snapshot: snapshot.to_string(),
            });
        };

        let name = snapshot.to_string();
        self.progress.insert(
            name.clone(),
            LinkStats {
                total_objects: 0,
                linked_objects: 0,
            },
        );
        let progress = self.progress.clone();
        let observer_gate = gate.clone();
        let batch_size = self.batch_size;
        let result = run_blocking(move || {
            let mut conn = store.connect()?;
            linker::run_link(&mut conn, &name, &set.entries, batch_size, |stats| {
                progress.insert(name.clone(), stats);
                observer_gate.epoch.load(Ordering::Acquire) == epoch
            })
        })
        .await;
        self.progress.remove(snapshot);

        let stats = result?;
        info!(
            snapshot,
            total = stats.total_objects,
            linked = stats.linked_objects,
            "link completed"
        );
        Ok(stats)
    }

    /// Running link progress for a snapshot, while one is in flight.
    pub fn link_progress(&self, snapshot: &str) -> Option<LinkStats> {
        self.progress.get(snapshot).map(|stats| *stats)
    }

    /// Removes the manifest and its links. Never refused while a link is
    /// running: the epoch bump makes that link abort and roll back, then
    /// the clear takes the gate and proceeds.
    pub async fn clear(&self, snapshot: &str) -> Result<()> {
        let store = self.catalog.existing(snapshot)?;
        let gate = self.gate(snapshot);
        gate.epoch.fetch_add(1, Ordering::AcqRel);
        let _guard = gate.lock.clone().lock_owned().await;

        let removed = run_blocking(move || store.delete_manifest()).await?;
        if !removed {
            return Err(GondolaError::ManifestNotFound {
                snapshot: snapshot.to_string(),
            });
        }
        info!(snapshot, "manifest cleared");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SnapshotStore;
    use crate::types::ObjectRecord;
    use tempfile::TempDir;

    const SNAP: &str = "2024-01-31T12-00-00Z";

    fn service(dir: &TempDir) -> ManifestService {
        let catalog_config = CatalogConfig {
            data_dir: dir.path().to_path_buf(),
            batch_size: 2,
            lease_ttl_secs: 3600,
        };
        let catalog = SnapshotCatalog::new(&catalog_config).unwrap();
        ManifestService::new(catalog, &ManifestConfig::default(), &catalog_config).unwrap()
    }

    fn seed_snapshot(service: &ManifestService, names: &[&str]) -> SnapshotStore {
        let store = service.catalog.store(SNAP).unwrap();
        let mut conn = store.create("releases", None, Utc::now()).unwrap();
        let records: Vec<ObjectRecord> = names
            .iter()
            .map(|n| ObjectRecord {
                name: n.to_string(),
                size: 1,
                updated: None,
                time_created: None,
                custom_time: None,
            })
            .collect();
        SnapshotStore::insert_objects(&mut conn, &records).unwrap();
        drop(conn);
        store
    }

    fn seed_manifest(store: &SnapshotStore) {
        let entries = loader::parse_manifest(
            b"
mapping:
  readme:
    path: readme.txt
    expiry: 30d
",
        )
        .unwrap();
        store
            .replace_manifest("https://example.com/m.yml", "hash", Utc::now(), &entries)
            .unwrap();
    }

    #[tokio::test]
    async fn test_link_without_manifest_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        seed_snapshot(&service, &["readme.txt"]);

        let err = service.link(SNAP).await.unwrap_err();
        assert!(matches!(err, GondolaError::ManifestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_link_reports_stats() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let store = seed_snapshot(&service, &["readme.txt", "notes.txt", "a/readme.txt"]);
        seed_manifest(&store);

        let stats = service.link(SNAP).await.unwrap();
        assert_eq!(stats.total_objects, 3);
        assert_eq!(stats.linked_objects, 2);
        assert!(service.link_progress(SNAP).is_none());
    }

    #[tokio::test]
    async fn test_busy_gate_rejects_link_and_load() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let store = seed_snapshot(&service, &["readme.txt"]);
        seed_manifest(&store);

        let gate = service.gate(SNAP);
        let _held = gate.lock.clone().try_lock_owned().unwrap();

        let err = service.link(SNAP).await.unwrap_err();
        assert!(matches!(err, GondolaError::LinkingInProgress { .. }));
        let err = service
            .load(SNAP, "https://example.com/m.yml")
            .await
            .unwrap_err();
        assert!(matches!(err, GondolaError::LinkingInProgress { .. }));
    }

    #[tokio::test]
    async fn test_clear_waits_for_gate_instead_of_failing() {
        let dir = TempDir::new().unwrap();
        let service = Arc::new(service(&dir));
        let store = seed_snapshot(&service, &["readme.txt"]);
        seed_manifest(&store);

        let gate = service.gate(SNAP);
        let held = gate.lock.clone().try_lock_owned().unwrap();
        let epoch_before = gate.epoch.load(Ordering::Acquire);

        let clearing = tokio::spawn({
            let service = service.clone();
            async move { service.clear(SNAP).await }
        });

        // The clear bumps the epoch and then blocks on the held gate.
        tokio::time::timeout(std::time::Duration::from_millis(50), async {
            while gate.epoch.load(Ordering::Acquire) == epoch_before {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(!clearing.is_finished());

        drop(held);
        clearing.await.unwrap().unwrap();
        let err = service.get(SNAP).await.unwrap_err();
        assert!(matches!(err, GondolaError::ManifestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_clear_without_manifest_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        seed_snapshot(&service, &["readme.txt"]);

        let err = service.clear(SNAP).await.unwrap_err();
        assert!(matches!(err, GondolaError::ManifestNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_returns_loaded_manifest() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let store = seed_snapshot(&service, &["readme.txt"]);
        seed_manifest(&store);

        let set = service.get(SNAP).await.unwrap();
        assert_eq!(set.source_url, "https://example.com/m.yml");
        assert_eq!(set.entries.len(), 1);
    }
}
