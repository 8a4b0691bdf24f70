//! Fetch lifecycle: start, status, cancel.
//!
//! One fetch runs at a time, enforced by the file-based lease rather than
//! any process-wide flag. The manager tracks the in-flight run so status
//! and cancel have something to point at, and the background task clears
//! that bookkeeping on every exit path.

pub mod lease;
pub mod runner;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::bucket::BucketClient;
use crate::catalog::{run_blocking, snapshot_name_for, SnapshotCatalog};
use crate::config::{CatalogConfig, StorageConfig};
use crate::error::{GondolaError, Result};

pub use lease::{FetchLease, Lease};

/// Acknowledgement returned when a fetch is started.
#[derive(Debug, Clone, Serialize)]
pub struct StartedFetch {
    pub snapshot: String,
    pub started_at: DateTime<Utc>,
}

/// Poll response for the running fetch, if any.
#[derive(Debug, Clone, Serialize)]
pub struct FetchStatusReport {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FetchStatusReport {
    fn idle() -> Self {
        Self {
            running: false,
            snapshot: None,
            started_at: None,
            processed: None,
            message: None,
        }
    }
}

#[derive(Debug)]
struct RunningFetch {
    snapshot: String,
    started_at: DateTime<Utc>,
    cancel: watch::Sender<bool>,
}

/// Starts and supervises background fetch runs.
#[derive(Debug)]
pub struct FetchManager {
    catalog: SnapshotCatalog,
    bucket: BucketClient,
    lease: FetchLease,
    batch_size: usize,
    default_prefix: Option<String>,
    current: Arc<Mutex<Option<RunningFetch>>>,
    shutdown: watch::Receiver<bool>,
}

impl FetchManager {
    pub fn new(
        catalog: SnapshotCatalog,
        bucket: BucketClient,
        catalog_config: &CatalogConfig,
        storage_config: &StorageConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let lease = FetchLease::new(
            catalog.data_dir(),
            Duration::from_secs(catalog_config.lease_ttl_secs),
        );
        Self {
            catalog,
            bucket,
            lease,
            batch_size: catalog_config.batch_size,
            default_prefix: storage_config.prefix.clone(),
            current: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    /// Removes an expired lease left behind by a crashed run. Called once
    /// at startup.
    pub fn clear_stale_lease(&self) {
        self.lease.clear_stale();
    }

    /// Acquires the lease, creates the snapshot database, and spawns the
    /// listing task. Returns as soon as the run is underway.
    pub async fn start(&self, prefix_override: Option<String>) -> Result<StartedFetch> {
        let acquired = self.lease.acquire()?;
        let started_at = Utc::now();
        let snapshot = snapshot_name_for(started_at);
        let prefix = prefix_override.or_else(|| self.default_prefix.clone());

        let store = match self.catalog.store(&snapshot) {
            Ok(store) => store,
            Err(e) => {
                self.lease.release();
                return Err(e);
            }
        };
        let conn = {
            let store = store.clone();
            let bucket_name = self.bucket.bucket().to_string();
            let prefix = prefix.clone();
            run_blocking(move || store.create(&bucket_name, prefix.as_deref(), started_at)).await
        };
        let conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                self.lease.release();
                return Err(e);
            }
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            *current = Some(RunningFetch {
                snapshot: snapshot.clone(),
                started_at,
                cancel: cancel_tx,
            });
        }
        crate::metrics::FETCH_RUNNING.set(1);
        info!(
            snapshot,
            bucket = self.bucket.bucket(),
            prefix = prefix.as_deref().unwrap_or(""),
            holder = %acquired.holder_id,
            "fetch started"
        );

        let bucket = self.bucket.clone();
        let lease = self.lease.clone();
        let current = self.current.clone();
        let batch_size = self.batch_size;
        let shutdown = self.shutdown.clone();
        let task_snapshot = snapshot.clone();
        tokio::spawn(async move {
            let outcome =
                runner::run_fetch(bucket, conn, prefix, batch_size, cancel_rx, shutdown).await;

            let finalize = {
                let store = store.clone();
                let status = outcome.status;
                let error = outcome.error.clone();
                run_blocking(move || store.finalize(status, error.as_deref(), Utc::now())).await
            };
            if let Err(e) = finalize {
                error!(snapshot = %task_snapshot, error = %e, "failed to finalize fetch row");
            }

            crate::metrics::FETCHES_TOTAL
                .with_label_values(&[&outcome.status.to_string()])
                .inc();
            crate::metrics::FETCH_OBJECTS_TOTAL.inc_by(outcome.processed);
            crate::metrics::FETCH_RUNNING.set(0);
            lease.release();
            let mut current = current.lock().unwrap_or_else(|p| p.into_inner());
            *current = None;
        });

        Ok(StartedFetch {
            snapshot,
            started_at,
        })
    }

    /// Status of the running fetch, with the live object count read from
    /// the snapshot's fetch row.
    pub async fn status(&self) -> Result<FetchStatusReport> {
        let (snapshot, started_at) = {
            let current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            match current.as_ref() {
                Some(run) => (run.snapshot.clone(), run.started_at),
                None => return Ok(FetchStatusReport::idle()),
            }
        };

        let store = self.catalog.store(&snapshot)?;
        let processed = run_blocking(move || store.fetch_info())
            .await
            .map(|info| info.record_count)
            .unwrap_or(0);
        Ok(FetchStatusReport {
            running: true,
            snapshot: Some(snapshot),
            started_at: Some(started_at),
            processed: Some(processed),
            message: Some(format!("fetching from {}", self.bucket.bucket())),
        })
    }

    /// Signals the running fetch to stop after the current record. The run
    /// finalizes as `canceled`; already-flushed batches stay in the snapshot.
    pub fn cancel(&self) -> Result<String> {
        let current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        match current.as_ref() {
            Some(run) => {
                let _ = run.cancel.send(true);
                info!(snapshot = %run.snapshot, "fetch cancel requested");
                Ok(run.snapshot.clone())
            }
            None => Err(GondolaError::NoActiveFetch),
        }
    }

    /// True while `snapshot` is the in-flight run.
    pub fn is_running(&self, snapshot: &str) -> bool {
        let current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        current
            .as_ref()
            .is_some_and(|run| run.snapshot == snapshot)
    }
}
