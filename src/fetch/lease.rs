//! Fetch lease: one listing run at a time.
//!
//! The lease is a JSON file in the data directory. Acquisition uses
//! create-new semantics so two starters cannot both win; a lease past its
//! expiry (or one that no longer parses) is taken over, which clears the
//! state left behind by a crashed run. There is never an implicit
//! process-wide "fetch running" flag, the file is the single source of
//! truth.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{GondolaError, Result};

/// A lease granting exclusive right to run a fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// ID of the process instance that holds this lease.
    pub holder_id: String,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lease expires (wall clock).
    pub expires_at: DateTime<Utc>,
}

/// Manages the fetch lease file for one data directory.
#[derive(Debug, Clone)]
pub struct FetchLease {
    path: PathBuf,
    holder_id: String,
    ttl: Duration,
}

impl FetchLease {
    pub fn new(data_dir: &Path, ttl: Duration) -> Self {
        Self {
            path: data_dir.join("fetch.lock"),
            holder_id: format!("gondola-{}", Uuid::new_v4()),
            ttl,
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn build_lease(&self) -> Lease {
        let acquired_at = Utc::now();
        Lease {
            holder_id: self.holder_id.clone(),
            acquired_at,
            expires_at: acquired_at + chrono::Duration::seconds(self.ttl.as_secs() as i64),
        }
    }

    fn read_existing(&self) -> Option<Lease> {
        let data = std::fs::read(&self.path).ok()?;
        serde_json::from_slice(&data).ok()
    }

    /// Acquire the fetch lease.
    ///
    /// - If no lease file exists: creates one.
    /// - If a lease exists but is expired or unreadable: takes it over.
    /// - If a lease exists and is valid: returns `FetchInProgress`.
    pub fn acquire(&self) -> Result<Lease> {
        let lease = self.build_lease();
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(&serde_json::to_vec_pretty(&lease)?)?;
                debug!(holder = %lease.holder_id, "fetch lease acquired");
                Ok(lease)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Some(existing) = self.read_existing() {
                    if existing.expires_at > Utc::now() {
                        return Err(GondolaError::FetchInProgress {
                            holder: existing.holder_id,
                        });
                    }
                    warn!(
                        holder = %existing.holder_id,
                        expired_at = %existing.expires_at,
                        "taking over expired fetch lease"
                    );
                } else {
                    warn!(path = %self.path.display(), "taking over unreadable fetch lease");
                }
                std::fs::write(&self.path, serde_json::to_vec_pretty(&lease)?)?;
                Ok(lease)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lease if this instance holds it. Best effort; a failure
    /// here only delays the next acquire until the TTL passes.
    pub fn release(&self) {
        match self.read_existing() {
            Some(existing) if existing.holder_id == self.holder_id => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(error = %e, "failed to remove fetch lease");
                } else {
                    debug!("fetch lease released");
                }
            }
            Some(existing) => {
                warn!(holder = %existing.holder_id, "fetch lease held by another instance, leaving it");
            }
            None => {}
        }
    }

    /// Removes a leftover lease that already expired. Called at startup so
    /// a crash shortly before shutdown does not block fetches for a full
    /// TTL window... the expiry check in `acquire` would eventually clear
    /// it anyway.
    pub fn clear_stale(&self) {
        if let Some(existing) = self.read_existing() {
            if existing.expires_at <= Utc::now() {
                warn!(holder = %existing.holder_id, "clearing stale fetch lease at startup");
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
