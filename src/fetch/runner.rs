//! The background fetch task: bucket listing into a snapshot database.
//!
//! Records stream off the listing and land in transactional batches; each
//! flush also bumps the `record_count` on the fetch row so status polls see
//! live progress. Inserts run on blocking tasks with the writer connection
//! handed back and forth, keeping the executor free while SQLite works.

use std::time::Instant;

use futures::StreamExt;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bucket::BucketClient;
use crate::catalog::SnapshotStore;
use crate::error::{GondolaError, Result};
use crate::types::{FetchStatus, ObjectRecord};

/// Terminal state of one fetch run, before it is written to the fetch row.
#[derive(Debug)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub error: Option<String>,
    pub processed: u64,
}

async fn flush_batch(
    conn: Connection,
    records: Vec<ObjectRecord>,
    processed: u64,
) -> Result<Connection> {
    tokio::task::spawn_blocking(move || {
        let mut conn = conn;
        SnapshotStore::insert_objects(&mut conn, &records)?;
        SnapshotStore::update_record_count(&conn, processed)?;
        Ok(conn)
    })
    .await
    .map_err(|e| GondolaError::Internal(format!("blocking task failed: {e}")))?
}

/// Streams the listing into the snapshot. Consumes the writer connection and
/// drops it before returning so the caller can finalize (file size included)
/// on a fresh connection. A cancel or shutdown signal ends the run between
/// records; whatever was already flushed stays in the snapshot.
pub async fn run_fetch(
    bucket: BucketClient,
    mut conn: Connection,
    prefix: Option<String>,
    batch_size: usize,
    mut cancel: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> FetchOutcome {
    let started = Instant::now();
    let mut processed: u64 = 0;
    let mut batch: Vec<ObjectRecord> = Vec::with_capacity(batch_size);

    let mut stream = match bucket.list(prefix.as_deref()) {
        Ok(stream) => stream,
        Err(e) => {
            return FetchOutcome {
                status: FetchStatus::Error,
                error: Some(e.to_string()),
                processed: 0,
            }
        }
    };

    let status = loop {
        let next = tokio::select! {
            // A closed channel counts as a signal: the sender only goes away
            // when the owning manager does.
            _ = cancel.changed() => break FetchStatus::Canceled,
            _ = shutdown.changed() => break FetchStatus::Canceled,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(record)) => {
                batch.push(record);
                if batch.len() >= batch_size {
                    let drained = std::mem::take(&mut batch);
                    processed += drained.len() as u64;
                    match flush_batch(conn, drained, processed).await {
                        Ok(writer) => conn = writer,
                        Err(e) => {
                            drop(stream);
                            return FetchOutcome {
                                status: FetchStatus::Error,
                                error: Some(e.to_string()),
                                processed,
                            };
                        }
                    }
                    let rate = processed as f64 / started.elapsed().as_secs_f64().max(0.001);
                    info!(processed, rate = format!("{rate:.1}/s"), "fetch progress");
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "bucket listing failed");
                drop(stream);
                return FetchOutcome {
                    status: FetchStatus::Error,
                    error: Some(e.to_string()),
                    processed,
                };
            }
            None => break FetchStatus::Success,
        }
    };
    drop(stream);

    if !batch.is_empty() {
        let drained = std::mem::take(&mut batch);
        processed += drained.len() as u64;
        match flush_batch(conn, drained, processed).await {
            Ok(writer) => conn = writer,
            Err(e) => {
                return FetchOutcome {
                    status: FetchStatus::Error,
                    error: Some(e.to_string()),
                    processed,
                }
            }
        }
    }
    drop(conn);

    info!(
        processed,
        elapsed_secs = format!("{:.1}", started.elapsed().as_secs_f64()),
        status = %status,
        "fetch finished"
    );
    FetchOutcome {
        status,
        error: None,
        processed,
    }
}
