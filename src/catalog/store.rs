//! Snapshot database access.
//!
//! Each fetch run lands in its own SQLite file: a single-row `fetch` table
//! describing the run, an `objects` table holding the listing, and the
//! `manifest`/`manifest_entries` tables for the manifest loaded against the
//! snapshot. All timestamps are stored as INTEGER microseconds since the
//! Unix epoch. Connections are opened per operation; writers run in WAL
//! mode so readers see a consistent snapshot while a fetch or relink is in
//! flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::Result;
use crate::types::{
    FetchInfo, FetchStatus, LinkRun, LinkStats, ManifestEntry, ManifestSet, NewManifestEntry,
    ObjectRecord,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fetch (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bucket TEXT NOT NULL,
    prefix TEXT,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    record_count INTEGER NOT NULL DEFAULT 0,
    db_size_mb REAL NOT NULL DEFAULT 0.0,
    status TEXT NOT NULL CHECK (status IN ('running', 'success', 'error', 'canceled')),
    error TEXT
);

CREATE TABLE IF NOT EXISTS objects (
    name TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    updated INTEGER,
    time_created INTEGER,
    custom_time INTEGER,
    linked_entry INTEGER
);

CREATE TABLE IF NOT EXISTS manifest (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    source_url TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    loaded_at INTEGER NOT NULL,
    last_link_total INTEGER,
    last_link_linked INTEGER,
    last_linked_at INTEGER
);

CREATE TABLE IF NOT EXISTS manifest_entries (
    id INTEGER PRIMARY KEY,
    ord INTEGER NOT NULL UNIQUE,
    pretty_name TEXT NOT NULL,
    destination_path TEXT NOT NULL,
    regex_pattern TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_objects_time_created ON objects (time_created, name);
CREATE INDEX IF NOT EXISTS idx_objects_custom_time ON objects (custom_time, name);
CREATE INDEX IF NOT EXISTS idx_objects_linked_entry ON objects (linked_entry);
";

/// Patterns cached per connection before the cache is reset.
const REGEXP_CACHE_CAP: usize = 100;

pub(crate) fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub(crate) fn from_micros(us: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us)
}

/// Registers the `REGEXP` operator on a connection.
///
/// `a REGEXP b` is true when pattern `b` matches anywhere in text `a`
/// (search semantics). NULL text never matches, and a pattern the engine
/// rejects matches nothing rather than failing the query; patterns reaching
/// SQL have already been validated, so that path only covers rows compared
/// against stored patterns from older runs.
pub fn register_regexp(conn: &Connection) -> Result<()> {
    let mut cache: HashMap<String, Option<Regex>> = HashMap::new();
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: String = ctx.get(0)?;
            let text = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(false),
                value => value
                    .as_str()
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?
                    .to_string(),
            };
            if !cache.contains_key(&pattern) {
                if cache.len() >= REGEXP_CACHE_CAP {
                    cache.clear();
                }
                cache.insert(pattern.clone(), Regex::new(&pattern).ok());
            }
            Ok(cache
                .get(&pattern)
                .and_then(|compiled| compiled.as_ref())
                .is_some_and(|re| re.is_match(&text)))
        },
    )?;
    Ok(())
}

fn round_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Handle to one snapshot database file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot name, the database file stem.
    pub fn snapshot(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Snapshot file size on disk, in megabytes rounded to two decimals.
    pub fn file_size_mb(&self) -> Result<f64> {
        Ok(round_mb(std::fs::metadata(&self.path)?.len()))
    }

    /// Opens the existing snapshot for reading and querying. Does not
    /// create the file; missing snapshots are caught by the catalog first.
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        register_regexp(&conn)?;
        Ok(conn)
    }

    /// Creates the snapshot database and its `fetch` row in `running`
    /// state, returning a connection tuned for the bulk listing insert.
    pub fn create(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT INTO fetch (id, bucket, prefix, started_at, status)
             VALUES (1, ?1, ?2, ?3, 'running')",
            params![bucket, prefix, to_micros(started_at)],
        )?;
        register_regexp(&conn)?;
        Ok(conn)
    }

    /// Reads the fetch metadata row.
    pub fn fetch_info(&self) -> Result<FetchInfo> {
        let conn = self.connect()?;
        let snapshot = self.snapshot().to_string();
        let info = conn.query_row(
            "SELECT bucket, prefix, started_at, ended_at, record_count, db_size_mb,
                    status, error
             FROM fetch WHERE id = 1",
            [],
            |row| {
                let status_text: String = row.get(6)?;
                let status = status_text.parse::<FetchStatus>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        6,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;
                Ok(FetchInfo {
                    snapshot: snapshot.clone(),
                    bucket: row.get(0)?,
                    prefix: row.get(1)?,
                    started_at: from_micros(row.get(2)?).unwrap_or_default(),
                    ended_at: row.get::<_, Option<i64>>(3)?.and_then(from_micros),
                    record_count: row.get::<_, i64>(4)? as u64,
                    db_size_mb: row.get(5)?,
                    status,
                    error: row.get(7)?,
                })
            },
        )?;
        Ok(info)
    }

    /// Writes the terminal state of the fetch run. The file size is taken
    /// before opening the finalize connection, so call this after the bulk
    /// writer connection has been dropped.
    pub fn finalize(
        &self,
        status: FetchStatus,
        error: Option<&str>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let db_size_mb = self.file_size_mb()?;
        let conn = self.connect()?;
        conn.execute(
            "UPDATE fetch SET status = ?1, error = ?2, ended_at = ?3, db_size_mb = ?4
             WHERE id = 1",
            params![status.to_string(), error, to_micros(ended_at), db_size_mb],
        )?;
        Ok(())
    }

    /// Inserts a listing batch. Duplicate names replace the earlier row, so
    /// re-listed objects keep exactly one record.
    pub fn insert_objects(conn: &mut Connection, records: &[ObjectRecord]) -> Result<usize> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO objects
                     (name, size, updated, time_created, custom_time, linked_entry)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.name,
                    record.size as i64,
                    record.updated.map(to_micros),
                    record.time_created.map(to_micros),
                    record.custom_time.map(to_micros),
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Updates the live object count on the writer connection.
    pub fn update_record_count(conn: &Connection, count: u64) -> Result<()> {
        conn.execute(
            "UPDATE fetch SET record_count = ?1 WHERE id = 1",
            params![count as i64],
        )?;
        Ok(())
    }

    /// Replaces the loaded manifest in one transaction. Links into the old
    /// entry set would dangle, so they are cleared in the same transaction.
    pub fn replace_manifest(
        &self,
        source_url: &str,
        content_hash: &str,
        loaded_at: DateTime<Utc>,
        entries: &[NewManifestEntry],
    ) -> Result<ManifestSet> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM manifest_entries", [])?;
        tx.execute("DELETE FROM manifest", [])?;
        tx.execute("UPDATE objects SET linked_entry = NULL", [])?;
        tx.execute(
            "INSERT INTO manifest (id, source_url, content_hash, loaded_at)
             VALUES (1, ?1, ?2, ?3)",
            params![source_url, content_hash, to_micros(loaded_at)],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO manifest_entries (ord, pretty_name, destination_path, regex_pattern)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.order,
                    entry.pretty_name,
                    entry.destination_path,
                    entry.regex_pattern,
                ])?;
            }
        }
        tx.commit()?;

        let stored = read_entries(&conn)?;
        Ok(ManifestSet {
            source_url: source_url.to_string(),
            content_hash: content_hash.to_string(),
            loaded_at,
            entries: stored,
            last_link: None,
        })
    }

    /// Reads the loaded manifest with its entries and last link run, if any.
    pub fn manifest(&self) -> Result<Option<ManifestSet>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT source_url, content_hash, loaded_at,
                        last_link_total, last_link_linked, last_linked_at
                 FROM manifest WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((source_url, content_hash, loaded_at, total, linked, linked_at)) = row else {
            return Ok(None);
        };
        let last_link = match (total, linked, linked_at.and_then(from_micros)) {
            (Some(total), Some(linked), Some(linked_at)) => Some(LinkRun {
                stats: LinkStats {
                    total_objects: total as u64,
                    linked_objects: linked as u64,
                },
                linked_at,
            }),
            _ => None,
        };
        Ok(Some(ManifestSet {
            source_url,
            content_hash,
            loaded_at: from_micros(loaded_at).unwrap_or_default(),
            entries: read_entries(&conn)?,
            last_link,
        }))
    }

    /// Removes the manifest and every link into it, in one transaction.
    /// Returns false when no manifest was loaded.
    pub fn delete_manifest(&self) -> Result<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM manifest", [])?;
        tx.execute("DELETE FROM manifest_entries", [])?;
        tx.execute("UPDATE objects SET linked_entry = NULL", [])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Persists link-run stats inside the linker's transaction.
    pub fn save_link_stats(
        conn: &Connection,
        stats: LinkStats,
        linked_at: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE manifest
             SET last_link_total = ?1, last_link_linked = ?2, last_linked_at = ?3
             WHERE id = 1",
            params![
                stats.total_objects as i64,
                stats.linked_objects as i64,
                to_micros(linked_at),
            ],
        )?;
        Ok(())
    }
}

fn read_entries(conn: &Connection) -> Result<Vec<ManifestEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, ord, pretty_name, destination_path, regex_pattern
         FROM manifest_entries ORDER BY ord",
    )?;
    let entries = stmt
        .query_map([], |row| {
            Ok(ManifestEntry {
                id: row.get(0)?,
                order: row.get(1)?,
                pretty_name: row.get(2)?,
                destination_path: row.get(3)?,
                regex_pattern: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}
