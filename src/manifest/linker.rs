//! Object linking: assigning manifest entries to cataloged objects.
//!
//! A link run clears every `linked_entry` and reassigns them from scratch
//! inside one transaction, scanning object names in keyset-paginated
//! chunks. Entries are evaluated in ascending order and the first match
//! wins, so priority follows manifest document order. Stats come out of
//! the same pass and land on the manifest row before the commit; an
//! aborted or crashed run rolls back to the previous link state.

use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::catalog::store::SnapshotStore;
use crate::error::{GondolaError, Result};
use crate::types::{LinkStats, ManifestEntry};

fn compile_entries(entries: &[ManifestEntry]) -> Result<Vec<(i64, Regex)>> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            Regex::new(&entry.regex_pattern)
                .map(|re| (entry.id, re))
                .map_err(|e| GondolaError::InvalidPattern {
                    index: i + 1,
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Relinks every object against `entries` (already in priority order).
///
/// `observer` is called after each chunk with the running stats; returning
/// false abandons the run, rolling the transaction back and surfacing a
/// linking-conflict error. That is how a manifest clear supersedes a link
/// in flight.
pub fn run_link(
    conn: &mut Connection,
    snapshot: &str,
    entries: &[ManifestEntry],
    batch_size: usize,
    mut observer: impl FnMut(LinkStats) -> bool,
) -> Result<LinkStats> {
    let compiled = compile_entries(entries)?;

    let tx = conn.transaction()?;
    tx.execute("UPDATE objects SET linked_entry = NULL", [])?;

    let mut stats = LinkStats {
        total_objects: 0,
        linked_objects: 0,
    };
    let mut last_name = String::new();
    loop {
        let chunk: Vec<String> = {
            let mut stmt = tx.prepare_cached(
                "SELECT name FROM objects WHERE name > ?1 ORDER BY name LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![last_name, batch_size as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            rows
        };
        if chunk.is_empty() {
            break;
        }
        {
            let mut update =
                tx.prepare_cached("UPDATE objects SET linked_entry = ?1 WHERE name = ?2")?;
            for name in &chunk {
                stats.total_objects += 1;
                if let Some((id, _)) = compiled.iter().find(|(_, re)| re.is_match(name)) {
                    update.execute(params![id, name])?;
                    stats.linked_objects += 1;
                }
            }
        }
        if let Some(last) = chunk.last() {
            last_name.clone_from(last);
        }
        if !observer(stats) {
            // Dropping the transaction rolls everything back.
            debug!(snapshot, processed = stats.total_objects, "link run superseded");
            return Err(GondolaError::LinkingInProgress {
                snapshot: snapshot.to_string(),
            });
        }
    }

    SnapshotStore::save_link_stats(&tx, stats, Utc::now())?;
    tx.commit()?;
    debug!(
        snapshot,
        total = stats.total_objects,
        linked = stats.linked_objects,
        "link run committed"
    );
    Ok(stats)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::loader::parse_manifest;
    use crate::types::ObjectRecord;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(name: &str) -> ObjectRecord {
        ObjectRecord {
            name: name.to_string(),
            size: 1,
            updated: None,
            time_created: None,
            custom_time: None,
        }
    }

    fn store_with_objects(dir: &TempDir, names: &[&str]) -> SnapshotStore {
        let store = SnapshotStore::new(dir.path().join("snap.db"));
        let mut conn = store.create("releases", None, Utc::now()).unwrap();
        let records: Vec<ObjectRecord> = names.iter().map(|n| record(n)).collect();
        SnapshotStore::insert_objects(&mut conn, &records).unwrap();
        drop(conn);
        store
    }

    fn load_entries(store: &SnapshotStore, yaml: &[u8]) -> Vec<ManifestEntry> {
        let parsed = parse_manifest(yaml).unwrap();
        store
            .replace_manifest("https://example.com/m.yml", "hash", Utc::now(), &parsed)
            .unwrap()
            .entries
    }

    fn linked_entry(store: &SnapshotStore, name: &str) -> Option<i64> {
        let conn = store.connect().unwrap();
        conn.query_row(
            "SELECT linked_entry FROM objects WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_links_matching_object_and_skips_rest() {
        let dir = TempDir::new().unwrap();
        let store = store_with_objects(&dir, &["en-US/firefox-123.0.tar.bz2", "readme.txt"]);
        let entries = load_entries(
            &store,
            b"
mapping:
  linux:
    path: ${locale}/firefox-${version}.tar.bz2
    pretty_name: Linux
    expiry: 30d
",
        );

        let mut conn = store.connect().unwrap();
        let stats = run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        assert_eq!(stats.total_objects, 2);
        assert_eq!(stats.linked_objects, 1);
        assert_eq!(
            linked_entry(&store, "en-US/firefox-123.0.tar.bz2"),
            Some(entries[0].id)
        );
        assert_eq!(linked_entry(&store, "readme.txt"), None);
    }

    #[test]
    fn test_first_match_wins_by_order() {
        let dir = TempDir::new().unwrap();
        let store = store_with_objects(&dir, &["notes/readme.txt"]);
        // Both entries match; the earlier record must win.
        let entries = load_entries(
            &store,
            b"
mapping:
  first:
    path: notes/readme.txt
    expiry: 1d
  second:
    path: readme.txt
    expiry: 1d
",
        );

        let mut conn = store.connect().unwrap();
        let stats = run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        assert_eq!(stats.linked_objects, 1);
        assert_eq!(linked_entry(&store, "notes/readme.txt"), Some(entries[0].id));
    }

    #[test]
    fn test_relink_is_idempotent_and_picks_up_new_objects() {
        let dir = TempDir::new().unwrap();
        let store = store_with_objects(&dir, &["a/readme.txt"]);
        let entries = load_entries(
            &store,
            b"
mapping:
  readme:
    path: readme.txt
    expiry: 1d
",
        );

        let mut conn = store.connect().unwrap();
        let first = run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        let second = run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        assert_eq!(first, second);

        SnapshotStore::insert_objects(&mut conn, &[record("b/readme.txt")]).unwrap();
        let third = run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        assert_eq!(third.total_objects, 2);
        assert_eq!(third.linked_objects, 2);
    }

    #[test]
    fn test_aborted_run_rolls_back_previous_links() {
        let dir = TempDir::new().unwrap();
        let store = store_with_objects(&dir, &["x/readme.txt", "y/readme.txt"]);
        let entries = load_entries(
            &store,
            b"
mapping:
  readme:
    path: readme.txt
    expiry: 1d
",
        );

        let mut conn = store.connect().unwrap();
        run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        assert!(linked_entry(&store, "x/readme.txt").is_some());

        let err = run_link(&mut conn, "snap", &entries, 1, |_| false).unwrap_err();
        assert!(matches!(err, GondolaError::LinkingInProgress { .. }));
        // The abort rolled back, keeping the committed links intact.
        assert!(linked_entry(&store, "x/readme.txt").is_some());
        assert!(linked_entry(&store, "y/readme.txt").is_some());
    }

    #[test]
    fn test_observer_sees_monotonic_chunk_progress() {
        let dir = TempDir::new().unwrap();
        let store = store_with_objects(&dir, &["a.txt", "b.txt", "c.txt"]);
        let entries = load_entries(
            &store,
            b"
mapping:
  all:
    path: ${locale}.txt
    expiry: 1d
",
        );

        let mut seen = Vec::new();
        let mut conn = store.connect().unwrap();
        let stats = run_link(&mut conn, "snap", &entries, 1, |s| {
            seen.push(s.total_objects);
            true
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(stats.total_objects, 3);
        assert_eq!(stats.linked_objects, 3);
    }

    #[test]
    fn test_stats_persisted_on_manifest_row() {
        let dir = TempDir::new().unwrap();
        let store = store_with_objects(&dir, &["readme.txt"]);
        let entries = load_entries(
            &store,
            b"
mapping:
  readme:
    path: readme.txt
    expiry: 1d
",
        );

        let mut conn = store.connect().unwrap();
        run_link(&mut conn, "snap", &entries, 1000, |_| true).unwrap();
        drop(conn);

        let set = store.manifest().unwrap().unwrap();
        let run = set.last_link.unwrap();
        assert_eq!(run.stats.total_objects, 1);
        assert_eq!(run.stats.linked_objects, 1);
    }
}
