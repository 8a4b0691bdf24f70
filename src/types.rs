use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a fetch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    /// Listing is still streaming into the snapshot.
    Running,
    /// Listing completed and the snapshot is final.
    Success,
    /// Listing aborted; `error` holds the reason.
    Error,
    /// Listing was canceled by request.
    Canceled,
}

impl std::fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStatus::Running => write!(f, "running"),
            FetchStatus::Success => write!(f, "success"),
            FetchStatus::Error => write!(f, "error"),
            FetchStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for FetchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(FetchStatus::Running),
            "success" => Ok(FetchStatus::Success),
            "error" => Ok(FetchStatus::Error),
            "canceled" => Ok(FetchStatus::Canceled),
            other => Err(format!("unknown fetch status: {other}")),
        }
    }
}

/// Metadata row describing one fetch run (one per snapshot database).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchInfo {
    /// Snapshot name (database file stem, derived from the start timestamp).
    pub snapshot: String,
    /// Bucket the listing was taken from.
    pub bucket: String,
    /// Listing prefix, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// When the fetch started.
    pub started_at: DateTime<Utc>,
    /// When the fetch ended (absent while running).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Objects cataloged so far (live while running, final afterwards).
    pub record_count: u64,
    /// Snapshot database file size in megabytes.
    pub db_size_mb: f64,
    /// Lifecycle state.
    pub status: FetchStatus,
    /// Failure reason when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One object-metadata record produced by the bucket listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Full object name (path within the bucket).
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last-modified timestamp from the listing.
    pub updated: Option<DateTime<Utc>>,
    /// Creation timestamp (listings expose one instant; it fills both).
    pub time_created: Option<DateTime<Utc>>,
    /// Object custom-time metadata, when the backend exposes it.
    pub custom_time: Option<DateTime<Utc>>,
}

/// A cataloged object as served by the query engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    /// Full object name (unique within a snapshot).
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last-modified timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<DateTime<Utc>>,
    /// Custom-time metadata (absent unless set on the object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_time: Option<DateTime<Utc>>,
    /// Manifest entry this object is linked to, when any pattern matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_entry: Option<i64>,
}

/// A manifest entry before it has been persisted (no row id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct NewManifestEntry {
    /// Match priority: position in the manifest document, starting at 0.
    pub order: u32,
    /// Display label from the manifest.
    pub pretty_name: String,
    /// The destination-path template the pattern was compiled from.
    pub destination_path: String,
    /// Compiled anchored pattern, guaranteed to compile under the engine.
    pub regex_pattern: String,
}

/// A persisted manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Row id, referenced by `StoredObject::linked_entry`.
    pub id: i64,
    /// Match priority: lower order wins on multi-entry matches.
    pub order: u32,
    /// Display label from the manifest.
    pub pretty_name: String,
    /// The destination-path template the pattern was compiled from.
    pub destination_path: String,
    /// Compiled anchored pattern.
    pub regex_pattern: String,
}

/// A loaded manifest: source identity plus its ordered entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSet {
    /// URL the manifest was fetched from.
    pub source_url: String,
    /// Lowercase-hex SHA-256 of the fetched document bytes.
    pub content_hash: String,
    /// When the manifest was loaded.
    pub loaded_at: DateTime<Utc>,
    /// Entries in match-priority order.
    pub entries: Vec<ManifestEntry>,
    /// Most recent link run against this manifest, if one completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_link: Option<LinkRun>,
}

/// Aggregate result of a link run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Objects scanned.
    pub total_objects: u64,
    /// Objects assigned a manifest entry.
    pub linked_objects: u64,
}

/// A completed link run with its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRun {
    #[serde(flatten)]
    pub stats: LinkStats,
    /// When the run committed.
    pub linked_at: DateTime<Utc>,
}

/// Sort order for object listings. Ties are always broken by name ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NameAsc,
    NameDesc,
    TimeCreatedAsc,
    TimeCreatedDesc,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::NameAsc => write!(f, "name_asc"),
            SortOrder::NameDesc => write!(f, "name_desc"),
            SortOrder::TimeCreatedAsc => write!(f, "time_created_asc"),
            SortOrder::TimeCreatedDesc => write!(f, "time_created_desc"),
        }
    }
}

/// Filter set for object queries. Categories compose with AND; the regex
/// category ORs its patterns. Empty/unset categories add no constraint.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// User regex patterns, OR semantics.
    pub patterns: Vec<String>,
    /// Keep objects created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// true: custom_time present; false: absent; unset: no constraint.
    pub has_custom_time: Option<bool>,
    /// true: linked to a manifest entry; false: unlinked; unset: no constraint.
    pub matches_manifest: Option<bool>,
}

/// One page of query results with the exact filtered total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPage {
    /// Objects on this page, in the requested order.
    pub items: Vec<StoredObject>,
    /// Total objects matching the filter set (not just this page).
    pub total: u64,
    /// 1-based page number that was served.
    pub page: usize,
    /// Effective page size after clamping.
    pub page_size: usize,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_status_serde_roundtrip() {
        for (variant, expected_json) in [
            (FetchStatus::Running, "\"running\""),
            (FetchStatus::Success, "\"success\""),
            (FetchStatus::Error, "\"error\""),
            (FetchStatus::Canceled, "\"canceled\""),
        ] {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, expected_json);
            let back: FetchStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, variant);
        }
    }

    #[test]
    fn test_fetch_status_display_matches_from_str() {
        for variant in [
            FetchStatus::Running,
            FetchStatus::Success,
            FetchStatus::Error,
            FetchStatus::Canceled,
        ] {
            let back: FetchStatus = variant.to_string().parse().unwrap();
            assert_eq!(back, variant);
        }
        assert!("paused".parse::<FetchStatus>().is_err());
    }

    #[test]
    fn test_sort_order_serde_roundtrip() {
        for (variant, expected_json) in [
            (SortOrder::NameAsc, "\"name_asc\""),
            (SortOrder::NameDesc, "\"name_desc\""),
            (SortOrder::TimeCreatedAsc, "\"time_created_asc\""),
            (SortOrder::TimeCreatedDesc, "\"time_created_desc\""),
        ] {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, expected_json);
            let back: SortOrder = serde_json::from_str(&json).unwrap();
            assert_eq!(back, variant);
        }
    }

    #[test]
    fn test_sort_order_default() {
        assert_eq!(SortOrder::default(), SortOrder::NameAsc);
    }

    #[test]
    fn test_stored_object_omits_absent_fields() {
        let obj = StoredObject {
            name: "readme.txt".into(),
            size: 12,
            updated: None,
            time_created: None,
            custom_time: None,
            linked_entry: None,
        };
        let json = serde_json::to_string(&obj).unwrap();
        assert!(!json.contains("custom_time"));
        assert!(!json.contains("linked_entry"));
        assert!(!json.contains("time_created"));

        let back: StoredObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "readme.txt");
        assert!(back.custom_time.is_none());
    }

    #[test]
    fn test_stored_object_timestamps_serialize_rfc3339() {
        let obj = StoredObject {
            name: "en-US/firefox-123.0.tar.bz2".into(),
            size: 1024,
            updated: Some("2024-01-31T12:00:00Z".parse().unwrap()),
            time_created: Some("2024-01-31T12:00:00Z".parse().unwrap()),
            custom_time: None,
            linked_entry: Some(3),
        };
        let json = serde_json::to_string(&obj).unwrap();
        assert!(json.contains("2024-01-31T12:00:00Z"));
        assert!(json.contains("\"linked_entry\":3"));
    }

    #[test]
    fn test_fetch_info_serde() {
        let info = FetchInfo {
            snapshot: "2024-01-31T12-00-00Z".into(),
            bucket: "releases".into(),
            prefix: None,
            started_at: "2024-01-31T12:00:00Z".parse().unwrap(),
            ended_at: None,
            record_count: 42,
            db_size_mb: 1.25,
            status: FetchStatus::Running,
            error: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(!json.contains("ended_at"));
        assert!(!json.contains("\"error\""));

        let back: FetchInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.record_count, 42);
        assert_eq!(back.status, FetchStatus::Running);
    }

    #[test]
    fn test_link_stats_serde() {
        let stats = LinkStats {
            total_objects: 450,
            linked_objects: 37,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(json, "{\"total_objects\":450,\"linked_objects\":37}");
    }
}
