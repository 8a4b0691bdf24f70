use thiserror::Error;

#[derive(Error, Debug)]
pub enum GondolaError {
    // Template / manifest errors
    #[error("unknown template variable: ${{{token}}}")]
    UnknownTemplateVariable { token: String },

    #[error("failed to fetch manifest from {url}: {reason}")]
    ManifestFetch { url: String, reason: String },

    #[error("invalid manifest document: {0}")]
    ManifestParse(String),

    #[error("manifest has no entries with an expiry")]
    EmptyManifest,

    #[error("manifest not loaded for snapshot: {snapshot}")]
    ManifestNotFound { snapshot: String },

    // Pattern errors
    #[error("invalid pattern at index {index}: {reason}")]
    InvalidPattern { index: usize, reason: String },

    // Snapshot errors
    #[error("snapshot not found: {snapshot}")]
    SnapshotNotFound { snapshot: String },

    #[error("invalid snapshot name: {name}")]
    InvalidSnapshotName { name: String },

    // Concurrency errors
    #[error("a manifest operation is already running for snapshot {snapshot}")]
    LinkingInProgress { snapshot: String },

    #[error("a fetch is already running (held by {holder})")]
    FetchInProgress { holder: String },

    #[error("no fetch is currently running")]
    NoActiveFetch,

    #[error("snapshot {snapshot} has a fetch in progress")]
    SnapshotRunning { snapshot: String },

    // Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // Wrapped I/O and storage errors
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("storage path error: {0}")]
    StoragePath(#[from] object_store::path::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GondolaError>;

impl GondolaError {
    pub fn status_code(&self) -> u16 {
        match self {
            GondolaError::SnapshotNotFound { .. }
            | GondolaError::ManifestNotFound { .. }
            | GondolaError::NoActiveFetch => 404,

            GondolaError::LinkingInProgress { .. }
            | GondolaError::FetchInProgress { .. }
            | GondolaError::SnapshotRunning { .. } => 409,

            GondolaError::UnknownTemplateVariable { .. }
            | GondolaError::ManifestParse(_)
            | GondolaError::EmptyManifest
            | GondolaError::InvalidPattern { .. }
            | GondolaError::InvalidSnapshotName { .. }
            | GondolaError::Validation(_) => 400,

            GondolaError::ManifestFetch { .. } => 502,

            _ => 500,
        }
    }
}
