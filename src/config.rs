use crate::error::{GondolaError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_max_request_body_mb")]
    pub max_request_body_mb: usize,
}

/// Which object-store backend the bucket listing talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs,
    S3,
    Local,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Gcs => write!(f, "gcs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = GondolaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gcs" => Ok(StorageBackend::Gcs),
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            other => Err(GondolaError::Config(format!(
                "unknown storage backend: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Bucket name, or the root directory for the local backend.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Listing prefix applied to every fetch unless the request overrides it.
    #[serde(default)]
    pub prefix: Option<String>,

    // GCS
    #[serde(default)]
    pub gcs_service_account_path: Option<String>,

    // S3 / MinIO / R2
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    #[serde(default)]
    pub s3_access_key_id: Option<String>,
    #[serde(default)]
    pub s3_secret_access_key: Option<String>,
    #[serde(default)]
    pub s3_allow_http: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory holding the per-fetch snapshot databases and the fetch lease.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Objects per insert batch and per link chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fetch lease time-to-live; an older lease may be taken over.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Timeout for fetching a manifest document over HTTP.
    #[serde(default = "default_manifest_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Pattern count at which the optimizer switches to merged groups.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,
    /// Source-length ceiling for one merged alternation group.
    #[serde(default = "default_max_group_len")]
    pub max_group_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    std::env::var("GONDOLA_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}
fn default_port() -> u16 {
    std::env::var("GONDOLA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}
fn default_request_timeout() -> u64 {
    std::env::var("GONDOLA_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}
fn default_shutdown_timeout_secs() -> u64 {
    std::env::var("GONDOLA_SHUTDOWN_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5)
}
fn default_max_request_body_mb() -> usize {
    std::env::var("GONDOLA_MAX_REQUEST_BODY_MB")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10)
}
fn default_backend() -> StorageBackend {
    std::env::var("STORAGE_BACKEND")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(StorageBackend::Gcs)
}
fn default_bucket() -> String {
    std::env::var("BUCKET_NAME").unwrap_or_else(|_| "gondola".to_string())
}
fn default_data_dir() -> PathBuf {
    std::env::var("GONDOLA_DATA_DIR")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/fetches"))
}
fn default_batch_size() -> usize {
    std::env::var("GONDOLA_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000)
}
fn default_lease_ttl_secs() -> u64 {
    std::env::var("GONDOLA_LEASE_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4 * 3600)
}
fn default_manifest_fetch_timeout() -> u64 {
    std::env::var("GONDOLA_MANIFEST_FETCH_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}
fn default_merge_threshold() -> usize {
    std::env::var("GONDOLA_MERGE_THRESHOLD")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20)
}
fn default_max_group_len() -> usize {
    4096
}
fn default_page_size() -> usize {
    std::env::var("GONDOLA_DEFAULT_PAGE_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(200)
}
fn default_max_page_size() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    std::env::var("GONDOLA_LOG_FORMAT").unwrap_or_else(|_| "json".to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_request_body_mb: default_max_request_body_mb(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: default_bucket(),
            prefix: std::env::var("BUCKET_PREFIX").ok().filter(|s| !s.is_empty()),
            gcs_service_account_path: std::env::var("GCS_SERVICE_ACCOUNT_PATH")
                .ok()
                .filter(|s| !s.is_empty()),
            s3_region: std::env::var("AWS_REGION").ok(),
            s3_endpoint: std::env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            s3_access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            s3_secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            s3_allow_http: std::env::var("S3_ALLOW_HTTP")
                .ok()
                .map(|v| v == "true")
                .unwrap_or(false),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_manifest_fetch_timeout(),
            merge_threshold: default_merge_threshold(),
            max_group_len: default_max_group_len(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults.
    /// After loading, env var overrides are applied so that:
    /// env var > TOML file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|e| {
                    GondolaError::Config(format!("failed to read config file {p}: {e}"))
                })?;
                toml::from_str(&content)
                    .map_err(|e| GondolaError::Config(format!("failed to parse config: {e}")))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of file/default values.
    /// This ensures env vars always take priority over TOML settings.
    fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(v) = std::env::var("GONDOLA_HOST") {
            self.server.host = v;
        }
        if let Some(v) = std::env::var("GONDOLA_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.port = v;
        }
        if let Some(v) = std::env::var("GONDOLA_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.request_timeout_secs = v;
        }
        if let Some(v) = std::env::var("GONDOLA_SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.shutdown_timeout_secs = v;
        }
        if let Some(v) = std::env::var("GONDOLA_MAX_REQUEST_BODY_MB")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.server.max_request_body_mb = v;
        }

        // Storage
        if let Some(v) = std::env::var("STORAGE_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.storage.backend = v;
        }
        if let Ok(v) = std::env::var("BUCKET_NAME") {
            self.storage.bucket = v;
        }
        if let Some(v) = std::env::var("BUCKET_PREFIX").ok().filter(|s| !s.is_empty()) {
            self.storage.prefix = Some(v);
        }
        if let Some(v) = std::env::var("GCS_SERVICE_ACCOUNT_PATH")
            .ok()
            .filter(|s| !s.is_empty())
        {
            self.storage.gcs_service_account_path = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_REGION") {
            self.storage.s3_region = Some(v);
        }
        if let Some(v) = std::env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()) {
            self.storage.s3_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_ACCESS_KEY_ID") {
            self.storage.s3_access_key_id = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            self.storage.s3_secret_access_key = Some(v);
        }
        if let Ok(v) = std::env::var("S3_ALLOW_HTTP") {
            self.storage.s3_allow_http = v == "true";
        }

        // Catalog
        if let Ok(v) = std::env::var("GONDOLA_DATA_DIR") {
            self.catalog.data_dir = PathBuf::from(v);
        }
        if let Some(v) = std::env::var("GONDOLA_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.catalog.batch_size = v;
        }
        if let Some(v) = std::env::var("GONDOLA_LEASE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.catalog.lease_ttl_secs = v;
        }

        // Manifest
        if let Some(v) = std::env::var("GONDOLA_MANIFEST_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.manifest.fetch_timeout_secs = v;
        }
        if let Some(v) = std::env::var("GONDOLA_MERGE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.manifest.merge_threshold = v;
        }

        // Query
        if let Some(v) = std::env::var("GONDOLA_DEFAULT_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.query.default_page_size = v;
        }

        // Logging
        if let Ok(v) = std::env::var("GONDOLA_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.catalog.batch_size == 0 {
            return Err(GondolaError::Config("batch_size must be at least 1".into()));
        }
        if self.query.default_page_size == 0 || self.query.max_page_size == 0 {
            return Err(GondolaError::Config("page sizes must be at least 1".into()));
        }
        if self.query.default_page_size > self.query.max_page_size {
            return Err(GondolaError::Config(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.query.default_page_size, self.query.max_page_size
            )));
        }
        if self.manifest.max_group_len == 0 {
            return Err(GondolaError::Config(
                "max_group_len must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
