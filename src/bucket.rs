//! Bucket listing client.
//!
//! Wraps the `object_store` crate so the fetch runner can stream a
//! bucket listing from GCS, S3-compatible stores, or a local directory
//! (used by the test suite) through one interface.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectMeta, ObjectStore};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{GondolaError, Result};
use crate::types::ObjectRecord;

#[derive(Clone)]
pub struct BucketClient {
    inner: Arc<dyn ObjectStore>,
    bucket: String,
}

impl BucketClient {
    /// Create a client from configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.backend {
            StorageBackend::Gcs => {
                let mut builder =
                    GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
                if let Some(ref path) = config.gcs_service_account_path {
                    builder = builder.with_service_account_path(path);
                }
                Arc::new(builder.build().map_err(|e| {
                    GondolaError::Config(format!("failed to build GCS store: {e}"))
                })?)
            }
            StorageBackend::S3 => {
                let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);
                if let Some(ref region) = config.s3_region {
                    builder = builder.with_region(region);
                }
                if let Some(ref endpoint) = config.s3_endpoint {
                    if !endpoint.is_empty() {
                        builder = builder.with_endpoint(endpoint);
                    }
                }
                if let Some(ref key_id) = config.s3_access_key_id {
                    builder = builder.with_access_key_id(key_id);
                }
                if let Some(ref secret) = config.s3_secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                if config.s3_allow_http {
                    builder = builder.with_allow_http(true);
                }
                let client_options = ClientOptions::new()
                    .with_timeout(std::time::Duration::from_secs(30))
                    .with_connect_timeout(std::time::Duration::from_secs(10));
                builder = builder.with_client_options(client_options);
                Arc::new(builder.build().map_err(|e| {
                    GondolaError::Config(format!("failed to build S3 store: {e}"))
                })?)
            }
            StorageBackend::Local => {
                let path = std::path::Path::new(&config.bucket);
                if !path.exists() {
                    std::fs::create_dir_all(path)?;
                }
                Arc::new(
                    object_store::local::LocalFileSystem::new_with_prefix(path).map_err(|e| {
                        GondolaError::Config(format!("failed to build local store: {e}"))
                    })?,
                )
            }
        };
        Ok(Self {
            inner: store,
            bucket: config.bucket.clone(),
        })
    }

    /// Create a client directly from an ObjectStore instance (for testing).
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            inner: store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Streams the bucket listing under `prefix` as object records.
    pub fn list(&self, prefix: Option<&str>) -> Result<BoxStream<'_, Result<ObjectRecord>>> {
        let prefix_path = prefix
            .filter(|p| !p.is_empty())
            .map(Path::parse)
            .transpose()?;
        let stream = self
            .inner
            .list(prefix_path.as_ref())
            .map(|res| res.map(record_from_meta).map_err(GondolaError::from))
            .boxed();
        Ok(stream)
    }
}

impl std::fmt::Debug for BucketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketClient")
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Listings expose one modification instant; it fills both timestamp
/// columns. Custom-time metadata is not part of list responses.
fn record_from_meta(meta: ObjectMeta) -> ObjectRecord {
    ObjectRecord {
        name: meta.location.to_string(),
        size: meta.size as u64,
        updated: Some(meta.last_modified),
        time_created: Some(meta.last_modified),
        custom_time: None,
    }
}
