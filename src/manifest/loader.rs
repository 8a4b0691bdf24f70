//! Manifest fetching and parsing.
//!
//! A manifest is a YAML document naming artifacts the release process
//! expects to find in the bucket. The top level holds an optional
//! `default` destination list and a `mapping` of records. A record only
//! counts while its `expiry` is set to something truthy; expired records
//! are silently dropped. Two record shapes exist:
//!
//! - `path`: the value is a complete destination-path template and
//!   `pretty_name` is just a display label;
//! - `destinations` (or the document default): the record fans out to one
//!   entry per destination, with the template `{destination}/{pretty_name}`.
//!
//! Entry order is the running index over the produced entries, which makes
//! earlier manifest records win when several patterns match one object.

use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::ManifestConfig;
use crate::error::{GondolaError, Result};
use crate::pattern::compile_template;
use crate::types::NewManifestEntry;

/// A fetched and parsed manifest, ready to persist.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub source_url: String,
    pub content_hash: String,
    pub entries: Vec<NewManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    #[serde(default)]
    default: Vec<String>,
    #[serde(default)]
    mapping: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    destinations: Option<Vec<String>>,
    #[serde(default)]
    pretty_name: Option<String>,
    #[serde(default)]
    expiry: serde_yaml::Value,
}

fn truthy(value: &serde_yaml::Value) -> bool {
    match value {
        serde_yaml::Value::Null => false,
        serde_yaml::Value::Bool(b) => *b,
        serde_yaml::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_yaml::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn mapping_records(mapping: &serde_yaml::Value) -> Result<Vec<RawRecord>> {
    let values: Vec<&serde_yaml::Value> = match mapping {
        serde_yaml::Value::Null => Vec::new(),
        // YAML mappings keep document order, which fixes entry priority.
        serde_yaml::Value::Mapping(map) => map.iter().map(|(_, v)| v).collect(),
        serde_yaml::Value::Sequence(seq) => seq.iter().collect(),
        _ => {
            return Err(GondolaError::ManifestParse(
                "mapping must be a map or a sequence of records".into(),
            ))
        }
    };
    values
        .into_iter()
        .map(|value| {
            serde_yaml::from_value(value.clone())
                .map_err(|e| GondolaError::ManifestParse(e.to_string()))
        })
        .collect()
}

/// Parses manifest YAML into ordered entries with compiled patterns.
/// A manifest whose records are all expired (or absent) is an error, not
/// an empty entry set; loading it would silently unlink everything.
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<NewManifestEntry>> {
    let doc: ManifestDocument =
        serde_yaml::from_slice(bytes).map_err(|e| GondolaError::ManifestParse(e.to_string()))?;

    let mut entries: Vec<NewManifestEntry> = Vec::new();
    for record in mapping_records(&doc.mapping)? {
        if !truthy(&record.expiry) {
            continue;
        }
        if let Some(path) = record.path.as_deref() {
            let regex_pattern = compile_template(path)?;
            entries.push(NewManifestEntry {
                order: entries.len() as u32,
                pretty_name: record.pretty_name.clone().unwrap_or_default(),
                destination_path: path.to_string(),
                regex_pattern,
            });
            continue;
        }
        let Some(pretty) = record.pretty_name.as_deref().filter(|p| !p.is_empty()) else {
            continue;
        };
        let destinations = match &record.destinations {
            Some(list) if !list.is_empty() => list,
            _ => &doc.default,
        };
        for destination in destinations {
            let template = format!("{destination}/{pretty}");
            let regex_pattern = compile_template(&template)?;
            entries.push(NewManifestEntry {
                order: entries.len() as u32,
                pretty_name: pretty.to_string(),
                destination_path: template,
                regex_pattern,
            });
        }
    }

    if entries.is_empty() {
        return Err(GondolaError::EmptyManifest);
    }
    debug!(entries = entries.len(), "parsed manifest");
    Ok(entries)
}

/// Fetches manifest documents over HTTP.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    client: reqwest::Client,
}

impl ManifestLoader {
    pub fn new(config: &ManifestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| GondolaError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetches `url`, hashes the raw bytes, and parses the document.
    pub async fn load(&self, url: &str) -> Result<LoadedManifest> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(GondolaError::Validation(format!(
                "manifest URL must be http or https: {url}"
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GondolaError::ManifestFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(GondolaError::ManifestFetch {
                url: url.to_string(),
                reason: format!("unexpected status {}", response.status()),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GondolaError::ManifestFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let content_hash = hex::encode(Sha256::digest(&bytes));
        let entries = parse_manifest(&bytes)?;
        info!(
            url,
            entries = entries.len(),
            content_hash = %content_hash,
            "loaded manifest"
        );
        Ok(LoadedManifest {
            source_url: url.to_string(),
            content_hash,
            entries,
        })
    }
}
