//! Gondola: bucket catalog with per-fetch SQLite snapshots, manifest-driven
//! artifact matching, and filtered pagination.

pub mod bucket;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod metrics;
pub mod pattern;
pub mod server;
pub mod startup;
pub mod types;
