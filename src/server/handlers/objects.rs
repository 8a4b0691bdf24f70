use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::instrument;

use crate::catalog::query::resolve_page;
use crate::pattern::compile_patterns;
use crate::server::AppState;
use crate::types::{ObjectPage, QueryFilters, SortOrder};

use super::ApiError;

/// Filter set shared by the query and download bodies. Categories compose
/// with AND; the regex patterns OR with each other.
#[derive(Debug, Default, Deserialize)]
pub struct FilterBody {
    #[serde(default)]
    pub regex_filters: Vec<String>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_custom_time: Option<bool>,
    #[serde(default)]
    pub matches_manifest: Option<bool>,
}

impl FilterBody {
    fn into_filters(self) -> (Vec<String>, QueryFilters) {
        let filters = QueryFilters {
            patterns: self.regex_filters.clone(),
            created_before: self.created_before,
            has_custom_time: self.has_custom_time,
            matches_manifest: self.matches_manifest,
        };
        (self.regex_filters, filters)
    }
}

/// Request body for a filtered object page.
#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(flatten)]
    pub filters: FilterBody,
    #[serde(default)]
    pub sort: Option<SortOrder>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// Serves one filtered, sorted page of a snapshot's objects. Any invalid
/// pattern fails the whole request before a row is scanned.
#[instrument(skip(state, req), fields(snapshot = %snapshot, patterns = req.filters.regex_filters.len()))]
pub async fn query_objects(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ObjectPage>, ApiError> {
    let timer = crate::metrics::QUERY_DURATION.start_timer();
    let (page, page_size) = resolve_page(req.page, req.page_size, &state.config.query)?;
    let (patterns, filters) = req.filters.into_filters();
    let compiled = compile_patterns(
        &patterns,
        state.config.manifest.merge_threshold,
        state.config.manifest.max_group_len,
    )?;

    let page = state
        .catalog
        .query_objects(
            &snapshot,
            compiled,
            filters,
            req.sort.unwrap_or_default(),
            page,
            page_size,
        )
        .await?;
    crate::metrics::QUERIES_TOTAL.inc();
    timer.observe_duration();
    Ok(Json(page))
}

/// Exports the filtered object names of a snapshot as a plain-text
/// attachment, one name per line, ordered by name.
#[instrument(skip(state, req), fields(snapshot = %snapshot))]
pub async fn download_objects(
    State(state): State<AppState>,
    Path(snapshot): Path<String>,
    Json(req): Json<FilterBody>,
) -> Result<Response, ApiError> {
    let (patterns, filters) = req.into_filters();
    let compiled = compile_patterns(
        &patterns,
        state.config.manifest.merge_threshold,
        state.config.manifest.max_group_len,
    )?;

    let names = state.catalog.object_names(&snapshot, compiled, filters).await?;
    let mut body = names.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    let disposition = format!("attachment; filename=\"{snapshot}_files.txt\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
