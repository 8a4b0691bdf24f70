//! Filtered, paginated object queries over a snapshot.
//!
//! Filters build one WHERE clause used for both the COUNT and the page
//! select, so `total` always agrees with the rows being paged. Regex
//! groups are bound as parameters and evaluated by the connection's
//! REGEXP operator; everything else is plain SQL over indexed columns.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use super::store::{from_micros, to_micros};
use crate::config::QueryConfig;
use crate::error::{GondolaError, Result};
use crate::pattern::CompiledFilter;
use crate::types::{ObjectPage, QueryFilters, SortOrder, StoredObject};

/// Resolves the requested page and page size against the configured
/// default and ceiling. Pages are 1-based; a zero page or page size is
/// rejected, an oversized page size is clamped.
pub fn resolve_page(
    page: Option<usize>,
    page_size: Option<usize>,
    config: &QueryConfig,
) -> Result<(usize, usize)> {
    let page = page.unwrap_or(1);
    if page == 0 {
        return Err(GondolaError::Validation("page must be at least 1".into()));
    }
    let page_size = page_size.unwrap_or(config.default_page_size);
    if page_size == 0 {
        return Err(GondolaError::Validation(
            "page_size must be at least 1".into(),
        ));
    }
    Ok((page, page_size.min(config.max_page_size)))
}

fn build_where(
    filter: &CompiledFilter,
    filters: &QueryFilters,
) -> (&'static str, String, Vec<Value>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    let mut join = "";

    if !filter.is_empty() {
        let clause = filter
            .group_sources()
            .map(|_| "objects.name REGEXP ?")
            .collect::<Vec<_>>()
            .join(" OR ");
        conditions.push(format!("({clause})"));
        for source in filter.group_sources() {
            params.push(Value::Text(source.to_string()));
        }
    }
    if let Some(cutoff) = filters.created_before {
        conditions.push("objects.time_created < ?".to_string());
        params.push(Value::Integer(to_micros(cutoff)));
    }
    match filters.has_custom_time {
        Some(true) => conditions.push("objects.custom_time IS NOT NULL".to_string()),
        Some(false) => conditions.push("objects.custom_time IS NULL".to_string()),
        None => {}
    }
    match filters.matches_manifest {
        Some(true) => {
            join = " JOIN manifest_entries ON objects.linked_entry = manifest_entries.id";
        }
        Some(false) => conditions.push("objects.linked_entry IS NULL".to_string()),
        None => {}
    }

    let where_sql = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (join, where_sql, params)
}

fn order_clause(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::NameAsc => "objects.name ASC",
        SortOrder::NameDesc => "objects.name DESC",
        SortOrder::TimeCreatedAsc => "objects.time_created ASC, objects.name ASC",
        SortOrder::TimeCreatedDesc => "objects.time_created DESC, objects.name ASC",
    }
}

fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredObject> {
    Ok(StoredObject {
        name: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        updated: row.get::<_, Option<i64>>(2)?.and_then(from_micros),
        time_created: row.get::<_, Option<i64>>(3)?.and_then(from_micros),
        custom_time: row.get::<_, Option<i64>>(4)?.and_then(from_micros),
        linked_entry: row.get(5)?,
    })
}

/// Runs a filtered page query. `page` and `page_size` must already be
/// resolved via [`resolve_page`]. A page past the last row returns empty
/// items with the correct total.
pub fn run_query(
    conn: &Connection,
    filter: &CompiledFilter,
    filters: &QueryFilters,
    sort: SortOrder,
    page: usize,
    page_size: usize,
) -> Result<ObjectPage> {
    let (join, where_sql, params) = build_where(filter, filters);

    let count_sql = format!("SELECT COUNT(*) FROM objects{join}{where_sql}");
    let total: i64 = conn.query_row(&count_sql, params_from_iter(params.iter()), |r| r.get(0))?;

    let offset = (page as u64 - 1).saturating_mul(page_size as u64);
    let select_sql = format!(
        "SELECT objects.name, objects.size, objects.updated, objects.time_created,
                objects.custom_time, objects.linked_entry
         FROM objects{join}{where_sql}
         ORDER BY {}
         LIMIT ? OFFSET ?",
        order_clause(sort)
    );
    let mut page_params = params;
    page_params.push(Value::Integer(page_size as i64));
    page_params.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

    let mut stmt = conn.prepare(&select_sql)?;
    let items = stmt
        .query_map(params_from_iter(page_params.iter()), row_to_object)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ObjectPage {
        items,
        total: total as u64,
        page,
        page_size,
    })
}

/// Collects every filtered object name, ordered by name ascending.
/// Backs the name-list download, which is never paginated.
pub fn filtered_names(
    conn: &Connection,
    filter: &CompiledFilter,
    filters: &QueryFilters,
) -> Result<Vec<String>> {
    let (join, where_sql, params) = build_where(filter, filters);
    let sql =
        format!("SELECT objects.name FROM objects{join}{where_sql} ORDER BY objects.name ASC");
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map(params_from_iter(params.iter()), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}
