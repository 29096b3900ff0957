use carelink_core::errors::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::DbError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, DbError> {
    row.get(idx).map_err(|e| corrupt(table, column, e.to_string()))
}

/// Parse a JSON string-array column.
pub fn parse_string_list(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<Vec<String>, DbError> {
    serde_json::from_str(raw).map_err(|e| corrupt(table, column, format!("invalid JSON: {e}")))
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, DbError> {
    raw.parse()
        .map_err(|_| corrupt(table, column, format!("unknown variant: {raw}")))
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(table, column, format!("invalid timestamp {raw}: {e}")))
}

/// Fixed-width UTC form so that text ordering matches time ordering.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn corrupt(table: &'static str, column: &'static str, detail: String) -> DbError {
    DbError::Store(StoreError::CorruptRow {
        table,
        column,
        detail,
    })
}
