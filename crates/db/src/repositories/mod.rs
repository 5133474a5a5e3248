//! SQLite persistence for the routing engine.
//!
//! Repository functions take a `&mut SqliteConnection` so the engine can run
//! several of them inside one `WriteTx`; plain reads acquire a pooled
//! connection and pass it the same way.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod deliveries;
pub mod engine_state;
pub mod events;
pub mod leads;
pub mod orders;
pub mod quota;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Fixed-width RFC 3339 so stored timestamps order correctly as text.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_i32(column: &str, value: i64) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `{column}` (expected i32): {value}"))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_string_list(column: &str, value: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("invalid json list in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn encode_string_list(values: &[String]) -> String {
    serde_json::Value::from(values.to_vec()).to_string()
}

pub(crate) fn page(limit: Option<u32>, offset: Option<u32>) -> (i64, i64) {
    (i64::from(limit.unwrap_or(100).clamp(1, 1_000)), i64::from(offset.unwrap_or(0)))
}


#[cfg(test)]
mod tests {
    use super::{encode_string_list, parse_string_list, parse_timestamp, ts};

    #[test]
    fn stored_timestamps_sort_as_text() {
        let early = parse_timestamp("t", "2026-10-14T09:00:00Z".to_string()).expect("early");
        let late = parse_timestamp("t", "2026-10-14T09:00:00.5Z".to_string()).expect("late");
        assert!(ts(early) < ts(late));
        assert_eq!(ts(early), "2026-10-14T09:00:00.000000Z");
    }

    #[test]
    fn string_lists_use_json_arrays() {
        let encoded = encode_string_list(&["75".to_string(), "2A".to_string()]);
        assert_eq!(encoded, r#"["75","2A"]"#);
        assert_eq!(parse_string_list("departments_json", &encoded).expect("decode").len(), 2);
        assert!(parse_string_list("departments_json", "75,2A").is_err());
    }
}
