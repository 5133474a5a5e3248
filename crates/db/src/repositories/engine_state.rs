use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use super::{ts, RepositoryError};

pub const CURRENT_WEEK_KEY: &str = "quota.current_week";

pub async fn get(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>, RepositoryError> {
    let row = sqlx::query("SELECT value FROM engine_state WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|row| row.try_get("value")).transpose()?)
}

/// Compare-and-set on one state key.
///
/// `expected = None` means the key must not exist yet. Returns `true` for the
/// single caller whose expectation matched.
pub async fn compare_and_set(
    conn: &mut SqliteConnection,
    key: &str,
    expected: Option<&str>,
    value: &str,
    at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = match expected {
        None => {
            sqlx::query("INSERT OR IGNORE INTO engine_state (key, value, updated_at) VALUES (?, ?, ?)")
                .bind(key)
                .bind(value)
                .bind(ts(at))
                .execute(&mut *conn)
                .await?
        }
        Some(expected) => {
            sqlx::query("UPDATE engine_state SET value = ?, updated_at = ? WHERE key = ? AND value = ?")
                .bind(value)
                .bind(ts(at))
                .bind(key)
                .bind(expected)
                .execute(&mut *conn)
                .await?
        }
    };

    Ok(result.rows_affected() == 1)
}
