use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use leadflow_core::domain::order::OrderId;
use leadflow_core::domain::quota::{QuotaCaps, QuotaLedgerEntry, QuotaSlot, WeekKey};

use super::{parse_u32, ts, RepositoryError};

const LEDGER_COLUMNS: &str =
    "order_id, week_key, delivered_count, lb_delivered_count, quota_cap, lb_cap";

/// Takes one unit of `slot` capacity for `order_id` in `week`.
///
/// The check and the increment are one conditional `UPDATE`, so two writers
/// can never both take the last unit. Returns `false` when the slot is full.
/// The stored caps are refreshed to `caps` on every successful take.
pub async fn try_consume(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    week: &WeekKey,
    caps: QuotaCaps,
    slot: QuotaSlot,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    sqlx::query(
        "INSERT OR IGNORE INTO quota_ledger (
            order_id, week_key, delivered_count, lb_delivered_count, quota_cap, lb_cap, updated_at
         ) VALUES (?, ?, 0, 0, ?, ?, ?)",
    )
    .bind(&order_id.0)
    .bind(&week.0)
    .bind(i64::from(caps.quota))
    .bind(i64::from(caps.lb_cap))
    .bind(ts(now))
    .execute(&mut *conn)
    .await?;

    let result = match slot {
        QuotaSlot::Regular => {
            sqlx::query(
                "UPDATE quota_ledger SET
                    delivered_count = delivered_count + 1,
                    quota_cap = ?,
                    lb_cap = ?,
                    updated_at = ?
                 WHERE order_id = ? AND week_key = ?
                   AND delivered_count < ?
                   AND delivered_count - lb_delivered_count < ?",
            )
            .bind(i64::from(caps.quota))
            .bind(i64::from(caps.lb_cap))
            .bind(ts(now))
            .bind(&order_id.0)
            .bind(&week.0)
            .bind(i64::from(caps.quota))
            .bind(i64::from(caps.regular_cap()))
            .execute(&mut *conn)
            .await?
        }
        QuotaSlot::LoadBalance => {
            sqlx::query(
                "UPDATE quota_ledger SET
                    delivered_count = delivered_count + 1,
                    lb_delivered_count = lb_delivered_count + 1,
                    quota_cap = ?,
                    lb_cap = ?,
                    updated_at = ?
                 WHERE order_id = ? AND week_key = ?
                   AND delivered_count < ?
                   AND lb_delivered_count < ?",
            )
            .bind(i64::from(caps.quota))
            .bind(i64::from(caps.lb_cap))
            .bind(ts(now))
            .bind(&order_id.0)
            .bind(&week.0)
            .bind(i64::from(caps.quota))
            .bind(i64::from(caps.lb_cap))
            .execute(&mut *conn)
            .await?
        }
    };

    Ok(result.rows_affected() == 1)
}

/// Gives one unit of `slot` capacity back. Never drives a counter below zero.
pub async fn release(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    week: &WeekKey,
    slot: QuotaSlot,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let sql = match slot {
        QuotaSlot::Regular => {
            "UPDATE quota_ledger SET
                delivered_count = delivered_count - 1,
                updated_at = ?
             WHERE order_id = ? AND week_key = ?
               AND delivered_count - lb_delivered_count > 0"
        }
        QuotaSlot::LoadBalance => {
            "UPDATE quota_ledger SET
                delivered_count = delivered_count - 1,
                lb_delivered_count = lb_delivered_count - 1,
                updated_at = ?
             WHERE order_id = ? AND week_key = ?
               AND lb_delivered_count > 0"
        }
    };

    let result = sqlx::query(sql)
        .bind(ts(now))
        .bind(&order_id.0)
        .bind(&week.0)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn find(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    week: &WeekKey,
) -> Result<Option<QuotaLedgerEntry>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {LEDGER_COLUMNS} FROM quota_ledger WHERE order_id = ? AND week_key = ?"
    ))
    .bind(&order_id.0)
    .bind(&week.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(entry_from_row).transpose()
}

/// All ledger rows of `week`, keyed by order.
pub async fn list_for_week(
    conn: &mut SqliteConnection,
    week: &WeekKey,
) -> Result<HashMap<OrderId, QuotaLedgerEntry>, RepositoryError> {
    let rows = sqlx::query(&format!("SELECT {LEDGER_COLUMNS} FROM quota_ledger WHERE week_key = ?"))
        .bind(&week.0)
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter()
        .map(|row| entry_from_row(row).map(|entry| (entry.order_id.clone(), entry)))
        .collect()
}

/// Most recent weeks first.
pub async fn history(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    weeks: u32,
) -> Result<Vec<QuotaLedgerEntry>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {LEDGER_COLUMNS} FROM quota_ledger WHERE order_id = ? ORDER BY week_key DESC LIMIT ?"
    ))
    .bind(&order_id.0)
    .bind(i64::from(weeks.max(1)))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(entry_from_row).collect()
}

pub async fn total_delivered(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
) -> Result<u64, RepositoryError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(delivered_count), 0) FROM quota_ledger WHERE order_id = ?",
    )
    .bind(&order_id.0)
    .fetch_one(&mut *conn)
    .await?;

    u64::try_from(total)
        .map_err(|_| RepositoryError::Decode(format!("negative delivered total: {total}")))
}

fn entry_from_row(row: SqliteRow) -> Result<QuotaLedgerEntry, RepositoryError> {
    Ok(QuotaLedgerEntry {
        order_id: OrderId(row.try_get("order_id")?),
        week_key: WeekKey(row.try_get("week_key")?),
        delivered_count: parse_u32("delivered_count", row.try_get("delivered_count")?)?,
        lb_delivered_count: parse_u32("lb_delivered_count", row.try_get("lb_delivered_count")?)?,
        quota_cap: parse_u32("quota_cap", row.try_get("quota_cap")?)?,
        lb_cap: parse_u32("lb_cap", row.try_get("lb_cap")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use leadflow_core::domain::quota::{QuotaCaps, QuotaSlot, WeekKey};

    use super::{find, history, list_for_week, release, total_delivered, try_consume};
    use crate::repositories::orders::{self, fixtures::order};
    use crate::repositories::testing::{parse_ts, setup_pool};

    fn week(key: &str) -> WeekKey {
        WeekKey(key.to_string())
    }

    #[tokio::test]
    async fn regular_capacity_excludes_the_lb_reserve() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 5, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let caps = QuotaCaps::for_quota(5, Decimal::new(20, 2));
        assert_eq!(caps.lb_cap, 1);

        let mut taken = 0;
        for _ in 0..6 {
            if try_consume(&mut conn, &order.id, &week("2026-10-12"), caps, QuotaSlot::Regular, now)
                .await
                .expect("consume")
            {
                taken += 1;
            }
        }
        assert_eq!(taken, 4);

        assert!(try_consume(&mut conn, &order.id, &week("2026-10-12"), caps, QuotaSlot::LoadBalance, now)
            .await
            .expect("lb consume"));
        assert!(!try_consume(&mut conn, &order.id, &week("2026-10-12"), caps, QuotaSlot::LoadBalance, now)
            .await
            .expect("lb consume"));

        let entry = find(&mut conn, &order.id, &week("2026-10-12")).await.expect("find").expect("row");
        assert_eq!(entry.delivered_count, 5);
        assert_eq!(entry.lb_delivered_count, 1);
    }

    #[tokio::test]
    async fn release_returns_capacity_without_going_negative() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 2, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let caps = QuotaCaps::for_quota(2, Decimal::ZERO);
        let key = week("2026-10-12");

        assert!(try_consume(&mut conn, &order.id, &key, caps, QuotaSlot::Regular, now).await.expect("take"));
        assert!(release(&mut conn, &order.id, &key, QuotaSlot::Regular, now).await.expect("release"));
        assert!(!release(&mut conn, &order.id, &key, QuotaSlot::Regular, now).await.expect("release"));
        assert!(!release(&mut conn, &order.id, &key, QuotaSlot::LoadBalance, now).await.expect("release"));

        let entry = find(&mut conn, &order.id, &key).await.expect("find").expect("row");
        assert_eq!(entry.delivered_count, 0);
    }

    #[tokio::test]
    async fn lowered_quota_stops_new_takes() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 3, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let key = week("2026-10-12");
        let caps = QuotaCaps::for_quota(3, Decimal::ZERO);
        for _ in 0..2 {
            try_consume(&mut conn, &order.id, &key, caps, QuotaSlot::Regular, now).await.expect("take");
        }

        let lowered = QuotaCaps::for_quota(2, Decimal::ZERO);
        assert!(!try_consume(&mut conn, &order.id, &key, lowered, QuotaSlot::Regular, now)
            .await
            .expect("take"));
    }

    #[tokio::test]
    async fn weekly_listing_and_history() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 3, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let caps = QuotaCaps::for_quota(3, Decimal::ZERO);
        for key in ["2026-09-28", "2026-10-05", "2026-10-12"] {
            try_consume(&mut conn, &order.id, &week(key), caps, QuotaSlot::Regular, now).await.expect("take");
        }

        let current = list_for_week(&mut conn, &week("2026-10-12")).await.expect("week");
        assert_eq!(current.get(&order.id).map(|entry| entry.delivered_count), Some(1));

        let recent = history(&mut conn, &order.id, 2).await.expect("history");
        let keys: Vec<&str> = recent.iter().map(|entry| entry.week_key.0.as_str()).collect();
        assert_eq!(keys, vec!["2026-10-12", "2026-10-05"]);
        assert_eq!(total_delivered(&mut conn, &order.id).await.expect("total"), 3);
    }
}
