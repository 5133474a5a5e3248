use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use leadflow_core::dedup::PriorLead;
use leadflow_core::domain::delivery::DeliveryId;
use leadflow_core::domain::lead::{Lead, LeadFilter, LeadId, LeadPayload, LeadStatus};
use leadflow_core::domain::order::{EntityCode, OrderId};

use super::{page, parse_timestamp, ts, RepositoryError};

const LEAD_COLUMNS: &str = "id,
    phone_raw,
    phone,
    name,
    department,
    product,
    source,
    session_id,
    entity,
    entity_locked,
    lb_eligible,
    status,
    status_reason,
    duplicate_of,
    current_order_id,
    current_delivery_id,
    submitted_at,
    updated_at";

pub async fn insert(conn: &mut SqliteConnection, lead: &Lead) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO lead (
            id,
            phone_raw,
            phone,
            name,
            department,
            product,
            source,
            session_id,
            entity,
            entity_locked,
            lb_eligible,
            status,
            status_reason,
            duplicate_of,
            current_order_id,
            current_delivery_id,
            submitted_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&lead.id.0)
    .bind(&lead.payload.phone_raw)
    .bind(lead.phone.as_deref())
    .bind(&lead.payload.name)
    .bind(&lead.payload.department)
    .bind(&lead.payload.product)
    .bind(&lead.payload.source)
    .bind(lead.payload.session_id.as_deref())
    .bind(lead.entity.as_ref().map(|entity| entity.0.as_str()))
    .bind(lead.entity_locked)
    .bind(lead.lb_eligible)
    .bind(lead.status.as_str())
    .bind(lead.status_reason.as_deref())
    .bind(lead.duplicate_of.as_ref().map(|id| id.0.as_str()))
    .bind(lead.current_order_id.as_ref().map(|id| id.0.as_str()))
    .bind(lead.current_delivery_id.as_ref().map(|id| id.0.as_str()))
    .bind(ts(lead.submitted_at))
    .bind(ts(lead.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Persists the mutable routing state. The payload is immutable and never rewritten.
pub async fn save_state(conn: &mut SqliteConnection, lead: &Lead) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE lead SET
            entity = ?,
            entity_locked = ?,
            status = ?,
            status_reason = ?,
            current_order_id = ?,
            current_delivery_id = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(lead.entity.as_ref().map(|entity| entity.0.as_str()))
    .bind(lead.entity_locked)
    .bind(lead.status.as_str())
    .bind(lead.status_reason.as_deref())
    .bind(lead.current_order_id.as_ref().map(|id| id.0.as_str()))
    .bind(lead.current_delivery_id.as_ref().map(|id| id.0.as_str()))
    .bind(ts(lead.updated_at))
    .bind(&lead.id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(RepositoryError::Database(sqlx::Error::RowNotFound));
    }
    Ok(())
}

pub async fn find(conn: &mut SqliteConnection, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(lead_from_row).transpose()
}

pub async fn find_many(
    conn: &mut SqliteConnection,
    ids: &[LeadId],
) -> Result<Vec<Lead>, RepositoryError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {LEAD_COLUMNS} FROM lead WHERE id IN ("));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.0.clone());
    }
    builder.push(") ORDER BY id ASC");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.into_iter().map(lead_from_row).collect()
}

/// Leads with this canonical phone submitted at or after `since`, newest first.
pub async fn find_priors_by_phone(
    conn: &mut SqliteConnection,
    phone: &str,
    since: DateTime<Utc>,
) -> Result<Vec<PriorLead>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, department, status, session_id, submitted_at
         FROM lead
         WHERE phone = ? AND submitted_at >= ?
         ORDER BY submitted_at DESC, id DESC",
    )
    .bind(phone)
    .bind(ts(since))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(PriorLead {
                id: LeadId(row.try_get("id")?),
                department: row.try_get("department")?,
                status: parse_status(row.try_get::<String, _>("status")?)?,
                session_id: row.try_get("session_id")?,
                submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
            })
        })
        .collect()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &LeadFilter,
) -> Result<Vec<Lead>, RepositoryError> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {LEAD_COLUMNS} FROM lead WHERE 1=1"));

    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(entity) = &filter.entity {
        builder.push(" AND entity = ").push_bind(entity.0.clone());
    }
    if let Some(department) = &filter.department {
        builder.push(" AND department = ").push_bind(department.to_ascii_uppercase());
    }
    if let Some(product) = &filter.product {
        builder.push(" AND product = ").push_bind(product.to_ascii_lowercase());
    }
    if let Some(phone) = &filter.phone {
        builder.push(" AND phone = ").push_bind(phone.clone());
    }
    if let Some(order_id) = &filter.order_id {
        builder.push(" AND current_order_id = ").push_bind(order_id.0.clone());
    }
    if let Some(after) = filter.submitted_after {
        builder.push(" AND submitted_at >= ").push_bind(ts(after));
    }
    if let Some(before) = filter.submitted_before {
        builder.push(" AND submitted_at < ").push_bind(ts(before));
    }

    let (limit, offset) = page(filter.limit, filter.offset);
    builder.push(" ORDER BY submitted_at DESC, id DESC LIMIT ").push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.into_iter().map(lead_from_row).collect()
}

/// Position in the routable queue; the next page starts strictly after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueCursor {
    pub submitted_at: DateTime<Utc>,
    pub id: LeadId,
}

/// Parked or released leads waiting for routing, oldest first.
pub async fn list_routable(
    conn: &mut SqliteConnection,
    entity: Option<&EntityCode>,
    after: Option<&QueueCursor>,
    limit: u32,
) -> Result<Vec<QueueCursor>, RepositoryError> {
    let mut builder =
        QueryBuilder::<Sqlite>::new("SELECT id, submitted_at FROM lead WHERE status IN (");
    let mut separated = builder.separated(", ");
    for status in
        [LeadStatus::New, LeadStatus::NoOpenOrders, LeadStatus::HoldSource, LeadStatus::PendingConfig]
    {
        separated.push_bind(status.as_str());
    }
    builder.push(")");
    if let Some(entity) = entity {
        builder.push(" AND entity = ").push_bind(entity.0.clone());
    }
    if let Some(cursor) = after {
        builder
            .push(" AND (submitted_at > ")
            .push_bind(ts(cursor.submitted_at))
            .push(" OR (submitted_at = ")
            .push_bind(ts(cursor.submitted_at))
            .push(" AND id > ")
            .push_bind(cursor.id.0.clone())
            .push("))");
    }
    builder.push(" ORDER BY submitted_at ASC, id ASC LIMIT ").push_bind(i64::from(limit.max(1)));

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.into_iter()
        .map(|row| {
            Ok(QueueCursor {
                id: LeadId(row.try_get("id")?),
                submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
            })
        })
        .collect()
}

fn parse_status(raw: String) -> Result<LeadStatus, RepositoryError> {
    LeadStatus::parse(&raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead status `{raw}`")))
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        payload: LeadPayload {
            phone_raw: row.try_get("phone_raw")?,
            name: row.try_get("name")?,
            department: row.try_get("department")?,
            product: row.try_get("product")?,
            source: row.try_get("source")?,
            session_id: row.try_get("session_id")?,
        },
        phone: row.try_get("phone")?,
        entity: row.try_get::<Option<String>, _>("entity")?.map(EntityCode),
        entity_locked: row.try_get("entity_locked")?,
        lb_eligible: row.try_get("lb_eligible")?,
        status: parse_status(row.try_get::<String, _>("status")?)?,
        status_reason: row.try_get("status_reason")?,
        duplicate_of: row.try_get::<Option<String>, _>("duplicate_of")?.map(LeadId),
        current_order_id: row.try_get::<Option<String>, _>("current_order_id")?.map(OrderId),
        current_delivery_id: row
            .try_get::<Option<String>, _>("current_delivery_id")?
            .map(DeliveryId),
        submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}


#[cfg(test)]
mod tests {
    use leadflow_core::domain::lead::{LeadFilter, LeadId, LeadStatus};
    use leadflow_core::domain::order::EntityCode;

    use super::fixtures::lead;
    use super::{find, find_many, find_priors_by_phone, insert, list, list_routable, save_state};
    use crate::repositories::testing::{parse_ts, setup_pool};

    #[tokio::test]
    async fn insert_find_and_save_state_round_trip() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let mut stored = lead("L-1", "0612345678", LeadStatus::New, parse_ts("2026-10-14T09:00:00Z"));
        stored.payload.session_id = Some("sess-1".to_string());
        insert(&mut conn, &stored).await.expect("insert lead");

        assert_eq!(find(&mut conn, &stored.id).await.expect("find"), Some(stored.clone()));

        stored.status = LeadStatus::NoOpenOrders;
        stored.status_reason = Some("quota_exhausted".to_string());
        stored.updated_at = parse_ts("2026-10-14T09:05:00Z");
        save_state(&mut conn, &stored).await.expect("save state");

        let reloaded = find(&mut conn, &stored.id).await.expect("find").expect("exists");
        assert_eq!(reloaded.status, LeadStatus::NoOpenOrders);
        assert_eq!(reloaded.status_reason.as_deref(), Some("quota_exhausted"));
    }

    #[tokio::test]
    async fn save_state_on_unknown_lead_fails() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let ghost = lead("L-ghost", "0612345678", LeadStatus::New, parse_ts("2026-10-14T09:00:00Z"));
        assert!(save_state(&mut conn, &ghost).await.is_err());
    }

    #[tokio::test]
    async fn priors_are_bounded_by_phone_and_window() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        for (id, phone, at) in [
            ("L-old", "0612345678", "2026-08-01T09:00:00Z"),
            ("L-1", "0612345678", "2026-10-10T09:00:00Z"),
            ("L-2", "0612345678", "2026-10-12T09:00:00Z"),
            ("L-other", "0699999999", "2026-10-12T09:00:00Z"),
        ] {
            insert(&mut conn, &lead(id, phone, LeadStatus::Routed, parse_ts(at))).await.expect("insert");
        }

        let priors = find_priors_by_phone(&mut conn, "0612345678", parse_ts("2026-09-14T00:00:00Z"))
            .await
            .expect("priors");
        let ids: Vec<&str> = priors.iter().map(|prior| prior.id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-2", "L-1"]);
    }

    #[tokio::test]
    async fn list_filters_and_routable_queue() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert(&mut conn, &lead("L-1", "0611111111", LeadStatus::Routed, parse_ts("2026-10-14T09:00:00Z")))
            .await
            .expect("insert");
        insert(&mut conn, &lead("L-2", "0622222222", LeadStatus::NoOpenOrders, parse_ts("2026-10-14T10:00:00Z")))
            .await
            .expect("insert");
        let mut south =
            lead("L-3", "0633333333", LeadStatus::PendingConfig, parse_ts("2026-10-14T08:00:00Z"));
        south.entity = Some(EntityCode("south".to_string()));
        insert(&mut conn, &south).await.expect("insert");

        let routed = list(&mut conn, &LeadFilter { status: Some(LeadStatus::Routed), ..LeadFilter::default() })
            .await
            .expect("list");
        assert_eq!(routed.len(), 1);

        let queue = list_routable(&mut conn, None, None, 10).await.expect("routable");
        let ids: Vec<&str> = queue.iter().map(|cursor| cursor.id.0.as_str()).collect();
        assert_eq!(ids, vec!["L-3", "L-2"]);

        let first_page = list_routable(&mut conn, None, None, 1).await.expect("first page");
        let second_page =
            list_routable(&mut conn, None, first_page.last(), 1).await.expect("second page");
        assert_eq!(second_page[0].id, LeadId("L-2".to_string()));
        assert!(list_routable(&mut conn, None, second_page.last(), 1).await.expect("end").is_empty());

        let north_queue = list_routable(&mut conn, Some(&EntityCode("north".to_string())), None, 10)
            .await
            .expect("routable");
        assert_eq!(north_queue.len(), 1);
        assert_eq!(north_queue[0].id, LeadId("L-2".to_string()));

        let many = find_many(&mut conn, &[LeadId("L-2".to_string()), LeadId("L-1".to_string())])
            .await
            .expect("find many");
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].id.0, "L-1");
    }
}
