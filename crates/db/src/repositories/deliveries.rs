use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use leadflow_core::domain::delivery::{
    Delivery, DeliveryFilter, DeliveryId, DeliveryLead, DeliveryLeadState, DeliveryOutcome,
    DeliveryStatus, OutcomeDecision, RemovalReason,
};
use leadflow_core::domain::lead::LeadId;
use leadflow_core::domain::order::{ClientId, EntityCode, OrderId};
use leadflow_core::domain::quota::{QuotaSlot, WeekKey};

use super::{
    encode_string_list, page, parse_optional_timestamp, parse_string_list, parse_timestamp,
    parse_u32, ts, RepositoryError,
};

const DELIVERY_COLUMNS: &str = "id,
    entity,
    product,
    client_id,
    order_id,
    week_key,
    status,
    outcome,
    outcome_reason,
    outcome_actor,
    outcome_at,
    billable,
    billable_set_at,
    sent_to_json,
    send_attempts,
    last_error,
    payload_json,
    payload_hash,
    last_attempt_at,
    sent_at,
    created_at,
    updated_at";

const DELIVERY_LEAD_COLUMNS: &str = "delivery_id,
    lead_id,
    order_id,
    week_key,
    slot,
    state,
    removal_reason,
    removal_detail,
    released_at,
    attached_at,
    detached_at";

pub async fn insert(conn: &mut SqliteConnection, delivery: &Delivery) -> Result<(), RepositoryError> {
    let outcome = delivery.outcome.as_ref();
    sqlx::query(
        "INSERT INTO delivery (
            id,
            entity,
            product,
            client_id,
            order_id,
            week_key,
            status,
            outcome,
            outcome_reason,
            outcome_actor,
            outcome_at,
            billable,
            billable_set_at,
            sent_to_json,
            send_attempts,
            last_error,
            payload_json,
            payload_hash,
            last_attempt_at,
            sent_at,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&delivery.id.0)
    .bind(&delivery.entity.0)
    .bind(&delivery.product)
    .bind(&delivery.client_id.0)
    .bind(&delivery.order_id.0)
    .bind(&delivery.week_key.0)
    .bind(delivery.status.as_str())
    .bind(outcome.map(|decision| decision.outcome.as_str()))
    .bind(outcome.and_then(|decision| decision.reason.as_deref()))
    .bind(outcome.map(|decision| decision.actor.as_str()))
    .bind(outcome.map(|decision| ts(decision.decided_at)))
    .bind(delivery.billable)
    .bind(delivery.billable_set_at.map(ts))
    .bind(encode_string_list(&delivery.sent_to))
    .bind(i64::from(delivery.send_attempts))
    .bind(delivery.last_error.as_deref())
    .bind(delivery.payload_json.as_deref())
    .bind(delivery.payload_hash.as_deref())
    .bind(delivery.last_attempt_at.map(ts))
    .bind(delivery.sent_at.map(ts))
    .bind(ts(delivery.created_at))
    .bind(ts(delivery.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes every mutable field, guarded on the status the caller read.
///
/// Returns `false` when another writer moved the delivery first.
pub async fn save_transition(
    conn: &mut SqliteConnection,
    delivery: &Delivery,
    expected_status: DeliveryStatus,
) -> Result<bool, RepositoryError> {
    let outcome = delivery.outcome.as_ref();
    let result = sqlx::query(
        "UPDATE delivery SET
            status = ?,
            outcome = ?,
            outcome_reason = ?,
            outcome_actor = ?,
            outcome_at = ?,
            billable = ?,
            billable_set_at = ?,
            sent_to_json = ?,
            send_attempts = ?,
            last_error = ?,
            payload_json = ?,
            payload_hash = ?,
            last_attempt_at = ?,
            sent_at = ?,
            updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(delivery.status.as_str())
    .bind(outcome.map(|decision| decision.outcome.as_str()))
    .bind(outcome.and_then(|decision| decision.reason.as_deref()))
    .bind(outcome.map(|decision| decision.actor.as_str()))
    .bind(outcome.map(|decision| ts(decision.decided_at)))
    .bind(delivery.billable)
    .bind(delivery.billable_set_at.map(ts))
    .bind(encode_string_list(&delivery.sent_to))
    .bind(i64::from(delivery.send_attempts))
    .bind(delivery.last_error.as_deref())
    .bind(delivery.payload_json.as_deref())
    .bind(delivery.payload_hash.as_deref())
    .bind(delivery.last_attempt_at.map(ts))
    .bind(delivery.sent_at.map(ts))
    .bind(ts(delivery.updated_at))
    .bind(&delivery.id.0)
    .bind(expected_status.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn find(
    conn: &mut SqliteConnection,
    id: &DeliveryId,
) -> Result<Option<Delivery>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {DELIVERY_COLUMNS} FROM delivery WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(delivery_from_row).transpose()
}

/// The newest `pending_csv` delivery of `order_id` for `week` still holding
/// fewer than `max_leads` active leads and never paired with `lead_id`.
pub async fn find_open_batch(
    conn: &mut SqliteConnection,
    order_id: &OrderId,
    week: &WeekKey,
    lead_id: &LeadId,
    max_leads: u32,
) -> Result<Option<Delivery>, RepositoryError> {
    let row = sqlx::query(&format!(
        "SELECT {DELIVERY_COLUMNS} FROM delivery d
         WHERE d.order_id = ? AND d.week_key = ? AND d.status = ? AND d.outcome IS NULL
           AND (SELECT COUNT(*) FROM delivery_lead dl
                WHERE dl.delivery_id = d.id AND dl.state = ?) < ?
           AND NOT EXISTS (SELECT 1 FROM delivery_lead seen
                WHERE seen.delivery_id = d.id AND seen.lead_id = ?)
         ORDER BY d.created_at DESC, d.id DESC
         LIMIT 1"
    ))
    .bind(&order_id.0)
    .bind(&week.0)
    .bind(DeliveryStatus::PendingCsv.as_str())
    .bind(DeliveryLeadState::Active.as_str())
    .bind(i64::from(max_leads))
    .bind(&lead_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(delivery_from_row).transpose()
}

pub async fn list(
    conn: &mut SqliteConnection,
    filter: &DeliveryFilter,
) -> Result<Vec<Delivery>, RepositoryError> {
    let mut builder =
        QueryBuilder::<Sqlite>::new(format!("SELECT {DELIVERY_COLUMNS} FROM delivery WHERE 1=1"));

    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(order_id) = &filter.order_id {
        builder.push(" AND order_id = ").push_bind(order_id.0.clone());
    }
    if let Some(client_id) = &filter.client_id {
        builder.push(" AND client_id = ").push_bind(client_id.0.clone());
    }
    if let Some(entity) = &filter.entity {
        builder.push(" AND entity = ").push_bind(entity.0.clone());
    }
    if let Some(billable) = filter.billable {
        builder.push(" AND billable = ").push_bind(billable);
    }

    let (limit, offset) = page(filter.limit, filter.offset);
    builder.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit);
    builder.push(" OFFSET ").push_bind(offset);

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.into_iter().map(delivery_from_row).collect()
}

/// Deliveries stuck in `sending` since before `started_before`.
pub async fn list_stale_sending(
    conn: &mut SqliteConnection,
    started_before: DateTime<Utc>,
) -> Result<Vec<DeliveryId>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id FROM delivery
         WHERE status = ? AND COALESCE(last_attempt_at, updated_at) < ?
         ORDER BY updated_at ASC, id ASC",
    )
    .bind(DeliveryStatus::Sending.as_str())
    .bind(ts(started_before))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(|row| Ok(DeliveryId(row.try_get("id")?))).collect()
}

/// Failed deliveries with attempts left whose last attempt is at or before `attempted_before`.
pub async fn list_retryable_failed(
    conn: &mut SqliteConnection,
    max_attempts: u32,
    attempted_before: DateTime<Utc>,
) -> Result<Vec<DeliveryId>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id FROM delivery
         WHERE status = ? AND outcome IS NULL AND send_attempts < ?
           AND COALESCE(last_attempt_at, updated_at) <= ?
         ORDER BY updated_at ASC, id ASC",
    )
    .bind(DeliveryStatus::Failed.as_str())
    .bind(i64::from(max_attempts))
    .bind(ts(attempted_before))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(|row| Ok(DeliveryId(row.try_get("id")?))).collect()
}

pub async fn attach_lead(
    conn: &mut SqliteConnection,
    link: &DeliveryLead,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO delivery_lead (
            delivery_id,
            lead_id,
            order_id,
            week_key,
            slot,
            state,
            removal_reason,
            removal_detail,
            released_at,
            attached_at,
            detached_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&link.delivery_id.0)
    .bind(&link.lead_id.0)
    .bind(&link.order_id.0)
    .bind(&link.week_key.0)
    .bind(link.slot.as_str())
    .bind(link.state.as_str())
    .bind(link.removal_reason.map(|reason| reason.as_str()))
    .bind(link.removal_detail.as_deref())
    .bind(link.released_at.map(ts))
    .bind(ts(link.attached_at))
    .bind(link.detached_at.map(ts))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn list_leads(
    conn: &mut SqliteConnection,
    delivery_id: &DeliveryId,
) -> Result<Vec<DeliveryLead>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {DELIVERY_LEAD_COLUMNS} FROM delivery_lead
         WHERE delivery_id = ?
         ORDER BY attached_at ASC, lead_id ASC"
    ))
    .bind(&delivery_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(link_from_row).collect()
}

/// Every pairing a lead has been part of, oldest first.
pub async fn history_for_lead(
    conn: &mut SqliteConnection,
    lead_id: &LeadId,
) -> Result<Vec<DeliveryLead>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {DELIVERY_LEAD_COLUMNS} FROM delivery_lead
         WHERE lead_id = ?
         ORDER BY attached_at ASC, delivery_id ASC"
    ))
    .bind(&lead_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(link_from_row).collect()
}

/// Moves an active pairing to `state`. Returns `false` if it was not active.
pub async fn detach_lead(
    conn: &mut SqliteConnection,
    delivery_id: &DeliveryId,
    lead_id: &LeadId,
    state: DeliveryLeadState,
    reason: Option<RemovalReason>,
    detail: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE delivery_lead SET
            state = ?,
            removal_reason = ?,
            removal_detail = ?,
            detached_at = ?
         WHERE delivery_id = ? AND lead_id = ? AND state = ?",
    )
    .bind(state.as_str())
    .bind(reason.map(|reason| reason.as_str()))
    .bind(detail)
    .bind(ts(at))
    .bind(&delivery_id.0)
    .bind(&lead_id.0)
    .bind(DeliveryLeadState::Active.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Claims the right to release this pairing's quota. Only the first caller wins.
pub async fn mark_released(
    conn: &mut SqliteConnection,
    delivery_id: &DeliveryId,
    lead_id: &LeadId,
    at: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE delivery_lead SET released_at = ?
         WHERE delivery_id = ? AND lead_id = ? AND released_at IS NULL",
    )
    .bind(ts(at))
    .bind(&delivery_id.0)
    .bind(&lead_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn delivery_from_row(row: SqliteRow) -> Result<Delivery, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = DeliveryStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown delivery status `{status_raw}`")))?;

    let outcome = match row.try_get::<Option<String>, _>("outcome")? {
        Some(raw) => {
            let outcome = DeliveryOutcome::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown delivery outcome `{raw}`")))?;
            let decided_at = row
                .try_get::<Option<String>, _>("outcome_at")?
                .ok_or_else(|| RepositoryError::Decode("outcome without `outcome_at`".to_string()))?;
            Some(OutcomeDecision {
                outcome,
                reason: row.try_get("outcome_reason")?,
                actor: row.try_get::<Option<String>, _>("outcome_actor")?.unwrap_or_default(),
                decided_at: parse_timestamp("outcome_at", decided_at)?,
            })
        }
        None => None,
    };

    Ok(Delivery {
        id: DeliveryId(row.try_get("id")?),
        entity: EntityCode(row.try_get("entity")?),
        product: row.try_get("product")?,
        client_id: ClientId(row.try_get("client_id")?),
        order_id: OrderId(row.try_get("order_id")?),
        week_key: WeekKey(row.try_get("week_key")?),
        status,
        outcome,
        billable: row.try_get("billable")?,
        billable_set_at: parse_optional_timestamp("billable_set_at", row.try_get("billable_set_at")?)?,
        sent_to: parse_string_list("sent_to_json", &row.try_get::<String, _>("sent_to_json")?)?,
        send_attempts: parse_u32("send_attempts", row.try_get("send_attempts")?)?,
        last_error: row.try_get("last_error")?,
        payload_json: row.try_get("payload_json")?,
        payload_hash: row.try_get("payload_hash")?,
        last_attempt_at: parse_optional_timestamp("last_attempt_at", row.try_get("last_attempt_at")?)?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn link_from_row(row: SqliteRow) -> Result<DeliveryLead, RepositoryError> {
    let slot_raw = row.try_get::<String, _>("slot")?;
    let slot = QuotaSlot::parse(&slot_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quota slot `{slot_raw}`")))?;
    let state_raw = row.try_get::<String, _>("state")?;
    let state = DeliveryLeadState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown delivery lead state `{state_raw}`")))?;
    let removal_reason = row
        .try_get::<Option<String>, _>("removal_reason")?
        .map(|raw| {
            RemovalReason::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown removal reason `{raw}`")))
        })
        .transpose()?;

    Ok(DeliveryLead {
        delivery_id: DeliveryId(row.try_get("delivery_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        order_id: OrderId(row.try_get("order_id")?),
        week_key: WeekKey(row.try_get("week_key")?),
        slot,
        state,
        removal_reason,
        removal_detail: row.try_get("removal_detail")?,
        released_at: parse_optional_timestamp("released_at", row.try_get("released_at")?)?,
        attached_at: parse_timestamp("attached_at", row.try_get("attached_at")?)?,
        detached_at: parse_optional_timestamp("detached_at", row.try_get("detached_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use leadflow_core::domain::delivery::{
        Delivery, DeliveryFilter, DeliveryId, DeliveryLead, DeliveryLeadState, DeliveryOutcome,
        DeliveryStatus, OutcomeDecision, RemovalReason,
    };
    use leadflow_core::domain::lead::{LeadId, LeadStatus};
    use leadflow_core::domain::order::{EntityCode, Order};
    use leadflow_core::domain::quota::{QuotaSlot, WeekKey};

    use super::{
        attach_lead, detach_lead, find, find_open_batch, history_for_lead, insert, list,
        list_leads, list_retryable_failed, list_stale_sending, mark_released, save_transition,
    };
    use crate::repositories::leads::{self, fixtures::lead};
    use crate::repositories::orders::{self, fixtures::order};
    use crate::repositories::testing::{parse_ts, setup_pool};

    fn delivery(id: &str, order: &Order, at: DateTime<Utc>) -> Delivery {
        Delivery {
            id: DeliveryId(id.to_string()),
            entity: order.entity.clone(),
            product: order.product.clone(),
            client_id: order.client_id.clone(),
            order_id: order.id.clone(),
            week_key: WeekKey("2026-10-12".to_string()),
            status: DeliveryStatus::PendingCsv,
            outcome: None,
            billable: false,
            billable_set_at: None,
            sent_to: Vec::new(),
            send_attempts: 0,
            last_error: None,
            payload_json: None,
            payload_hash: None,
            last_attempt_at: None,
            sent_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn link(delivery: &Delivery, lead_id: &str, at: DateTime<Utc>) -> DeliveryLead {
        DeliveryLead {
            delivery_id: delivery.id.clone(),
            lead_id: LeadId(lead_id.to_string()),
            order_id: delivery.order_id.clone(),
            week_key: delivery.week_key.clone(),
            slot: QuotaSlot::Regular,
            state: DeliveryLeadState::Active,
            removal_reason: None,
            removal_detail: None,
            released_at: None,
            attached_at: at,
            detached_at: None,
        }
    }

    #[tokio::test]
    async fn transitions_are_guarded_by_the_expected_status() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 10, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let mut stored = delivery("D-1", &order, now);
        insert(&mut conn, &stored).await.expect("insert");

        stored.status = DeliveryStatus::Sent;
        stored.billable = true;
        stored.billable_set_at = Some(now);
        stored.sent_to = vec!["https://client.example/hook".to_string()];
        stored.outcome = Some(OutcomeDecision {
            outcome: DeliveryOutcome::Accepted,
            reason: None,
            actor: "ops:alice".to_string(),
            decided_at: now,
        });
        assert!(save_transition(&mut conn, &stored, DeliveryStatus::PendingCsv).await.expect("save"));
        assert!(!save_transition(&mut conn, &stored, DeliveryStatus::PendingCsv).await.expect("save"));

        assert_eq!(find(&mut conn, &stored.id).await.expect("find"), Some(stored.clone()));

        let billable = list(&mut conn, &DeliveryFilter { billable: Some(true), ..DeliveryFilter::default() })
            .await
            .expect("list");
        assert_eq!(billable.len(), 1);
    }

    #[tokio::test]
    async fn open_batch_respects_the_size_limit() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 10, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let batch = delivery("D-1", &order, now);
        insert(&mut conn, &batch).await.expect("insert");
        for id in ["L-1", "L-2"] {
            leads::insert(&mut conn, &lead(id, "0612345678", LeadStatus::Routed, now)).await.expect("lead");
            attach_lead(&mut conn, &link(&batch, id, now)).await.expect("attach");
        }

        let week = WeekKey("2026-10-12".to_string());
        let newcomer = LeadId("L-9".to_string());
        assert!(find_open_batch(&mut conn, &order.id, &week, &newcomer, 3).await.expect("open").is_some());
        assert!(find_open_batch(&mut conn, &order.id, &week, &newcomer, 2).await.expect("open").is_none());

        let lead_id = LeadId("L-1".to_string());
        assert!(detach_lead(&mut conn, &batch.id, &lead_id, DeliveryLeadState::Removed, Some(RemovalReason::WrongNumber), Some("typo"), now)
            .await
            .expect("detach"));
        assert!(!detach_lead(&mut conn, &batch.id, &lead_id, DeliveryLeadState::Removed, None, None, now)
            .await
            .expect("detach again"));
        assert!(find_open_batch(&mut conn, &order.id, &week, &newcomer, 2).await.expect("open").is_some());
        // A removed lead is never put back into the batch it left.
        assert!(find_open_batch(&mut conn, &order.id, &week, &lead_id, 3).await.expect("open").is_none());

        let links = list_leads(&mut conn, &batch.id).await.expect("links");
        assert_eq!(links[0].removal_reason, Some(RemovalReason::WrongNumber));
        assert_eq!(history_for_lead(&mut conn, &lead_id).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn release_claim_is_single_use() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 10, now);
        orders::upsert(&mut conn, &order).await.expect("order");
        let batch = delivery("D-1", &order, now);
        insert(&mut conn, &batch).await.expect("insert");
        leads::insert(&mut conn, &lead("L-1", "0612345678", LeadStatus::Routed, now)).await.expect("lead");
        attach_lead(&mut conn, &link(&batch, "L-1", now)).await.expect("attach");

        let lead_id = LeadId("L-1".to_string());
        assert!(mark_released(&mut conn, &batch.id, &lead_id, now).await.expect("release"));
        assert!(!mark_released(&mut conn, &batch.id, &lead_id, now).await.expect("release again"));
    }

    #[tokio::test]
    async fn sweeper_queries_select_by_age_and_budget() {
        let pool = setup_pool().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let now = parse_ts("2026-10-14T09:00:00Z");
        let order = order("O-1", "north", 10, now);
        orders::upsert(&mut conn, &order).await.expect("order");

        let mut sending = delivery("D-sending", &order, now);
        sending.status = DeliveryStatus::Sending;
        sending.last_attempt_at = Some(parse_ts("2026-10-14T08:00:00Z"));
        insert(&mut conn, &sending).await.expect("insert");

        let mut failed = delivery("D-failed", &order, now);
        failed.status = DeliveryStatus::Failed;
        failed.send_attempts = 1;
        failed.last_attempt_at = Some(parse_ts("2026-10-14T08:00:00Z"));
        insert(&mut conn, &failed).await.expect("insert");

        let mut exhausted = delivery("D-exhausted", &order, now);
        exhausted.status = DeliveryStatus::Failed;
        exhausted.send_attempts = 3;
        exhausted.last_attempt_at = Some(parse_ts("2026-10-14T08:00:00Z"));
        insert(&mut conn, &exhausted).await.expect("insert");

        let stale = list_stale_sending(&mut conn, parse_ts("2026-10-14T08:30:00Z")).await.expect("stale");
        assert_eq!(stale, vec![DeliveryId("D-sending".to_string())]);
        assert!(list_stale_sending(&mut conn, parse_ts("2026-10-14T07:30:00Z")).await.expect("stale").is_empty());

        let retry = list_retryable_failed(&mut conn, 3, parse_ts("2026-10-14T08:30:00Z")).await.expect("retry");
        assert_eq!(retry, vec![DeliveryId("D-failed".to_string())]);

        let south = list(&mut conn, &DeliveryFilter { entity: Some(EntityCode("south".to_string())), ..DeliveryFilter::default() })
            .await
            .expect("list");
        assert!(south.is_empty());
    }
}
