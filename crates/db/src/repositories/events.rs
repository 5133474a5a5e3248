use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use leadflow_core::audit::{EntityRef, EntityType, EventAction, EventFilter, EventRecord};

use super::{parse_timestamp, ts, RepositoryError};

/// A stored event with its position in the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub seq: i64,
    pub record: EventRecord,
}

pub async fn append(conn: &mut SqliteConnection, event: &EventRecord) -> Result<i64, RepositoryError> {
    let details = serde_json::to_string(&event.details)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode event details: {error}")))?;
    let related = serde_json::to_string(&event.related)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode related refs: {error}")))?;

    let result = sqlx::query(
        "INSERT INTO event_log (
            event_id,
            action,
            entity_type,
            entity_id,
            actor,
            correlation_id,
            reason,
            details_json,
            related_json,
            occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.action.as_str())
    .bind(event.subject.entity_type.as_str())
    .bind(&event.subject.entity_id)
    .bind(&event.actor)
    .bind(&event.correlation_id)
    .bind(event.reason.as_deref())
    .bind(details)
    .bind(related)
    .bind(ts(event.occurred_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Events in log order.
pub async fn list(
    conn: &mut SqliteConnection,
    filter: &EventFilter,
) -> Result<Vec<StoredEvent>, RepositoryError> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT seq, event_id, action, entity_type, entity_id, actor, correlation_id, reason,
                details_json, related_json, occurred_at
         FROM event_log WHERE 1=1",
    );

    if let Some(action) = filter.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(entity_type) = filter.entity_type {
        builder.push(" AND entity_type = ").push_bind(entity_type.as_str());
    }
    if let Some(entity_id) = &filter.entity_id {
        builder.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(reference) = &filter.references {
        builder
            .push(" AND (entity_id = ")
            .push_bind(reference.clone())
            .push(
                " OR EXISTS (SELECT 1 FROM json_each(event_log.related_json)
                    WHERE json_extract(json_each.value, '$.entity_id') = ",
            )
            .push_bind(reference.clone())
            .push("))");
    }
    if let Some(actor) = &filter.actor {
        builder.push(" AND actor = ").push_bind(actor.clone());
    }
    if let Some(since) = filter.since {
        builder.push(" AND occurred_at >= ").push_bind(ts(since));
    }
    if let Some(until) = filter.until {
        builder.push(" AND occurred_at < ").push_bind(ts(until));
    }

    let limit = i64::from(filter.limit.unwrap_or(200).clamp(1, 5_000));
    builder.push(" ORDER BY seq ASC LIMIT ").push_bind(limit);

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.into_iter().map(event_from_row).collect()
}

fn event_from_row(row: SqliteRow) -> Result<StoredEvent, RepositoryError> {
    let action_raw = row.try_get::<String, _>("action")?;
    let action = EventAction::parse(&action_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown event action `{action_raw}`")))?;
    let type_raw = row.try_get::<String, _>("entity_type")?;
    let entity_type = EntityType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity type `{type_raw}`")))?;

    let details_raw = row.try_get::<String, _>("details_json")?;
    let details: BTreeMap<String, String> = serde_json::from_str(&details_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid `details_json`: `{details_raw}` ({error})"))
    })?;
    let related_raw = row.try_get::<String, _>("related_json")?;
    let related: Vec<EntityRef> = serde_json::from_str(&related_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid `related_json`: `{related_raw}` ({error})"))
    })?;

    Ok(StoredEvent {
        seq: row.try_get("seq")?,
        record: EventRecord {
            event_id: row.try_get("event_id")?,
            action,
            subject: EntityRef { entity_type, entity_id: row.try_get("entity_id")? },
            actor: row.try_get("actor")?,
            correlation_id: row.try_get("correlation_id")?,
            reason: row.try_get("reason")?,
            details,
            related,
            occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        },
    })
}
