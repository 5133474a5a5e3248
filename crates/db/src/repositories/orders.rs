use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use leadflow_core::domain::order::{BillingMode, ClientId, EntityCode, Order, OrderId};

use super::{
    encode_string_list, parse_decimal, parse_i32, parse_string_list, parse_timestamp, parse_u32,
    ts, RepositoryError,
};

const ORDER_COLUMNS: &str = "id,
    entity,
    client_id,
    client_name,
    product,
    departments_json,
    quota_semaine,
    priorite,
    lb_target_pct,
    auto_renew,
    active,
    on_hold,
    prix_lead,
    remise_percent,
    billing_mode,
    channels_json,
    created_at,
    updated_at";

pub async fn find(
    conn: &mut SqliteConnection,
    id: &OrderId,
) -> Result<Option<Order>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM client_order WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(order_from_row).transpose()
}

/// Every order of an entity, whatever its state; the matcher needs held and
/// inactive ones to tell `hold_source` from `no_open_orders`.
pub async fn list_for_entity(
    conn: &mut SqliteConnection,
    entity: &EntityCode,
) -> Result<Vec<Order>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {ORDER_COLUMNS} FROM client_order WHERE entity = ? ORDER BY created_at ASC, id ASC"
    ))
    .bind(&entity.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(order_from_row).collect()
}

pub async fn list(
    conn: &mut SqliteConnection,
    entity: Option<&EntityCode>,
) -> Result<Vec<Order>, RepositoryError> {
    match entity {
        Some(entity) => list_for_entity(conn, entity).await,
        None => {
            let rows = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM client_order ORDER BY entity ASC, created_at ASC, id ASC"
            ))
            .fetch_all(&mut *conn)
            .await?;
            rows.into_iter().map(order_from_row).collect()
        }
    }
}

/// Inserts or replaces the operator-editable fields; `created_at` is kept.
pub async fn upsert(conn: &mut SqliteConnection, order: &Order) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO client_order (
            id,
            entity,
            client_id,
            client_name,
            product,
            departments_json,
            quota_semaine,
            priorite,
            lb_target_pct,
            auto_renew,
            active,
            on_hold,
            prix_lead,
            remise_percent,
            billing_mode,
            channels_json,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            entity = excluded.entity,
            client_id = excluded.client_id,
            client_name = excluded.client_name,
            product = excluded.product,
            departments_json = excluded.departments_json,
            quota_semaine = excluded.quota_semaine,
            priorite = excluded.priorite,
            lb_target_pct = excluded.lb_target_pct,
            auto_renew = excluded.auto_renew,
            active = excluded.active,
            on_hold = excluded.on_hold,
            prix_lead = excluded.prix_lead,
            remise_percent = excluded.remise_percent,
            billing_mode = excluded.billing_mode,
            channels_json = excluded.channels_json,
            updated_at = excluded.updated_at",
    )
    .bind(&order.id.0)
    .bind(&order.entity.0)
    .bind(&order.client_id.0)
    .bind(&order.client_name)
    .bind(&order.product)
    .bind(encode_string_list(&order.departments))
    .bind(i64::from(order.quota_semaine))
    .bind(i64::from(order.priorite))
    .bind(order.lb_target_pct.to_string())
    .bind(order.auto_renew)
    .bind(order.active)
    .bind(order.on_hold)
    .bind(order.prix_lead.to_string())
    .bind(order.remise_percent.to_string())
    .bind(order.billing_mode.as_str())
    .bind(encode_string_list(&order.channels))
    .bind(ts(order.created_at))
    .bind(ts(order.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_flags(
    conn: &mut SqliteConnection,
    id: &OrderId,
    active: bool,
    on_hold: bool,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<bool, RepositoryError> {
    let result =
        sqlx::query("UPDATE client_order SET active = ?, on_hold = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(on_hold)
            .bind(ts(at))
            .bind(&id.0)
            .execute(&mut *conn)
            .await?;

    Ok(result.rows_affected() == 1)
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let billing_raw = row.try_get::<String, _>("billing_mode")?;
    let billing_mode = BillingMode::parse(&billing_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown billing mode `{billing_raw}`")))?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        entity: EntityCode(row.try_get("entity")?),
        client_id: ClientId(row.try_get("client_id")?),
        client_name: row.try_get("client_name")?,
        product: row.try_get("product")?,
        departments: parse_string_list(
            "departments_json",
            &row.try_get::<String, _>("departments_json")?,
        )?,
        quota_semaine: parse_u32("quota_semaine", row.try_get("quota_semaine")?)?,
        priorite: parse_i32("priorite", row.try_get("priorite")?)?,
        lb_target_pct: parse_decimal("lb_target_pct", row.try_get("lb_target_pct")?)?,
        auto_renew: row.try_get("auto_renew")?,
        active: row.try_get("active")?,
        on_hold: row.try_get("on_hold")?,
        prix_lead: parse_decimal("prix_lead", row.try_get("prix_lead")?)?,
        remise_percent: parse_decimal("remise_percent", row.try_get("remise_percent")?)?,
        billing_mode,
        channels: parse_string_list("channels_json", &row.try_get::<String, _>("channels_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use leadflow_core::domain::order::{BillingMode, ClientId, EntityCode, Order, OrderId};

    pub fn order(id: &str, entity: &str, quota: u32, created_at: DateTime<Utc>) -> Order {
        Order {
            id: OrderId(id.to_string()),
            entity: EntityCode(entity.to_string()),
            client_id: ClientId(format!("C-{id}")),
            client_name: format!("Client {id}"),
            product: "pac".to_string(),
            departments: vec!["75".to_string(), "92".to_string()],
            quota_semaine: quota,
            priorite: 1,
            lb_target_pct: Decimal::new(20, 2),
            auto_renew: true,
            active: true,
            on_hold: false,
            prix_lead: Decimal::new(3_500, 2),
            remise_percent: Decimal::new(5, 0),
            billing_mode: BillingMode::PerLead,
            channels: vec!["https://client.example/hook".to_string()],
            created_at,
            updated_at: created_at,
        }
    }
}
