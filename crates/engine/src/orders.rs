use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use leadflow_core::audit::{EntityRef, EventAction};
use leadflow_core::domain::order::{BillingMode, ClientId, EntityCode, Order, OrderId};
use leadflow_db::repositories::{events, orders};
use leadflow_db::WriteTx;

use crate::context::OperationContext;
use crate::engine::LeadEngine;
use crate::error::EngineError;
use crate::rollover::ReevaluationReport;

/// Operator-supplied fields of an order. Timestamps are managed by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OrderDraft {
    pub entity: String,
    pub client_id: String,
    #[serde(default)]
    pub client_name: String,
    pub product: String,
    pub departments: Vec<String>,
    pub quota_semaine: u32,
    #[serde(default)]
    pub priorite: i32,
    #[serde(default)]
    pub lb_target_pct: Decimal,
    #[serde(default = "enabled")]
    pub auto_renew: bool,
    #[serde(default = "enabled")]
    pub active: bool,
    #[serde(default)]
    pub on_hold: bool,
    #[serde(default)]
    pub prix_lead: Decimal,
    #[serde(default)]
    pub remise_percent: Decimal,
    #[serde(default = "per_lead")]
    pub billing_mode: BillingMode,
    #[serde(default)]
    pub channels: Vec<String>,
}

fn enabled() -> bool {
    true
}

fn per_lead() -> BillingMode {
    BillingMode::PerLead
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderChange {
    pub order: Order,
    /// Outcome of re-routing the order's entity after the change.
    pub reevaluation: ReevaluationReport,
}

impl LeadEngine {
    /// Creates or replaces an order. The entity of an existing order is fixed.
    pub async fn upsert_order(
        &self,
        ctx: &OperationContext,
        id: OrderId,
        draft: OrderDraft,
    ) -> Result<OrderChange, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.upsert_in_tx(tx.conn(), ctx, id, draft).await;
        let (order, created) = tx.finish(result).await?;

        info!(
            event_name = "orders.order.upserted",
            correlation_id = %ctx.correlation_id,
            order_id = %order.id.0,
            entity = %order.entity.0,
            created,
            quota_semaine = order.quota_semaine,
            "order saved"
        );

        let reevaluation = self.reevaluate(ctx, Some(&order.entity)).await?;
        Ok(OrderChange { order, reevaluation })
    }

    async fn upsert_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        id: OrderId,
        draft: OrderDraft,
    ) -> Result<(Order, bool), EngineError> {
        let existing = orders::find(conn, &id).await?;
        let entity = EntityCode(draft.entity.trim().to_string());
        if let Some(existing) = &existing {
            if existing.entity != entity {
                return Err(EngineError::Conflict(format!(
                    "order {} belongs to entity {} and cannot move to {}",
                    id.0, existing.entity.0, entity.0
                )));
            }
        }

        let order = Order {
            id,
            entity,
            client_id: ClientId(draft.client_id.trim().to_string()),
            client_name: draft.client_name.trim().to_string(),
            product: draft.product.trim().to_string(),
            departments: draft
                .departments
                .iter()
                .map(|department| department.trim().to_string())
                .filter(|department| !department.is_empty())
                .collect(),
            quota_semaine: draft.quota_semaine,
            priorite: draft.priorite,
            lb_target_pct: draft.lb_target_pct,
            auto_renew: draft.auto_renew,
            active: draft.active,
            on_hold: draft.on_hold,
            prix_lead: draft.prix_lead,
            remise_percent: draft.remise_percent,
            billing_mode: draft.billing_mode,
            channels: draft.channels,
            created_at: existing.as_ref().map_or(ctx.now, |existing| existing.created_at),
            updated_at: ctx.now,
        };
        order.validate().map_err(|error| EngineError::Validation(error.to_string()))?;

        orders::upsert(conn, &order).await?;
        events::append(
            conn,
            &ctx.event(EventAction::OrderUpserted, EntityRef::order(&order.id))
                .with_detail("created", existing.is_none())
                .with_detail("entity", &order.entity.0)
                .with_detail("quota_semaine", order.quota_semaine)
                .with_detail("active", order.active)
                .with_detail("on_hold", order.on_hold),
        )
        .await?;
        Ok((order, existing.is_none()))
    }

    /// Flips `active`. Deliveries already open for the order are not touched.
    pub async fn toggle_order_active(
        &self,
        ctx: &OperationContext,
        id: &OrderId,
    ) -> Result<OrderChange, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = async {
            let conn = tx.conn();
            let mut order = self.load_order(conn, id).await?;
            order.active = !order.active;
            order.updated_at = ctx.now;
            orders::set_flags(conn, id, order.active, order.on_hold, ctx.now).await?;
            events::append(
                conn,
                &ctx.event(EventAction::OrderActiveToggled, EntityRef::order(id))
                    .with_detail("active", order.active),
            )
            .await?;
            Ok::<_, EngineError>(order)
        }
        .await;
        let order = tx.finish(result).await?;

        info!(
            event_name = "orders.order.active_toggled",
            correlation_id = %ctx.correlation_id,
            order_id = %id.0,
            active = order.active,
            actor = %ctx.actor,
            "order active flag toggled"
        );

        let reevaluation = self.reevaluate(ctx, Some(&order.entity)).await?;
        Ok(OrderChange { order, reevaluation })
    }

    pub async fn set_order_hold(
        &self,
        ctx: &OperationContext,
        id: &OrderId,
        on_hold: bool,
    ) -> Result<OrderChange, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = async {
            let conn = tx.conn();
            let mut order = self.load_order(conn, id).await?;
            if order.on_hold == on_hold {
                return Ok::<_, EngineError>((order, false));
            }
            order.on_hold = on_hold;
            order.updated_at = ctx.now;
            orders::set_flags(conn, id, order.active, order.on_hold, ctx.now).await?;
            events::append(
                conn,
                &ctx.event(EventAction::OrderHoldChanged, EntityRef::order(id))
                    .with_detail("on_hold", on_hold),
            )
            .await?;
            Ok((order, true))
        }
        .await;
        let (order, changed) = tx.finish(result).await?;

        if !changed {
            return Ok(OrderChange { order, reevaluation: ReevaluationReport::default() });
        }

        info!(
            event_name = "orders.order.hold_changed",
            correlation_id = %ctx.correlation_id,
            order_id = %id.0,
            on_hold,
            actor = %ctx.actor,
            "order hold changed"
        );

        let reevaluation = self.reevaluate(ctx, Some(&order.entity)).await?;
        Ok(OrderChange { order, reevaluation })
    }

    pub async fn list_orders(&self, entity: Option<&EntityCode>) -> Result<Vec<Order>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::list(&mut conn, entity).await?)
    }

    pub(crate) async fn load_order(
        &self,
        conn: &mut SqliteConnection,
        id: &OrderId,
    ) -> Result<Order, EngineError> {
        orders::find(conn, id).await?.ok_or_else(|| EngineError::not_found("order", id.0.clone()))
    }
}
