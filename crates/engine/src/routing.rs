//! Order matching for one lead.
//!
//! `route_in_tx` is the single path from a routable lead to either an
//! allocation or a parking status. Capacity is claimed with the ledger's
//! compare-and-set, walking quota slots first and ranked orders second, so
//! a lead that may use load-balance stock takes it on any order before it
//! touches regular quota.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use leadflow_core::audit::{EntityRef, EventAction};
use leadflow_core::domain::delivery::{
    Delivery, DeliveryId, DeliveryLead, DeliveryLeadState, DeliveryStatus,
};
use leadflow_core::domain::lead::{Lead, LeadId, LeadStatus};
use leadflow_core::domain::order::{EntityCode, Order, OrderId};
use leadflow_core::domain::quota::{QuotaSlot, WeekKey};
use leadflow_core::errors::DomainError;
use leadflow_core::matcher::{
    self, Candidate, RoutingClassification, RoutingRequest, REASON_QUOTA_EXHAUSTED,
};
use leadflow_db::repositories::{deliveries, events, leads, orders, quota};
use leadflow_db::WriteTx;

use crate::context::OperationContext;
use crate::engine::{new_delivery_id, LeadEngine};
use crate::error::EngineError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RoutingOutcome {
    Routed {
        order_id: OrderId,
        delivery_id: DeliveryId,
        week_key: WeekKey,
        slot: QuotaSlot,
        new_delivery: bool,
    },
    Parked {
        status: LeadStatus,
        reason: String,
    },
    /// The lead already holds quota; nothing was changed.
    AlreadyAllocated {
        status: LeadStatus,
    },
}

impl RoutingOutcome {
    pub fn status(&self) -> LeadStatus {
        match self {
            Self::Routed { .. } => LeadStatus::Routed,
            Self::Parked { status, .. } | Self::AlreadyAllocated { status } => *status,
        }
    }
}

impl LeadEngine {
    /// Runs the matcher again for one lead. Allocated leads are left as they are.
    pub async fn reroute_lead(
        &self,
        ctx: &OperationContext,
        lead_id: &LeadId,
    ) -> Result<RoutingOutcome, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.reroute_in_tx(tx.conn(), ctx, lead_id).await;
        let outcome = tx.finish(result).await?;

        log_routing(ctx, lead_id, &outcome);
        Ok(outcome)
    }

    /// Gives a routable lead its entity, locks it and routes the lead.
    pub async fn assign_entity(
        &self,
        ctx: &OperationContext,
        lead_id: &LeadId,
        entity: EntityCode,
    ) -> Result<RoutingOutcome, EngineError> {
        let entity = EntityCode(entity.0.trim().to_string());
        if entity.0.is_empty() {
            return Err(EngineError::Validation("entity cannot be empty".to_string()));
        }

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.assign_entity_in_tx(tx.conn(), ctx, lead_id, entity.clone()).await;
        let outcome = tx.finish(result).await?;

        info!(
            event_name = "routing.lead.entity_assigned",
            correlation_id = %ctx.correlation_id,
            lead_id = %lead_id.0,
            entity = %entity.0,
            actor = %ctx.actor,
            "lead entity assigned"
        );
        log_routing(ctx, lead_id, &outcome);
        Ok(outcome)
    }

    async fn assign_entity_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        lead_id: &LeadId,
        entity: EntityCode,
    ) -> Result<RoutingOutcome, EngineError> {
        let mut lead = leads::find(conn, lead_id)
            .await?
            .ok_or_else(|| EngineError::not_found("lead", lead_id.0.clone()))?;

        if !lead.status.is_routable() {
            return Err(EngineError::Conflict(format!(
                "lead {} is {}; only leads waiting for routing can be assigned an entity",
                lead.id.0,
                lead.status.as_str()
            )));
        }
        if lead.entity_locked && lead.entity.as_ref() != Some(&entity) {
            let current = lead.entity.as_ref().map_or("none", |current| current.0.as_str());
            return Err(EngineError::Conflict(format!(
                "lead {} is locked to entity {current}",
                lead.id.0
            )));
        }

        if lead.entity.as_ref() != Some(&entity) || !lead.entity_locked {
            lead.lock_entity(entity.clone())?;
            lead.updated_at = ctx.now;
            leads::save_state(conn, &lead).await?;
            events::append(
                conn,
                &ctx.event(EventAction::LeadEntityAssigned, EntityRef::lead(&lead.id))
                    .with_detail("entity", &entity.0),
            )
            .await?;
        }

        self.route_in_tx(conn, ctx, &mut lead).await
    }

    pub(crate) async fn reroute_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        lead_id: &LeadId,
    ) -> Result<RoutingOutcome, EngineError> {
        let mut lead = leads::find(conn, lead_id)
            .await?
            .ok_or_else(|| EngineError::not_found("lead", lead_id.0.clone()))?;
        self.route_in_tx(conn, ctx, &mut lead).await
    }

    /// Matches `lead` against its entity's order book inside the caller's transaction.
    pub(crate) async fn route_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        lead: &mut Lead,
    ) -> Result<RoutingOutcome, EngineError> {
        if lead.status.is_allocated() {
            return Ok(RoutingOutcome::AlreadyAllocated { status: lead.status });
        }
        if lead.status.is_terminal() {
            return Err(DomainError::InvalidLeadTransition {
                from: lead.status,
                to: LeadStatus::Routed,
            }
            .into());
        }

        let book = match &lead.entity {
            Some(entity) => orders::list_for_entity(conn, entity).await?,
            None => Vec::new(),
        };
        let request = RoutingRequest {
            entity: lead.entity.as_ref().map(|entity| entity.0.as_str()),
            product: &lead.payload.product,
            department: &lead.payload.department,
            lb_eligible: lead.lb_eligible,
        };

        let open = match matcher::classify(&request, &book) {
            RoutingClassification::Parked { status, reason } => {
                return self.park(conn, ctx, lead, status, reason).await;
            }
            RoutingClassification::Open(open) => open,
        };

        let week = self.week_of(ctx.now);
        let ledger = quota::list_for_week(conn, &week).await?;
        let mut candidates: Vec<Candidate> = open
            .into_iter()
            .map(|order| Candidate {
                caps: self.caps_for(order, ctx.now),
                delivered: ledger.get(&order.id).map_or(0, |entry| entry.delivered_count),
                order: order.clone(),
            })
            .collect();
        matcher::rank_candidates(&mut candidates);

        for slot in matcher::slots_for(lead.lb_eligible, self.routing.lb_fallback_to_regular) {
            for candidate in &candidates {
                let taken = quota::try_consume(
                    conn,
                    &candidate.order.id,
                    &week,
                    candidate.caps,
                    slot,
                    ctx.now,
                )
                .await?;
                if taken {
                    return self.allocate(conn, ctx, lead, &candidate.order, week, slot).await;
                }
            }
        }

        self.park(conn, ctx, lead, LeadStatus::NoOpenOrders, REASON_QUOTA_EXHAUSTED).await
    }

    async fn park(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        lead: &mut Lead,
        status: LeadStatus,
        reason: &str,
    ) -> Result<RoutingOutcome, EngineError> {
        if lead.status == status {
            // Still parked in the same place; only a changed reason is worth storing.
            if lead.status_reason.as_deref() != Some(reason) {
                lead.status_reason = Some(reason.to_string());
                lead.updated_at = ctx.now;
                leads::save_state(conn, lead).await?;
            }
            return Ok(RoutingOutcome::Parked { status, reason: reason.to_string() });
        }

        let from = lead.status;
        lead.transition_to(status, Some(reason.to_string()), ctx.now)?;
        leads::save_state(conn, lead).await?;
        events::append(
            conn,
            &ctx.event(EventAction::LeadParked, EntityRef::lead(&lead.id))
                .with_reason(reason)
                .with_detail("from_status", from.as_str())
                .with_detail("status", status.as_str()),
        )
        .await?;

        Ok(RoutingOutcome::Parked { status, reason: reason.to_string() })
    }

    async fn allocate(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        lead: &mut Lead,
        order: &Order,
        week: WeekKey,
        slot: QuotaSlot,
    ) -> Result<RoutingOutcome, EngineError> {
        let open_batch = deliveries::find_open_batch(
            conn,
            &order.id,
            &week,
            &lead.id,
            self.delivery.max_batch_size,
        )
        .await?;

        let (delivery_id, new_delivery) = match open_batch {
            Some(delivery) => (delivery.id, false),
            None => {
                let delivery = Delivery {
                    id: new_delivery_id(),
                    entity: order.entity.clone(),
                    product: order.product.clone(),
                    client_id: order.client_id.clone(),
                    order_id: order.id.clone(),
                    week_key: week.clone(),
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
                    created_at: ctx.now,
                    updated_at: ctx.now,
                };
                deliveries::insert(conn, &delivery).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::DeliveryCreated, EntityRef::delivery(&delivery.id))
                        .with_related(EntityRef::order(&order.id))
                        .with_detail("week_key", &week.0),
                )
                .await?;
                (delivery.id, true)
            }
        };

        deliveries::attach_lead(
            conn,
            &DeliveryLead {
                delivery_id: delivery_id.clone(),
                lead_id: lead.id.clone(),
                order_id: order.id.clone(),
                week_key: week.clone(),
                slot,
                state: DeliveryLeadState::Active,
                removal_reason: None,
                removal_detail: None,
                released_at: None,
                attached_at: ctx.now,
                detached_at: None,
            },
        )
        .await?;

        lead.transition_to(LeadStatus::Routed, None, ctx.now)?;
        lead.current_order_id = Some(order.id.clone());
        lead.current_delivery_id = Some(delivery_id.clone());
        leads::save_state(conn, lead).await?;
        events::append(
            conn,
            &ctx.event(EventAction::LeadRouted, EntityRef::lead(&lead.id))
                .with_related(EntityRef::order(&order.id))
                .with_related(EntityRef::delivery(&delivery_id))
                .with_detail("week_key", &week.0)
                .with_detail("slot", slot.as_str()),
        )
        .await?;

        Ok(RoutingOutcome::Routed {
            order_id: order.id.clone(),
            delivery_id,
            week_key: week,
            slot,
            new_delivery,
        })
    }
}

pub(crate) fn log_routing(ctx: &OperationContext, lead_id: &LeadId, outcome: &RoutingOutcome) {
    match outcome {
        RoutingOutcome::Routed { order_id, delivery_id, week_key, slot, .. } => info!(
            event_name = "routing.lead.routed",
            correlation_id = %ctx.correlation_id,
            lead_id = %lead_id.0,
            order_id = %order_id.0,
            delivery_id = %delivery_id.0,
            week_key = %week_key,
            slot = slot.as_str(),
            "lead routed"
        ),
        RoutingOutcome::Parked { status, reason } => info!(
            event_name = "routing.lead.parked",
            correlation_id = %ctx.correlation_id,
            lead_id = %lead_id.0,
            status = status.as_str(),
            reason = %reason,
            "lead parked"
        ),
        RoutingOutcome::AlreadyAllocated { status } => info!(
            event_name = "routing.lead.unchanged",
            correlation_id = %ctx.correlation_id,
            lead_id = %lead_id.0,
            status = status.as_str(),
            "lead already allocated"
        ),
    }
}
