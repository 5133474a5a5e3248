//! Delivery lifecycle manager.
//!
//! Every command asks `lifecycle::plan` first and persists with
//! `save_transition`, which is conditional on the status that was read.
//! A send is split in three steps: claim (`sending`, attempt counted) in
//! one transaction, the transport call with no transaction open, then the
//! result in a second transaction. A result that arrives after the
//! delivery was swept or re-sent is discarded.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use leadflow_core::audit::{EntityRef, EventAction};
use leadflow_core::domain::delivery::{
    Delivery, DeliveryId, DeliveryLead, DeliveryLeadState, DeliveryOutcome, DeliveryStatus,
    OutcomeDecision, RemovalReason,
};
use leadflow_core::domain::lead::{Lead, LeadId, LeadStatus};
use leadflow_core::lifecycle::{self, DeliveryCommand, DeliveryState, TransitionPlan};
use leadflow_core::payload::build_payload;
use leadflow_core::transport::{Shipment, TransportError, TransportReceipt};
use leadflow_db::repositories::{deliveries, events, leads, orders, quota};
use leadflow_db::WriteTx;

use crate::context::OperationContext;
use crate::engine::LeadEngine;
use crate::error::EngineError;

pub const SENDING_TIMED_OUT: &str = "sending timed out";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub delivery: Delivery,
    /// True when the transport acknowledged this attempt.
    pub transmitted: bool,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReleasedLead {
    pub lead_id: LeadId,
    pub quota_released: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RejectionReport {
    pub delivery: Delivery,
    pub released: Vec<ReleasedLead>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub delivery: Delivery,
    pub released: ReleasedLead,
    /// No active lead is left; the delivery outcome is now `removed`.
    pub delivery_emptied: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub deferred: u32,
}

impl LeadEngine {
    pub async fn prepare_delivery(
        &self,
        ctx: &OperationContext,
        id: &DeliveryId,
    ) -> Result<Delivery, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = async {
            let mut delivery = self.load_delivery(tx.conn(), id).await?;
            self.prepare_in_tx(tx.conn(), ctx, &mut delivery).await?;
            Ok::<_, EngineError>(delivery)
        }
        .await;
        let delivery = tx.finish(result).await?;

        info!(
            event_name = "delivery.prepared",
            correlation_id = %ctx.correlation_id,
            delivery_id = %delivery.id.0,
            payload_hash = delivery.payload_hash.as_deref().unwrap_or(""),
            "delivery payload prepared"
        );
        Ok(delivery)
    }

    /// Transmits a delivery once. A transport failure is recorded on the
    /// delivery and reported in the returned `SendReport`, not as an error.
    pub async fn send_delivery(
        &self,
        ctx: &OperationContext,
        id: &DeliveryId,
        force: bool,
    ) -> Result<SendReport, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.start_send(tx.conn(), ctx, id, force).await;
        let shipment = tx.finish(result).await?;

        info!(
            event_name = "delivery.send.started",
            correlation_id = %ctx.correlation_id,
            delivery_id = %id.0,
            attempt = shipment.attempt,
            force,
            "delivery transmission started"
        );

        let timeout_secs = self.delivery.transport_timeout_secs;
        let shipped = match tokio::time::timeout(
            StdDuration::from_secs(timeout_secs),
            self.transport.ship(&shipment),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout_secs)),
        };

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.finish_send(tx.conn(), ctx, id, shipment.attempt, shipped).await;
        let report = tx.finish(result).await?;

        match &report.error {
            None => info!(
                event_name = "delivery.send.completed",
                correlation_id = %ctx.correlation_id,
                delivery_id = %id.0,
                attempt = shipment.attempt,
                billable = report.delivery.billable,
                "delivery transmitted"
            ),
            Some(error) => warn!(
                event_name = "delivery.send.failed",
                correlation_id = %ctx.correlation_id,
                delivery_id = %id.0,
                attempt = shipment.attempt,
                error = %error,
                "delivery transmission failed"
            ),
        }
        Ok(report)
    }

    pub async fn resend(
        &self,
        ctx: &OperationContext,
        id: &DeliveryId,
    ) -> Result<SendReport, EngineError> {
        self.send_delivery(ctx, id, true).await
    }

    pub async fn accept_delivery(
        &self,
        ctx: &OperationContext,
        id: &DeliveryId,
    ) -> Result<Delivery, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = async {
            let conn = tx.conn();
            let mut delivery = self.load_delivery(conn, id).await?;
            let plan = self.plan(&delivery, DeliveryCommand::Accept)?;
            delivery.outcome = plan.outcome.map(|outcome| OutcomeDecision {
                outcome,
                reason: None,
                actor: ctx.actor.clone(),
                decided_at: ctx.now,
            });
            self.save(conn, ctx, &mut delivery, &plan).await?;
            events::append(
                conn,
                &ctx.event(EventAction::DeliveryAccepted, EntityRef::delivery(&delivery.id))
                    .with_related(EntityRef::order(&delivery.order_id)),
            )
            .await?;
            Ok::<_, EngineError>(delivery)
        }
        .await;
        let delivery = tx.finish(result).await?;

        info!(
            event_name = "delivery.accepted",
            correlation_id = %ctx.correlation_id,
            delivery_id = %delivery.id.0,
            actor = %ctx.actor,
            "delivery accepted"
        );
        Ok(delivery)
    }

    /// Rejects a sent delivery: clears `billable`, detaches every active
    /// lead, releases their quota and returns them to `new`.
    pub async fn reject_delivery(
        &self,
        ctx: &OperationContext,
        id: &DeliveryId,
        reason: &str,
    ) -> Result<RejectionReport, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("a rejection reason is required".to_string()));
        }

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.reject_in_tx(tx.conn(), ctx, id, reason).await;
        let report = tx.finish(result).await?;

        info!(
            event_name = "delivery.rejected",
            correlation_id = %ctx.correlation_id,
            delivery_id = %id.0,
            actor = %ctx.actor,
            reason = %reason,
            released = report.released.len(),
            "delivery rejected"
        );
        Ok(report)
    }

    async fn reject_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        id: &DeliveryId,
        reason: &str,
    ) -> Result<RejectionReport, EngineError> {
        let mut delivery = self.load_delivery(conn, id).await?;
        let plan = self.plan(&delivery, DeliveryCommand::Reject)?;
        let billable_revoked = delivery.billable;

        delivery.outcome = plan.outcome.map(|outcome| OutcomeDecision {
            outcome,
            reason: Some(reason.to_string()),
            actor: ctx.actor.clone(),
            decided_at: ctx.now,
        });
        delivery.billable = false;
        self.save(conn, ctx, &mut delivery, &plan).await?;

        let mut released = Vec::new();
        for link in deliveries::list_leads(conn, &delivery.id).await? {
            if link.state != DeliveryLeadState::Active {
                continue;
            }
            let detached = deliveries::detach_lead(
                conn,
                &delivery.id,
                &link.lead_id,
                DeliveryLeadState::Rejected,
                None,
                None,
                ctx.now,
            )
            .await?;
            if !detached {
                continue;
            }
            let quota_released = self.release_link(conn, ctx, &link).await?;
            self.return_lead(conn, ctx, &link, &delivery, reason, quota_released).await?;
            released.push(ReleasedLead { lead_id: link.lead_id, quota_released });
        }

        events::append(
            conn,
            &ctx.event(EventAction::DeliveryRejected, EntityRef::delivery(&delivery.id))
                .with_reason(reason)
                .with_related(EntityRef::order(&delivery.order_id))
                .with_detail("lead_count", released.len())
                .with_detail("billable_revoked", billable_revoked),
        )
        .await?;

        Ok(RejectionReport { delivery, released })
    }

    /// Detaches one lead from a delivery and returns it to `new`. The other
    /// leads and the delivery's `billable` flag are left as they are.
    pub async fn remove_lead(
        &self,
        ctx: &OperationContext,
        id: &DeliveryId,
        lead_id: &LeadId,
        reason: RemovalReason,
        detail: Option<&str>,
    ) -> Result<RemovalReport, EngineError> {
        let detail = detail.map(str::trim).filter(|detail| !detail.is_empty());

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.remove_in_tx(tx.conn(), ctx, id, lead_id, reason, detail).await;
        let report = tx.finish(result).await?;

        info!(
            event_name = "delivery.lead_removed",
            correlation_id = %ctx.correlation_id,
            delivery_id = %id.0,
            lead_id = %lead_id.0,
            reason = reason.as_str(),
            quota_released = report.released.quota_released,
            delivery_emptied = report.delivery_emptied,
            "lead removed from delivery"
        );
        Ok(report)
    }

    async fn remove_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        id: &DeliveryId,
        lead_id: &LeadId,
        reason: RemovalReason,
        detail: Option<&str>,
    ) -> Result<RemovalReport, EngineError> {
        let mut delivery = self.load_delivery(conn, id).await?;
        let plan = self.plan(&delivery, DeliveryCommand::RemoveLead)?;

        let links = deliveries::list_leads(conn, &delivery.id).await?;
        let link = links
            .iter()
            .find(|link| &link.lead_id == lead_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("delivery lead", lead_id.0.clone()))?;
        if link.state != DeliveryLeadState::Active {
            return Err(EngineError::Conflict(format!(
                "lead {} is already {} in delivery {}",
                lead_id.0,
                link.state.as_str(),
                delivery.id.0
            )));
        }

        let detached = deliveries::detach_lead(
            conn,
            &delivery.id,
            lead_id,
            DeliveryLeadState::Removed,
            Some(reason),
            detail,
            ctx.now,
        )
        .await?;
        if !detached {
            return Err(EngineError::Conflict(format!(
                "lead {} was detached from delivery {} concurrently",
                lead_id.0, delivery.id.0
            )));
        }

        let quota_released = self.release_link(conn, ctx, &link).await?;
        self.return_lead(conn, ctx, &link, &delivery, reason.as_str(), quota_released).await?;

        let remaining = links
            .iter()
            .filter(|other| other.state == DeliveryLeadState::Active && &other.lead_id != lead_id)
            .count();
        let delivery_emptied = remaining == 0;
        if delivery_emptied {
            delivery.outcome = Some(OutcomeDecision {
                outcome: DeliveryOutcome::Removed,
                reason: Some(reason.as_str().to_string()),
                actor: ctx.actor.clone(),
                decided_at: ctx.now,
            });
        }
        self.save(conn, ctx, &mut delivery, &plan).await?;

        let mut event = ctx
            .event(EventAction::DeliveryLeadRemoved, EntityRef::delivery(&delivery.id))
            .with_reason(reason.as_str())
            .with_related(EntityRef::lead(lead_id))
            .with_detail("remaining_leads", remaining)
            .with_detail("quota_released", quota_released);
        if let Some(detail) = detail {
            event = event.with_detail("detail", detail);
        }
        if delivery_emptied {
            event = event.with_detail("outcome", DeliveryOutcome::Removed.as_str());
        }
        events::append(conn, &event).await?;

        Ok(RemovalReport {
            delivery,
            released: ReleasedLead { lead_id: lead_id.clone(), quota_released },
            delivery_emptied,
        })
    }

    /// Fails deliveries stuck in `sending` past `sending_timeout_secs`.
    pub async fn sweep_stale_sending(
        &self,
        ctx: &OperationContext,
    ) -> Result<Vec<DeliveryId>, EngineError> {
        let cutoff = ctx.now - seconds(self.delivery.sending_timeout_secs);
        let stale = {
            let mut conn = self.pool.acquire().await?;
            deliveries::list_stale_sending(&mut conn, cutoff).await?
        };

        let mut swept = Vec::new();
        for id in stale {
            let mut tx = WriteTx::begin(&self.pool).await?;
            let result = self.time_out_in_tx(tx.conn(), ctx, &id, cutoff).await;
            if tx.finish(result).await? {
                warn!(
                    event_name = "delivery.send.timed_out",
                    correlation_id = %ctx.correlation_id,
                    delivery_id = %id.0,
                    "delivery stuck in sending marked failed"
                );
                swept.push(id);
            }
        }
        Ok(swept)
    }

    async fn time_out_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        id: &DeliveryId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut delivery = self.load_delivery(conn, id).await?;
        let started = delivery.last_attempt_at.unwrap_or(delivery.updated_at);
        if delivery.status != DeliveryStatus::Sending || started >= cutoff {
            return Ok(false);
        }

        let plan = self.plan(&delivery, DeliveryCommand::TimeOut)?;
        delivery.last_error = Some(SENDING_TIMED_OUT.to_string());
        self.save(conn, ctx, &mut delivery, &plan).await?;
        events::append(
            conn,
            &ctx.event(EventAction::DeliveryFailed, EntityRef::delivery(&delivery.id))
                .with_reason(SENDING_TIMED_OUT)
                .with_detail("attempt", delivery.send_attempts)
                .with_detail("swept", true),
        )
        .await?;
        Ok(true)
    }

    /// Re-sends failed deliveries that still have attempts left.
    ///
    /// The wait after attempt `n` is `retry_backoff_secs * 2^(n-1)`.
    pub async fn retry_failed(&self, ctx: &OperationContext) -> Result<RetryReport, EngineError> {
        let cutoff = ctx.now - seconds(self.delivery.retry_backoff_secs);
        let candidates = {
            let mut conn = self.pool.acquire().await?;
            let ids = deliveries::list_retryable_failed(
                &mut conn,
                self.delivery.max_send_attempts,
                cutoff,
            )
            .await?;
            let mut due = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(delivery) = deliveries::find(&mut conn, &id).await? {
                    due.push(delivery);
                }
            }
            due
        };

        let mut report = RetryReport::default();
        for delivery in candidates {
            let last_attempt = delivery.last_attempt_at.unwrap_or(delivery.updated_at);
            if last_attempt + self.retry_delay(delivery.send_attempts) > ctx.now {
                report.deferred += 1;
                continue;
            }

            report.attempted += 1;
            match self.send_delivery(ctx, &delivery.id, false).await {
                Ok(sent) if sent.transmitted => report.succeeded += 1,
                Ok(_) => report.failed += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        event_name = "delivery.retry.error",
                        correlation_id = %ctx.correlation_id,
                        delivery_id = %delivery.id.0,
                        error = %error,
                        "automatic retry could not start"
                    );
                }
            }
        }
        Ok(report)
    }

    fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        seconds(self.delivery.retry_backoff_secs.saturating_mul(1_u64 << exponent))
    }

    async fn start_send(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        id: &DeliveryId,
        force: bool,
    ) -> Result<Shipment, EngineError> {
        let mut delivery = self.load_delivery(conn, id).await?;
        if delivery.status == DeliveryStatus::PendingCsv {
            self.prepare_in_tx(conn, ctx, &mut delivery).await?;
        }

        let plan = self.plan(&delivery, DeliveryCommand::StartSend { force })?;
        let order = orders::find(conn, &delivery.order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("order", delivery.order_id.0.clone()))?;

        // Leads may have been removed since preparation.
        let active = self.active_leads(conn, &delivery.id).await?;
        let payload = build_payload(&delivery, &active)?;
        delivery.payload_json = Some(payload.json.clone());
        delivery.payload_hash = Some(payload.hash.clone());
        if plan.counts_attempt {
            delivery.send_attempts += 1;
        }
        delivery.last_attempt_at = Some(ctx.now);
        self.save(conn, ctx, &mut delivery, &plan).await?;

        events::append(
            conn,
            &ctx.event(EventAction::DeliverySending, EntityRef::delivery(&delivery.id))
                .with_related(EntityRef::order(&delivery.order_id))
                .with_detail("attempt", delivery.send_attempts)
                .with_detail("force", force)
                .with_detail("payload_hash", &payload.hash),
        )
        .await?;

        Ok(Shipment {
            delivery_id: delivery.id,
            order_id: delivery.order_id,
            client_id: delivery.client_id,
            channels: order.channels,
            payload_json: payload.json,
            payload_hash: payload.hash,
            attempt: delivery.send_attempts,
        })
    }

    async fn finish_send(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        id: &DeliveryId,
        attempt: u32,
        shipped: Result<TransportReceipt, TransportError>,
    ) -> Result<SendReport, EngineError> {
        let mut delivery = self.load_delivery(conn, id).await?;
        // Sent with the same attempt count means this was a resend.
        let resend = delivery.status == DeliveryStatus::Sent;
        let in_flight = delivery.send_attempts == attempt
            && match delivery.status {
                DeliveryStatus::Sending => true,
                DeliveryStatus::Sent => {
                    matches!(delivery.outcome_kind(), None | Some(DeliveryOutcome::Accepted))
                }
                _ => false,
            };
        if !in_flight {
            let error = match &shipped {
                Ok(_) => "transmission succeeded after the delivery moved on".to_string(),
                Err(error) => error.to_string(),
            };
            warn!(
                event_name = "delivery.send.discarded",
                correlation_id = %ctx.correlation_id,
                delivery_id = %id.0,
                attempt,
                status = delivery.status.as_str(),
                "late transport result discarded"
            );
            return Ok(SendReport { delivery, transmitted: false, error: Some(error) });
        }

        match shipped {
            Ok(receipt) => {
                let plan = self.plan(&delivery, DeliveryCommand::CompleteSend)?;
                delivery.sent_to = receipt.sent_to;
                delivery.sent_at = Some(ctx.now);
                delivery.last_error = None;
                let first_success = delivery.billable_set_at.is_none();
                if first_success {
                    delivery.billable = true;
                    delivery.billable_set_at = Some(ctx.now);
                }
                self.save(conn, ctx, &mut delivery, &plan).await?;

                let delivered = self.mark_leads_delivered(conn, ctx, &delivery).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::DeliverySent, EntityRef::delivery(&delivery.id))
                        .with_related(EntityRef::order(&delivery.order_id))
                        .with_detail("attempt", attempt)
                        .with_detail("resend", resend)
                        .with_detail("sent_to", delivery.sent_to.join(","))
                        .with_detail("billable", delivery.billable)
                        .with_detail("leads_delivered", delivered),
                )
                .await?;
                Ok(SendReport { delivery, transmitted: true, error: None })
            }
            Err(error) => {
                let command = match error {
                    TransportError::Timeout(_) if !resend => DeliveryCommand::TimeOut,
                    _ => DeliveryCommand::FailSend,
                };
                let plan = self.plan(&delivery, command)?;
                let message = error.to_string();
                delivery.last_error = Some(message.clone());
                self.save(conn, ctx, &mut delivery, &plan).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::DeliveryFailed, EntityRef::delivery(&delivery.id))
                        .with_reason(message.as_str())
                        .with_related(EntityRef::order(&delivery.order_id))
                        .with_detail("attempt", attempt)
                        .with_detail("resend", resend)
                        .with_detail("status", delivery.status.as_str())
                        .with_detail("attempts_left", self.delivery.max_send_attempts.saturating_sub(attempt)),
                )
                .await?;
                Ok(SendReport { delivery, transmitted: false, error: Some(message) })
            }
        }
    }

    async fn mark_leads_delivered(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        delivery: &Delivery,
    ) -> Result<u32, EngineError> {
        let mut delivered = 0;
        for mut lead in self.active_leads(conn, &delivery.id).await? {
            let current = lead.current_delivery_id.as_ref() == Some(&delivery.id);
            if lead.status != LeadStatus::Routed || !current {
                continue;
            }
            lead.transition_to(LeadStatus::Livre, None, ctx.now)?;
            leads::save_state(conn, &lead).await?;
            events::append(
                conn,
                &ctx.event(EventAction::LeadDelivered, EntityRef::lead(&lead.id))
                    .with_related(EntityRef::delivery(&delivery.id))
                    .with_related(EntityRef::order(&delivery.order_id)),
            )
            .await?;
            delivered += 1;
        }
        Ok(delivered)
    }

    async fn prepare_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        delivery: &mut Delivery,
    ) -> Result<(), EngineError> {
        let plan = self.plan(delivery, DeliveryCommand::Prepare)?;
        let active = self.active_leads(conn, &delivery.id).await?;
        if active.is_empty() {
            return Err(EngineError::Conflict(format!(
                "delivery {} has no active leads to prepare",
                delivery.id.0
            )));
        }

        let payload = build_payload(delivery, &active)?;
        delivery.payload_json = Some(payload.json);
        delivery.payload_hash = Some(payload.hash.clone());
        self.save(conn, ctx, delivery, &plan).await?;

        events::append(
            conn,
            &ctx.event(EventAction::DeliveryPrepared, EntityRef::delivery(&delivery.id))
                .with_detail("payload_hash", &payload.hash)
                .with_detail("lead_count", active.len()),
        )
        .await?;
        Ok(())
    }

    /// Gives back the quota a detached link consumed, at most once.
    ///
    /// Closed weeks are never touched: the counter is only decremented when
    /// the link's week is still the current one.
    async fn release_link(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        link: &DeliveryLead,
    ) -> Result<bool, EngineError> {
        if !deliveries::mark_released(conn, &link.delivery_id, &link.lead_id, ctx.now).await? {
            return Ok(false);
        }
        if link.week_key != self.week_of(ctx.now) {
            return Ok(false);
        }
        Ok(quota::release(conn, &link.order_id, &link.week_key, link.slot, ctx.now).await?)
    }

    async fn return_lead(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        link: &DeliveryLead,
        delivery: &Delivery,
        cause: &str,
        quota_released: bool,
    ) -> Result<(), EngineError> {
        let mut lead = self.load_lead(conn, &link.lead_id).await?;
        let current = lead.current_delivery_id.as_ref() == Some(&delivery.id);
        if !current || !lead.status.is_allocated() {
            return Ok(());
        }

        let from = lead.status;
        lead.release_to_new(ctx.now)?;
        leads::save_state(conn, &lead).await?;
        events::append(
            conn,
            &ctx.event(EventAction::LeadReleased, EntityRef::lead(&lead.id))
                .with_reason(cause)
                .with_related(EntityRef::delivery(&delivery.id))
                .with_related(EntityRef::order(&link.order_id))
                .with_detail("from_status", from.as_str())
                .with_detail("quota_released", quota_released),
        )
        .await?;
        Ok(())
    }

    async fn active_leads(
        &self,
        conn: &mut SqliteConnection,
        id: &DeliveryId,
    ) -> Result<Vec<Lead>, EngineError> {
        let ids: Vec<LeadId> = deliveries::list_leads(conn, id)
            .await?
            .into_iter()
            .filter(|link| link.state == DeliveryLeadState::Active)
            .map(|link| link.lead_id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(leads::find_many(conn, &ids).await?)
    }

    pub(crate) async fn load_delivery(
        &self,
        conn: &mut SqliteConnection,
        id: &DeliveryId,
    ) -> Result<Delivery, EngineError> {
        deliveries::find(conn, id).await?.ok_or_else(|| EngineError::not_found("delivery", id.0.clone()))
    }

    fn plan(&self, delivery: &Delivery, command: DeliveryCommand) -> Result<TransitionPlan, EngineError> {
        Ok(lifecycle::plan(
            DeliveryState::from(delivery),
            command,
            self.delivery.max_send_attempts,
        )?)
    }

    /// Applies `plan.to` and persists, guarded on `plan.from`.
    async fn save(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        delivery: &mut Delivery,
        plan: &TransitionPlan,
    ) -> Result<(), EngineError> {
        delivery.status = plan.to;
        delivery.updated_at = ctx.now;
        if !deliveries::save_transition(conn, delivery, plan.from).await? {
            return Err(EngineError::Conflict(format!(
                "delivery {} changed while {} was applied",
                delivery.id.0,
                plan.command.as_str()
            )));
        }
        Ok(())
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000))
}
