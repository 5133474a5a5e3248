use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use leadflow_core::audit::{EntityRef, EventAction};
use leadflow_core::dedup::{DedupCandidate, DedupDecision};
use leadflow_core::domain::delivery::DeliveryId;
use leadflow_core::domain::lead::{Lead, LeadId, LeadPayload, LeadStatus};
use leadflow_core::domain::order::{EntityCode, OrderId};
use leadflow_core::intake::{check_submission, LeadSubmission, SubmissionCheck};
use leadflow_db::repositories::{events, leads};
use leadflow_db::WriteTx;

use crate::context::OperationContext;
use crate::engine::{new_lead_id, LeadEngine};
use crate::error::EngineError;
use crate::routing::RoutingOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeOutcome {
    Invalid,
    /// Same session posted again; the earlier lead is returned.
    DoubleSubmit,
    Duplicate,
    /// An undelivered lead with this phone already exists; nothing was stored.
    DuplicateUndelivered,
    Routed,
    Parked,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub lead_id: LeadId,
    pub outcome: IntakeOutcome,
    pub status: LeadStatus,
    pub reason: Option<String>,
    pub order_id: Option<OrderId>,
    pub delivery_id: Option<DeliveryId>,
}

impl SubmitOutcome {
    fn from_lead(lead: &Lead, outcome: IntakeOutcome) -> Self {
        Self {
            lead_id: lead.id.clone(),
            outcome,
            status: lead.status,
            reason: lead.status_reason.clone(),
            order_id: lead.current_order_id.clone(),
            delivery_id: lead.current_delivery_id.clone(),
        }
    }
}

struct NewLead {
    payload: LeadPayload,
    phone: Option<String>,
    entity: Option<EntityCode>,
    lb_eligible: bool,
    status: LeadStatus,
    status_reason: Option<String>,
    duplicate_of: Option<LeadId>,
}

impl NewLead {
    fn into_lead(self, ctx: &OperationContext) -> Lead {
        Lead {
            id: new_lead_id(),
            payload: self.payload,
            phone: self.phone,
            entity_locked: self.entity.is_some(),
            entity: self.entity,
            lb_eligible: self.lb_eligible,
            status: self.status,
            status_reason: self.status_reason,
            duplicate_of: self.duplicate_of,
            current_order_id: None,
            current_delivery_id: None,
            submitted_at: ctx.now,
            updated_at: ctx.now,
        }
    }
}

impl LeadEngine {
    /// Validates, de-duplicates and routes one submission as a single unit.
    ///
    /// The duplicate lookup and the routing decision share one `BEGIN
    /// IMMEDIATE` transaction, so a concurrent submission of the same phone
    /// waits for this one to commit and then sees it as a prior lead.
    pub async fn submit_lead(
        &self,
        ctx: &OperationContext,
        submission: &LeadSubmission,
    ) -> Result<SubmitOutcome, EngineError> {
        let check = check_submission(submission);

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.submit_in_tx(tx.conn(), ctx, check).await;
        let outcome = tx.finish(result).await?;

        info!(
            event_name = "intake.lead.classified",
            correlation_id = %ctx.correlation_id,
            lead_id = %outcome.lead_id.0,
            outcome = ?outcome.outcome,
            status = outcome.status.as_str(),
            reason = outcome.reason.as_deref().unwrap_or(""),
            source = submission.source.as_deref().unwrap_or(""),
            "lead submission processed"
        );
        Ok(outcome)
    }

    async fn submit_in_tx(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        check: SubmissionCheck,
    ) -> Result<SubmitOutcome, EngineError> {
        let valid = match check {
            SubmissionCheck::Invalid(rejected) => {
                let lead = NewLead {
                    payload: rejected.payload,
                    phone: rejected.phone,
                    entity: rejected.entity,
                    lb_eligible: rejected.lb_eligible,
                    status: LeadStatus::Invalid,
                    status_reason: Some(rejected.reason.clone()),
                    duplicate_of: None,
                }
                .into_lead(ctx);
                leads::insert(conn, &lead).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::LeadInvalid, EntityRef::lead(&lead.id))
                        .with_reason(rejected.reason)
                        .with_detail("source", &lead.payload.source),
                )
                .await?;
                return Ok(SubmitOutcome::from_lead(&lead, IntakeOutcome::Invalid));
            }
            SubmissionCheck::Valid(valid) => valid,
        };

        let detector = self.detector();
        let priors =
            leads::find_priors_by_phone(conn, &valid.phone, detector.window_start(ctx.now)).await?;
        let decision = detector.classify(
            &DedupCandidate {
                department: &valid.payload.department,
                session_id: valid.payload.session_id.as_deref(),
                submitted_at: ctx.now,
            },
            &priors,
        );
        let reason_code = decision.reason_code();

        match decision {
            DedupDecision::DoubleSubmit { original } => {
                let original = self.load_lead(conn, &original).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::LeadDoubleSubmit, EntityRef::lead(&original.id))
                        .with_reason(reason_code)
                        .with_detail("source", &valid.payload.source),
                )
                .await?;
                Ok(SubmitOutcome::from_lead(&original, IntakeOutcome::DoubleSubmit))
            }
            DedupDecision::Duplicate { original } => {
                let lead = NewLead {
                    payload: valid.payload,
                    phone: Some(valid.phone),
                    entity: valid.entity,
                    lb_eligible: valid.lb_eligible,
                    status: LeadStatus::Duplicate,
                    status_reason: Some(reason_code.to_string()),
                    duplicate_of: Some(original.clone()),
                }
                .into_lead(ctx);
                leads::insert(conn, &lead).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::LeadDuplicate, EntityRef::lead(&lead.id))
                        .with_reason(reason_code)
                        .with_related(EntityRef::lead(&original)),
                )
                .await?;
                Ok(SubmitOutcome::from_lead(&lead, IntakeOutcome::Duplicate))
            }
            DedupDecision::UndeliveredDuplicate { original, original_status } => {
                let original = self.load_lead(conn, &original).await?;
                events::append(
                    conn,
                    &ctx.event(EventAction::LeadDuplicateUndelivered, EntityRef::lead(&original.id))
                        .with_reason(reason_code)
                        .with_detail("original_status", original_status.as_str())
                        .with_detail("source", &valid.payload.source),
                )
                .await?;
                Ok(SubmitOutcome::from_lead(&original, IntakeOutcome::DuplicateUndelivered))
            }
            DedupDecision::Unique => {
                let mut lead = NewLead {
                    payload: valid.payload,
                    phone: Some(valid.phone),
                    entity: valid.entity,
                    lb_eligible: valid.lb_eligible,
                    status: LeadStatus::New,
                    status_reason: None,
                    duplicate_of: None,
                }
                .into_lead(ctx);
                leads::insert(conn, &lead).await?;

                let routing = self.route_in_tx(conn, ctx, &mut lead).await?;
                let outcome = match routing {
                    RoutingOutcome::Routed { .. } => IntakeOutcome::Routed,
                    RoutingOutcome::Parked { .. } | RoutingOutcome::AlreadyAllocated { .. } => {
                        IntakeOutcome::Parked
                    }
                };
                Ok(SubmitOutcome::from_lead(&lead, outcome))
            }
        }
    }

    pub(crate) async fn load_lead(
        &self,
        conn: &mut SqliteConnection,
        id: &LeadId,
    ) -> Result<Lead, EngineError> {
        leads::find(conn, id).await?.ok_or_else(|| EngineError::not_found("lead", id.0.clone()))
    }
}
