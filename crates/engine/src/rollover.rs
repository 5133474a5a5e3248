//! Weekly rollover and re-evaluation of parked leads.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use leadflow_core::audit::{EntityRef, EventAction};
use leadflow_core::domain::order::EntityCode;
use leadflow_core::domain::quota::WeekKey;
use leadflow_db::repositories::engine_state::{self, CURRENT_WEEK_KEY};
use leadflow_db::repositories::events;
use leadflow_db::repositories::leads::{self, QueueCursor};
use leadflow_db::WriteTx;

use crate::context::OperationContext;
use crate::engine::LeadEngine;
use crate::error::EngineError;
use crate::routing::{log_routing, RoutingOutcome};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReevaluationReport {
    pub examined: u32,
    pub routed: u32,
    pub still_parked: u32,
    pub failed: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RolloverReport {
    pub previous_week: Option<WeekKey>,
    pub current_week: WeekKey,
    /// False when the marker already pointed at this week or another caller advanced it.
    pub rolled: bool,
    pub reevaluation: Option<ReevaluationReport>,
}

impl LeadEngine {
    /// Re-routes every routable lead, oldest first, one transaction per lead.
    ///
    /// Paging is keyset-based on `(submitted_at, id)`: leads that stay
    /// parked are behind the cursor and cannot starve the rest of the queue.
    pub async fn reevaluate(
        &self,
        ctx: &OperationContext,
        entity: Option<&EntityCode>,
    ) -> Result<ReevaluationReport, EngineError> {
        let batch = self.routing.reevaluation_batch_size.max(1);
        let mut report = ReevaluationReport::default();
        let mut cursor: Option<QueueCursor> = None;

        loop {
            let page = {
                let mut conn = self.pool.acquire().await?;
                leads::list_routable(&mut conn, entity, cursor.as_ref(), batch).await?
            };
            let Some(last) = page.last().cloned() else {
                break;
            };

            for entry in &page {
                report.examined += 1;
                match self.reroute_lead_quietly(ctx, entry).await {
                    Ok(RoutingOutcome::Routed { .. }) => report.routed += 1,
                    Ok(_) => report.still_parked += 1,
                    Err(error) => {
                        report.failed += 1;
                        warn!(
                            event_name = "rollover.reevaluate.lead_failed",
                            correlation_id = %ctx.correlation_id,
                            lead_id = %entry.id.0,
                            error = %error,
                            "lead re-evaluation failed"
                        );
                    }
                }
            }

            if page.len() < batch as usize {
                break;
            }
            cursor = Some(last);
        }

        info!(
            event_name = "rollover.reevaluate.completed",
            correlation_id = %ctx.correlation_id,
            entity = entity.map_or("*", |entity| entity.0.as_str()),
            examined = report.examined,
            routed = report.routed,
            still_parked = report.still_parked,
            failed = report.failed,
            "parked leads re-evaluated"
        );
        Ok(report)
    }

    /// Advances the week marker once per week, then re-evaluates parked leads.
    ///
    /// Only the caller whose compare-and-set succeeds emits `quota.week_rolled`
    /// and runs the re-evaluation; counters of the new week start at zero
    /// because ledger rows are keyed by week.
    pub async fn rollover_if_due(&self, ctx: &OperationContext) -> Result<RolloverReport, EngineError> {
        let current = self.week_of(ctx.now);

        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.advance_marker(tx.conn(), ctx, &current).await;
        let (previous, rolled) = tx.finish(result).await?;

        if !rolled {
            return Ok(RolloverReport {
                previous_week: previous,
                current_week: current,
                rolled: false,
                reevaluation: None,
            });
        }

        info!(
            event_name = "rollover.week.rolled",
            correlation_id = %ctx.correlation_id,
            previous_week = previous.as_ref().map_or("", |week| week.0.as_str()),
            current_week = %current,
            "quota week rolled over"
        );

        let reevaluation = self.reevaluate(ctx, None).await?;
        Ok(RolloverReport {
            previous_week: previous,
            current_week: current,
            rolled: true,
            reevaluation: Some(reevaluation),
        })
    }

    async fn advance_marker(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
        current: &WeekKey,
    ) -> Result<(Option<WeekKey>, bool), EngineError> {
        let previous = engine_state::get(conn, CURRENT_WEEK_KEY).await?.map(WeekKey);
        if previous.as_ref().is_some_and(|previous| previous >= current) {
            return Ok((previous, false));
        }

        let advanced = engine_state::compare_and_set(
            conn,
            CURRENT_WEEK_KEY,
            previous.as_ref().map(|week| week.0.as_str()),
            &current.0,
            ctx.now,
        )
        .await?;
        if !advanced {
            return Ok((previous, false));
        }

        let mut event = ctx
            .event(EventAction::QuotaWeekRolled, EntityRef::system("quota"))
            .with_detail("current_week", current);
        if let Some(previous) = &previous {
            event = event.with_detail("previous_week", previous);
        }
        events::append(conn, &event).await?;
        Ok((previous, true))
    }

    async fn reroute_lead_quietly(
        &self,
        ctx: &OperationContext,
        entry: &QueueCursor,
    ) -> Result<RoutingOutcome, EngineError> {
        let mut tx = WriteTx::begin(&self.pool).await?;
        let result = self.reroute_in_tx(tx.conn(), ctx, &entry.id).await;
        let outcome = tx.finish(result).await?;
        if matches!(outcome, RoutingOutcome::Routed { .. }) {
            log_routing(ctx, &entry.id, &outcome);
        }
        Ok(outcome)
    }
}
