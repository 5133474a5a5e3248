//! Periodic maintenance: week rollover, stale-send sweep, retries and
//! re-evaluation of parked leads.
//!
//! Each step runs on its own; a failing step is logged and the tick carries on.

use std::time::Duration;

use leadflow_engine::{LeadEngine, OperationContext, ReevaluationReport, RetryReport, RolloverReport};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub rollover: Option<RolloverReport>,
    pub swept: usize,
    pub retry: RetryReport,
    pub reevaluation: Option<ReevaluationReport>,
}

/// Runs one maintenance pass as `system:scheduler`.
pub async fn run_tick(engine: &LeadEngine, ctx: &OperationContext) -> TickReport {
    let mut report = TickReport::default();

    match engine.rollover_if_due(ctx).await {
        Ok(rollover) => report.rollover = Some(rollover),
        Err(error) => warn_step(ctx, "rollover", &error),
    }

    match engine.sweep_stale_sending(ctx).await {
        Ok(swept) => report.swept = swept.len(),
        Err(error) => warn_step(ctx, "sweep", &error),
    }

    match engine.retry_failed(ctx).await {
        Ok(retry) => report.retry = retry,
        Err(error) => warn_step(ctx, "retry", &error),
    }

    // A rollover already re-evaluated the whole queue.
    let rolled = report.rollover.as_ref().is_some_and(|rollover| rollover.rolled);
    if !rolled {
        match engine.reevaluate(ctx, None).await {
            Ok(reevaluation) => report.reevaluation = Some(reevaluation),
            Err(error) => warn_step(ctx, "reevaluate", &error),
        }
    }

    report
}

fn warn_step(ctx: &OperationContext, step: &'static str, error: &leadflow_engine::EngineError) {
    warn!(
        event_name = "scheduler.step.failed",
        correlation_id = %ctx.correlation_id,
        step,
        error = %error,
        "scheduled step failed"
    );
}

/// Ticks every `interval` until `shutdown` flips to true.
pub fn spawn(engine: LeadEngine, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ctx = OperationContext::system("scheduler");
                    let report = run_tick(&engine, &ctx).await;
                    info!(
                        event_name = "scheduler.tick.completed",
                        correlation_id = %ctx.correlation_id,
                        rolled = report.rollover.as_ref().is_some_and(|rollover| rollover.rolled),
                        swept = report.swept,
                        retried = report.retry.attempted,
                        rerouted = report.reevaluation.as_ref().map_or(0, |reevaluation| reevaluation.routed),
                        "scheduler tick completed"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(event_name = "scheduler.stopped", correlation_id = "shutdown", "scheduler stopped");
                        break;
                    }
                }
            }
        }
    })
}
