//! One-shot runs of the jobs the server scheduler performs on a timer.

use leadflow_core::domain::order::EntityCode;
use leadflow_engine::OperationContext;
use serde_json::json;

use crate::commands::{maintenance_engine, with_pool, CommandResult};

pub fn reroute(entity: Option<String>) -> CommandResult {
    let result = with_pool("reroute", |config, pool| async move {
        let engine = maintenance_engine(&config, pool);
        let ctx = OperationContext::system("cli");
        let entity = entity.map(|entity| EntityCode(entity.trim().to_string()));
        engine.reevaluate(&ctx, entity.as_ref()).await.map_err(|error| ("reevaluation", error.to_string(), 6u8))
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "reroute",
            format!("examined {} leads, routed {}", report.examined, report.routed),
            serde_json::to_value(&report).ok(),
        ),
        Err(failure) => failure,
    }
}

pub fn rollover() -> CommandResult {
    let result = with_pool("rollover", |config, pool| async move {
        let engine = maintenance_engine(&config, pool);
        let ctx = OperationContext::system("cli");
        engine.rollover_if_due(&ctx).await.map_err(|error| ("rollover", error.to_string(), 6u8))
    });

    match result {
        Ok(report) => {
            let message = if report.rolled {
                format!("rolled quota week to {}", report.current_week)
            } else {
                format!("quota week {} already current", report.current_week)
            };
            CommandResult::success_with("rollover", message, serde_json::to_value(&report).ok())
        }
        Err(failure) => failure,
    }
}

pub fn sweep() -> CommandResult {
    let result = with_pool("sweep", |config, pool| async move {
        let engine = maintenance_engine(&config, pool);
        let ctx = OperationContext::system("cli");
        engine.sweep_stale_sending(&ctx).await.map_err(|error| ("sweep", error.to_string(), 6u8))
    });

    match result {
        Ok(swept) => {
            let ids: Vec<&str> = swept.iter().map(|id| id.0.as_str()).collect();
            CommandResult::success_with(
                "sweep",
                format!("failed {} deliveries stuck in sending", swept.len()),
                Some(json!({ "swept": ids })),
            )
        }
        Err(failure) => failure,
    }
}
