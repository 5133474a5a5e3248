use leadflow_db::{DemoSeedDataset, SeededOrder};

use crate::commands::{with_pool, CommandResult};

pub fn run() -> CommandResult {
    let result = with_pool("seed", |_config, pool| async move {
        let seed_result =
            DemoSeedDataset::load(&pool).await.map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification =
            DemoSeedDataset::verify(&pool).await.map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed_checks), 6u8));
        }

        Ok(seed_result.orders_seeded)
    });

    match result {
        Ok(orders) => CommandResult::success("seed", summary(&orders)),
        Err(failure) => failure,
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed orders failed to load".to_string()
    } else {
        format!("Seed verification failed for orders: {}", failed_checks.join(", "))
    }
}

fn summary(orders: &[SeededOrder]) -> String {
    let lines: Vec<String> = orders
        .iter()
        .map(|order| format!("  - {}: {} ({})", order.entity, order.order_id, order.description))
        .collect();
    format!("demo order book loaded ({} orders):\n{}", orders.len(), lines.join("\n"))
}
