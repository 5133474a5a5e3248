use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

/// Orders shipped in the demo seed, with the entity each belongs to.
const SEED_ORDERS: &[SeedOrderContract] = &[
    SeedOrderContract {
        order_id: "ord-north-pac-001",
        entity: "north",
        product: "pac",
        quota_semaine: 40,
        on_hold: false,
        description: "North heat-pump order, highest priority",
    },
    SeedOrderContract {
        order_id: "ord-north-pac-002",
        entity: "north",
        product: "pac",
        quota_semaine: 15,
        on_hold: false,
        description: "North heat-pump fallback for 92 and 78",
    },
    SeedOrderContract {
        order_id: "ord-north-sol-001",
        entity: "north",
        product: "solaire",
        quota_semaine: 25,
        on_hold: false,
        description: "North solar order covering every department",
    },
    SeedOrderContract {
        order_id: "ord-south-pac-001",
        entity: "south",
        product: "pac",
        quota_semaine: 30,
        on_hold: true,
        description: "South heat-pump order held by the client",
    },
    SeedOrderContract {
        order_id: "ord-south-all-001",
        entity: "south",
        product: "*",
        quota_semaine: 10,
        on_hold: false,
        description: "South catch-all order, lowest priority",
    },
];

/// Demo order book used by `leadflow seed` and local smoke runs.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Loads the demo orders. Existing rows with the same ids are left alone.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let orders_seeded = SEED_ORDERS
            .iter()
            .map(|order| SeededOrder {
                order_id: order.order_id,
                entity: order.entity,
                description: order.description,
            })
            .collect();

        Ok(SeedResult { orders_seeded })
    }

    /// Checks that every demo order exists with its contracted shape.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for order in SEED_ORDERS {
            let matches: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM client_order
                    WHERE id = ?1 AND entity = ?2 AND product = ?3 AND quota_semaine = ?4 AND on_hold = ?5
                 )",
            )
            .bind(order.order_id)
            .bind(order.entity)
            .bind(order.product)
            .bind(i64::from(order.quota_semaine))
            .bind(order.on_hold)
            .fetch_one(pool)
            .await?;
            checks.push((order.order_id, matches == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedOrderContract {
    order_id: &'static str,
    entity: &'static str,
    product: &'static str,
    quota_semaine: u32,
    on_hold: bool,
    description: &'static str,
}

#[derive(Debug, Clone)]
pub struct SeedResult {
    pub orders_seeded: Vec<SeededOrder>,
}

#[derive(Debug, Clone)]
pub struct SeededOrder {
    pub order_id: &'static str,
    pub entity: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::order::{EntityCode, OrderId};

    use super::DemoSeedDataset;
    use crate::repositories::orders;
    use crate::repositories::testing::setup_pool;

    #[test]
    fn sql_fixture_only_touches_the_order_book() {
        assert!(DemoSeedDataset::SQL.contains("INSERT OR IGNORE INTO client_order"));
        assert!(!DemoSeedDataset::SQL.contains("event_log"));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = setup_pool().await;

        let first = DemoSeedDataset::load(&pool).await.expect("first load");
        DemoSeedDataset::load(&pool).await.expect("second load");
        assert_eq!(first.orders_seeded.len(), 5);

        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        let mut conn = pool.acquire().await.expect("acquire");
        let south = orders::list_for_entity(&mut conn, &EntityCode("south".to_string()))
            .await
            .expect("south orders");
        assert_eq!(south.len(), 2);
        let held = orders::find(&mut conn, &OrderId("ord-south-pac-001".to_string()))
            .await
            .expect("find")
            .expect("held order");
        assert!(held.on_hold);
    }
}
