use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use leadflow_core::config::{AppConfig, DeliveryConfig, RoutingConfig};
use leadflow_core::dedup::DuplicateDetector;
use leadflow_core::domain::delivery::DeliveryId;
use leadflow_core::domain::lead::LeadId;
use leadflow_core::domain::order::Order;
use leadflow_core::domain::quota::{QuotaCaps, WeekKey};
use leadflow_core::transport::DeliveryTransport;
use leadflow_db::DbPool;

/// Routing, quota and delivery services over one database.
///
/// Operations live in separate `impl` blocks: intake, routing, delivery,
/// rollover, orders and queries. Each mutating operation runs in its own
/// `WriteTx`; the transport call of a send is the only step made outside a
/// transaction.
#[derive(Clone)]
pub struct LeadEngine {
    pub(crate) pool: DbPool,
    pub(crate) routing: RoutingConfig,
    pub(crate) delivery: DeliveryConfig,
    pub(crate) transport: Arc<dyn DeliveryTransport>,
}

impl LeadEngine {
    pub fn new(pool: DbPool, config: &AppConfig, transport: Arc<dyn DeliveryTransport>) -> Self {
        Self::from_parts(pool, config.routing.clone(), config.delivery.clone(), transport)
    }

    pub fn from_parts(
        pool: DbPool,
        routing: RoutingConfig,
        delivery: DeliveryConfig,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        Self { pool, routing, delivery, transport }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn routing_config(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn delivery_config(&self) -> &DeliveryConfig {
        &self.delivery
    }

    pub(crate) fn week_of(&self, at: DateTime<Utc>) -> WeekKey {
        self.routing.week_boundary().week_key(at)
    }

    pub(crate) fn caps_for(&self, order: &Order, now: DateTime<Utc>) -> QuotaCaps {
        QuotaCaps::for_order(order, now, self.routing.week_boundary(), self.routing.mid_week_quota)
    }

    pub(crate) fn detector(&self) -> DuplicateDetector {
        DuplicateDetector::new(self.routing.dedup_window_days, self.routing.double_submit_window_secs)
    }
}

impl std::fmt::Debug for LeadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadEngine")
            .field("routing", &self.routing)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

pub(crate) fn new_lead_id() -> LeadId {
    LeadId(format!("lead-{}", Uuid::new_v4()))
}

pub(crate) fn new_delivery_id() -> DeliveryId {
    DeliveryId(format!("dlv-{}", Uuid::new_v4()))
}
