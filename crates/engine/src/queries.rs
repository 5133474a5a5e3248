//! Read-only projections. None of these open a write transaction.

use std::collections::HashMap;

use serde::Serialize;

use leadflow_core::audit::{EventFilter, EventRecord};
use leadflow_core::domain::delivery::{Delivery, DeliveryFilter, DeliveryId, DeliveryLead};
use leadflow_core::domain::lead::{Lead, LeadFilter, LeadId};
use leadflow_core::domain::order::OrderId;
use leadflow_core::domain::quota::{QuotaLedgerEntry, WeekKey};
use leadflow_db::repositories::{deliveries, events, leads, quota};

use crate::engine::LeadEngine;
use crate::error::EngineError;

const STATS_HISTORY_WEEKS: u32 = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeadDetail {
    pub lead: Lead,
    /// Every delivery the lead was ever attached to, oldest first.
    pub deliveries: Vec<DeliveryLead>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryDetail {
    pub delivery: Delivery,
    pub leads: Vec<DeliveryLead>,
}

/// An event with its position in the append-only log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggedEvent {
    pub seq: i64,
    #[serde(flatten)]
    pub record: EventRecord,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WeekStats {
    pub week_key: WeekKey,
    pub delivered: u32,
    pub lb_delivered: u32,
    pub quota: u32,
    pub lb_cap: u32,
    pub remaining: u32,
}

impl WeekStats {
    fn from_entry(week_key: WeekKey, entry: Option<&QuotaLedgerEntry>, quota: u32, lb_cap: u32) -> Self {
        let delivered = entry.map_or(0, |entry| entry.delivered_count);
        Self {
            week_key,
            delivered,
            lb_delivered: entry.map_or(0, |entry| entry.lb_delivered_count),
            quota,
            lb_cap,
            remaining: quota.saturating_sub(delivered),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderStats {
    pub order_id: OrderId,
    pub current_week: WeekStats,
    /// The four weeks before the current one, most recent first.
    pub last_4_weeks: Vec<WeekStats>,
    pub total_delivered: u64,
}

impl LeadEngine {
    pub async fn get_lead(&self, id: &LeadId) -> Result<LeadDetail, EngineError> {
        let mut conn = self.pool.acquire().await?;
        let lead = self.load_lead(&mut conn, id).await?;
        let deliveries = deliveries::history_for_lead(&mut conn, id).await?;
        Ok(LeadDetail { lead, deliveries })
    }

    pub async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(leads::list(&mut conn, filter).await?)
    }

    pub async fn get_delivery(&self, id: &DeliveryId) -> Result<DeliveryDetail, EngineError> {
        let mut conn = self.pool.acquire().await?;
        let delivery = self.load_delivery(&mut conn, id).await?;
        let leads = deliveries::list_leads(&mut conn, id).await?;
        Ok(DeliveryDetail { delivery, leads })
    }

    pub async fn list_deliveries(&self, filter: &DeliveryFilter) -> Result<Vec<Delivery>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        Ok(deliveries::list(&mut conn, filter).await?)
    }

    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<LoggedEvent>, EngineError> {
        let mut conn = self.pool.acquire().await?;
        let stored = events::list(&mut conn, filter).await?;
        Ok(stored.into_iter().map(|event| LoggedEvent { seq: event.seq, record: event.record }).collect())
    }

    /// Ledger projection for one order as of `now`.
    ///
    /// Weeks without a ledger row report zero deliveries. Past weeks show
    /// the caps stored on their row, the current week the caps in force now.
    pub async fn get_order_stats(
        &self,
        id: &OrderId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<OrderStats, EngineError> {
        let mut conn = self.pool.acquire().await?;
        let order = self.load_order(&mut conn, id).await?;
        let current = self.week_of(now);
        let caps = self.caps_for(&order, now);

        let history: HashMap<WeekKey, QuotaLedgerEntry> = quota::history(&mut conn, id, STATS_HISTORY_WEEKS + 1)
            .await?
            .into_iter()
            .map(|entry| (entry.week_key.clone(), entry))
            .collect();

        let current_week = WeekStats::from_entry(current.clone(), history.get(&current), caps.quota, caps.lb_cap);
        let last_4_weeks = (1..=STATS_HISTORY_WEEKS)
            .filter_map(|weeks| current.previous(weeks))
            .map(|week| {
                let entry = history.get(&week);
                let (quota, lb_cap) = entry.map_or((order.quota_semaine, 0), |entry| (entry.quota_cap, entry.lb_cap));
                WeekStats::from_entry(week, entry, quota, lb_cap)
            })
            .collect();
        let total_delivered = quota::total_delivered(&mut conn, id).await?;

        Ok(OrderStats { order_id: id.clone(), current_week, last_4_weeks, total_delivered })
    }
}
