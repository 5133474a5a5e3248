//! Order eligibility and ranking.
//!
//! The matcher is pure: it classifies the order book for one lead and ranks
//! the open candidates. Capacity is only claimed by the quota ledger's
//! compare-and-set, so the ranking may be stale by the time a slot is taken;
//! the caller walks the ranked list until one claim succeeds.

use std::cmp::Ordering;

use crate::domain::lead::LeadStatus;
use crate::domain::order::Order;
use crate::domain::quota::{QuotaCaps, QuotaSlot};

pub const REASON_ENTITY_UNRESOLVED: &str = "entity_unresolved";
pub const REASON_NO_DEPARTMENT_MAPPING: &str = "no_department_mapping";
pub const REASON_ALL_ORDERS_HELD: &str = "all_orders_on_hold";
pub const REASON_NO_ACTIVE_ORDER: &str = "no_active_order";
pub const REASON_QUOTA_EXHAUSTED: &str = "quota_exhausted";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingRequest<'a> {
    pub entity: Option<&'a str>,
    pub product: &'a str,
    pub department: &'a str,
    pub lb_eligible: bool,
}

/// One open order with its capacity snapshot for the current week.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub order: Order,
    pub caps: QuotaCaps,
    pub delivered: u32,
}

impl Candidate {
    pub fn remaining(&self) -> u32 {
        self.caps.quota.saturating_sub(self.delivered)
    }

    fn remaining_fraction_cmp(&self, other: &Self) -> Ordering {
        // rem_a / quota_a vs rem_b / quota_b without floats; zero quota ranks as full.
        let (rem_a, quota_a) = fraction(self.remaining(), self.caps.quota);
        let (rem_b, quota_b) = fraction(other.remaining(), other.caps.quota);
        (u64::from(rem_a) * u64::from(quota_b)).cmp(&(u64::from(rem_b) * u64::from(quota_a)))
    }
}

fn fraction(remaining: u32, quota: u32) -> (u32, u32) {
    if quota == 0 {
        (0, 1)
    } else {
        (remaining, quota)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingClassification<'a> {
    /// Open orders exist; try them in this order.
    Open(Vec<&'a Order>),
    Parked { status: LeadStatus, reason: &'static str },
}

/// Splits the order book for one lead into open candidates or a parking status.
pub fn classify<'a>(request: &RoutingRequest<'_>, orders: &'a [Order]) -> RoutingClassification<'a> {
    let Some(entity) = request.entity.map(str::trim).filter(|entity| !entity.is_empty()) else {
        return RoutingClassification::Parked {
            status: LeadStatus::PendingConfig,
            reason: REASON_ENTITY_UNRESOLVED,
        };
    };

    let covering: Vec<&Order> = orders
        .iter()
        .filter(|order| order.entity.0 == entity)
        .filter(|order| order.covers(request.product, request.department))
        .collect();

    if covering.is_empty() {
        return RoutingClassification::Parked {
            status: LeadStatus::PendingConfig,
            reason: REASON_NO_DEPARTMENT_MAPPING,
        };
    }

    let open: Vec<&Order> = covering.iter().copied().filter(|order| order.is_open()).collect();
    if !open.is_empty() {
        return RoutingClassification::Open(open);
    }

    if covering.iter().any(|order| order.active) {
        RoutingClassification::Parked { status: LeadStatus::HoldSource, reason: REASON_ALL_ORDERS_HELD }
    } else {
        RoutingClassification::Parked { status: LeadStatus::NoOpenOrders, reason: REASON_NO_ACTIVE_ORDER }
    }
}

/// Ascending `priorite`, then most unused capacity, then oldest order, then id.
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|left, right| {
        left.order
            .priorite
            .cmp(&right.order.priorite)
            .then_with(|| right.remaining_fraction_cmp(left))
            .then_with(|| left.order.created_at.cmp(&right.order.created_at))
            .then_with(|| left.order.id.cmp(&right.order.id))
    });
}

/// Quota slots a lead may consume, in preference order.
pub fn slots_for(lb_eligible: bool, lb_fallback_to_regular: bool) -> Vec<QuotaSlot> {
    match (lb_eligible, lb_fallback_to_regular) {
        (false, _) => vec![QuotaSlot::Regular],
        (true, false) => vec![QuotaSlot::LoadBalance],
        (true, true) => vec![QuotaSlot::LoadBalance, QuotaSlot::Regular],
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        classify, rank_candidates, slots_for, Candidate, RoutingClassification, RoutingRequest,
        REASON_ALL_ORDERS_HELD, REASON_ENTITY_UNRESOLVED, REASON_NO_ACTIVE_ORDER,
        REASON_NO_DEPARTMENT_MAPPING,
    };
    use crate::domain::lead::LeadStatus;
    use crate::domain::order::fixtures::order;
    use crate::domain::order::{EntityCode, Order};
    use crate::domain::quota::{QuotaCaps, QuotaSlot};

    fn request(entity: Option<&str>) -> RoutingRequest<'_> {
        RoutingRequest { entity, product: "pac", department: "75", lb_eligible: false }
    }

    fn book() -> Vec<Order> {
        let created = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().expect("ts");
        let mut south = order("O-south", 10, 1, created);
        south.entity = EntityCode("south".to_string());
        vec![order("O-1", 10, 2, created), order("O-2", 10, 1, created), south]
    }

    fn candidate(order: Order, delivered: u32) -> Candidate {
        let caps = QuotaCaps::for_quota(order.quota_semaine, Decimal::ZERO);
        Candidate { order, caps, delivered }
    }

    #[test]
    fn missing_entity_parks_as_pending_config() {
        let orders = book();
        assert_eq!(
            classify(&request(None), &orders),
            RoutingClassification::Parked {
                status: LeadStatus::PendingConfig,
                reason: REASON_ENTITY_UNRESOLVED,
            }
        );
    }

    #[test]
    fn uncovered_department_parks_as_pending_config() {
        let orders = book();
        let mut request = request(Some("north"));
        request.department = "13";
        assert_eq!(
            classify(&request, &orders),
            RoutingClassification::Parked {
                status: LeadStatus::PendingConfig,
                reason: REASON_NO_DEPARTMENT_MAPPING,
            }
        );
    }

    #[test]
    fn open_orders_are_scoped_to_the_lead_entity() {
        let orders = book();
        let RoutingClassification::Open(open) = classify(&request(Some("north")), &orders) else {
            panic!("expected open orders");
        };
        let ids: Vec<&str> = open.iter().map(|order| order.id.0.as_str()).collect();
        assert_eq!(ids, vec!["O-1", "O-2"]);
    }

    #[test]
    fn held_and_inactive_books_park_differently() {
        let mut orders = book();
        for order in orders.iter_mut() {
            order.on_hold = true;
        }
        assert_eq!(
            classify(&request(Some("north")), &orders),
            RoutingClassification::Parked { status: LeadStatus::HoldSource, reason: REASON_ALL_ORDERS_HELD }
        );

        for order in orders.iter_mut() {
            order.active = false;
        }
        assert_eq!(
            classify(&request(Some("north")), &orders),
            RoutingClassification::Parked {
                status: LeadStatus::NoOpenOrders,
                reason: REASON_NO_ACTIVE_ORDER,
            }
        );
    }

    #[test]
    fn ranking_prefers_priority_then_remaining_fraction_then_age() {
        let base = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().expect("ts");
        let mut candidates = vec![
            candidate(order("O-low-priority", 10, 5, base), 0),
            candidate(order("O-busy", 10, 1, base), 8),
            candidate(order("O-fresh", 4, 1, base + Duration::hours(1)), 1),
            candidate(order("O-twin-young", 4, 1, base + Duration::hours(2)), 1),
        ];

        rank_candidates(&mut candidates);
        let ids: Vec<&str> = candidates.iter().map(|candidate| candidate.order.id.0.as_str()).collect();
        assert_eq!(ids, vec!["O-fresh", "O-twin-young", "O-busy", "O-low-priority"]);
    }

    #[test]
    fn zero_quota_orders_rank_as_full() {
        let base = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().expect("ts");
        let mut candidates =
            vec![candidate(order("O-empty", 0, 1, base), 0), candidate(order("O-real", 10, 1, base), 9)];
        rank_candidates(&mut candidates);
        assert_eq!(candidates[0].order.id.0, "O-real");
    }

    #[test]
    fn lb_leads_use_lb_slots_unless_fallback_is_enabled() {
        assert_eq!(slots_for(false, true), vec![QuotaSlot::Regular]);
        assert_eq!(slots_for(true, false), vec![QuotaSlot::LoadBalance]);
        assert_eq!(slots_for(true, true), vec![QuotaSlot::LoadBalance, QuotaSlot::Regular]);
    }
}
