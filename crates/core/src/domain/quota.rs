use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{Order, OrderId};

/// Start date (`YYYY-MM-DD`) of a quota week in the configured local time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeekKey(pub String);

impl WeekKey {
    pub fn from_start_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y-%m-%d").ok()
    }

    /// The key `weeks` weeks before this one.
    pub fn previous(&self, weeks: u32) -> Option<Self> {
        let start = self.start_date()?;
        start.checked_sub_signed(Duration::weeks(i64::from(weeks))).map(Self::from_start_date)
    }
}

impl std::fmt::Display for WeekKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekBoundary {
    pub start: Weekday,
    pub utc_offset_minutes: i32,
}

impl Default for WeekBoundary {
    fn default() -> Self {
        Self { start: Weekday::Mon, utc_offset_minutes: 0 }
    }
}

impl WeekBoundary {
    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        (at + Duration::minutes(i64::from(self.utc_offset_minutes))).date_naive()
    }

    fn days_into_week(&self, date: NaiveDate) -> u32 {
        (date.weekday().num_days_from_monday() + 7 - self.start.num_days_from_monday()) % 7
    }

    pub fn week_key(&self, at: DateTime<Utc>) -> WeekKey {
        let date = self.local_date(at);
        let start = date - Duration::days(i64::from(self.days_into_week(date)));
        WeekKey::from_start_date(start)
    }

    /// Days left in the week of `at`, counting the current day.
    pub fn remaining_days(&self, at: DateTime<Utc>) -> u32 {
        7 - self.days_into_week(self.local_date(at))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidWeekQuota {
    #[default]
    Full,
    ProRated,
}

impl std::str::FromStr for MidWeekQuota {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "pro_rated" | "prorated" => Ok(Self::ProRated),
            other => Err(format!("unsupported mid-week quota policy `{other}` (expected full|pro_rated)")),
        }
    }
}

/// Capacity of one order for one week.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCaps {
    pub quota: u32,
    pub lb_cap: u32,
}

impl QuotaCaps {
    pub fn for_quota(quota: u32, lb_target_pct: Decimal) -> Self {
        let lb_cap = (Decimal::from(quota) * lb_target_pct)
            .floor()
            .to_u32()
            .unwrap_or(0)
            .min(quota);
        Self { quota, lb_cap }
    }

    /// Caps for `order` in the week containing `now`.
    pub fn for_order(
        order: &Order,
        now: DateTime<Utc>,
        boundary: WeekBoundary,
        policy: MidWeekQuota,
    ) -> Self {
        let quota = match policy {
            MidWeekQuota::Full => order.quota_semaine,
            MidWeekQuota::ProRated => {
                if boundary.week_key(order.created_at) == boundary.week_key(now) {
                    let remaining = boundary.remaining_days(order.created_at);
                    let scaled = (u64::from(order.quota_semaine) * u64::from(remaining)).div_ceil(7);
                    u32::try_from(scaled).unwrap_or(order.quota_semaine)
                } else {
                    order.quota_semaine
                }
            }
        };
        Self::for_quota(quota, order.lb_target_pct)
    }

    pub fn regular_cap(&self) -> u32 {
        self.quota - self.lb_cap
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaSlot {
    Regular,
    LoadBalance,
}

impl QuotaSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::LoadBalance => "load_balance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "regular" => Some(Self::Regular),
            "load_balance" | "lb" => Some(Self::LoadBalance),
            _ => None,
        }
    }

    pub fn is_lb(&self) -> bool {
        matches!(self, Self::LoadBalance)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLedgerEntry {
    pub order_id: OrderId,
    pub week_key: WeekKey,
    pub delivered_count: u32,
    pub lb_delivered_count: u32,
    pub quota_cap: u32,
    pub lb_cap: u32,
}

impl QuotaLedgerEntry {
    pub fn empty(order_id: OrderId, week_key: WeekKey, caps: QuotaCaps) -> Self {
        Self {
            order_id,
            week_key,
            delivered_count: 0,
            lb_delivered_count: 0,
            quota_cap: caps.quota,
            lb_cap: caps.lb_cap,
        }
    }

    pub fn regular_delivered(&self) -> u32 {
        self.delivered_count.saturating_sub(self.lb_delivered_count)
    }

    /// Mirrors the conditional update the ledger store performs.
    pub fn admits(&self, caps: QuotaCaps, slot: QuotaSlot) -> bool {
        if self.delivered_count >= caps.quota {
            return false;
        }
        match slot {
            QuotaSlot::Regular => self.regular_delivered() < caps.regular_cap(),
            QuotaSlot::LoadBalance => self.lb_delivered_count < caps.lb_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc, Weekday};
    use rust_decimal::Decimal;

    use super::{MidWeekQuota, QuotaCaps, QuotaLedgerEntry, QuotaSlot, WeekBoundary, WeekKey};
    use crate::domain::order::fixtures::order;
    use crate::domain::order::OrderId;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn monday_boundary_groups_a_full_week() {
        let boundary = WeekBoundary::default();
        // 2026-10-12 is a Monday.
        assert_eq!(boundary.week_key(at(2026, 10, 12, 0)).0, "2026-10-12");
        assert_eq!(boundary.week_key(at(2026, 10, 18, 23)).0, "2026-10-12");
        assert_eq!(boundary.week_key(at(2026, 10, 19, 0)).0, "2026-10-19");
    }

    #[test]
    fn utc_offset_shifts_the_boundary() {
        let boundary = WeekBoundary { start: Weekday::Mon, utc_offset_minutes: 120 };
        // Sunday 22:30 UTC is already Monday in UTC+2.
        let instant = Utc.with_ymd_and_hms(2026, 10, 18, 22, 30, 0).single().expect("ts");
        assert_eq!(boundary.week_key(instant).0, "2026-10-19");
    }

    #[test]
    fn custom_start_day_and_previous_weeks() {
        let boundary = WeekBoundary { start: Weekday::Sat, utc_offset_minutes: 0 };
        let key = boundary.week_key(at(2026, 10, 14, 9));
        assert_eq!(key.0, "2026-10-10");
        assert_eq!(key.previous(2), Some(WeekKey("2026-09-26".to_string())));
        assert_eq!(boundary.remaining_days(at(2026, 10, 16, 9)), 1);
    }

    #[test]
    fn lb_cap_is_floored_exactly() {
        let caps = QuotaCaps::for_quota(100, Decimal::new(29, 2));
        assert_eq!(caps.lb_cap, 29);
        assert_eq!(caps.regular_cap(), 71);

        let caps = QuotaCaps::for_quota(7, Decimal::new(5, 1));
        assert_eq!(caps.lb_cap, 3);
    }

    #[test]
    fn pro_rated_quota_applies_only_to_the_creation_week() {
        let boundary = WeekBoundary::default();
        let created = at(2026, 10, 15, 10); // Thursday: 4 days remain
        let order = order("O-1", 10, 1, created);

        let caps = QuotaCaps::for_order(&order, created, boundary, MidWeekQuota::ProRated);
        assert_eq!(caps.quota, 6);

        let next_week = at(2026, 10, 20, 10);
        let caps = QuotaCaps::for_order(&order, next_week, boundary, MidWeekQuota::ProRated);
        assert_eq!(caps.quota, 10);

        let caps = QuotaCaps::for_order(&order, created, boundary, MidWeekQuota::Full);
        assert_eq!(caps.quota, 10);
    }

    #[test]
    fn pro_rating_a_huge_quota_does_not_overflow() {
        let boundary = WeekBoundary::default();
        let created = at(2026, 10, 13, 10); // Tuesday: 6 days remain
        let order = order("O-1", u32::MAX, 1, created);

        let caps = QuotaCaps::for_order(&order, created, boundary, MidWeekQuota::ProRated);
        assert_eq!(u64::from(caps.quota), (u64::from(u32::MAX) * 6).div_ceil(7));
        assert!(caps.quota < u32::MAX);

        let monday = at(2026, 10, 12, 0);
        let caps = QuotaCaps::for_order(&crate::domain::order::fixtures::order("O-2", u32::MAX, 1, monday), monday, boundary, MidWeekQuota::ProRated);
        assert_eq!(caps.quota, u32::MAX);
    }

    #[test]
    fn admission_separates_regular_and_lb_capacity() {
        let caps = QuotaCaps::for_quota(10, Decimal::new(2, 1));
        let mut entry =
            QuotaLedgerEntry::empty(OrderId("O-1".to_string()), WeekKey("2026-10-12".to_string()), caps);

        entry.delivered_count = 8;
        entry.lb_delivered_count = 0;
        assert!(!entry.admits(caps, QuotaSlot::Regular));
        assert!(entry.admits(caps, QuotaSlot::LoadBalance));

        entry.delivered_count = 10;
        entry.lb_delivered_count = 2;
        assert!(!entry.admits(caps, QuotaSlot::LoadBalance));
        assert!(!entry.admits(caps, QuotaSlot::Regular));
    }
}
