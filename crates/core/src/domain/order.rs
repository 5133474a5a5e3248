use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const WILDCARD: &str = "*";
/// Upper bound on `quota_semaine` accepted by `Order::validate`.
pub const MAX_WEEKLY_QUOTA: u32 = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

/// Tenant partition a lead is routed inside once assigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityCode(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    PerLead,
    Flat,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerLead => "per_lead",
            Self::Flat => "flat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per_lead" => Some(Self::PerLead),
            "flat" => Some(Self::Flat),
            _ => None,
        }
    }
}

/// A client's standing "commande" for leads.
///
/// `prix_lead`, `remise_percent`, `billing_mode` and `auto_renew` are
/// carried for the invoicing collaborator and operator tooling; routing and
/// week rollover never read them. Weekly quota resets for every active
/// order whatever `auto_renew` says; stopping an order is done by
/// deactivating it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub entity: EntityCode,
    pub client_id: ClientId,
    pub client_name: String,
    pub product: String,
    pub departments: Vec<String>,
    pub quota_semaine: u32,
    pub priorite: i32,
    pub lb_target_pct: Decimal,
    pub auto_renew: bool,
    pub active: bool,
    pub on_hold: bool,
    pub prix_lead: Decimal,
    pub remise_percent: Decimal,
    pub billing_mode: BillingMode,
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn covers_product(&self, product: &str) -> bool {
        self.product == WILDCARD || self.product.eq_ignore_ascii_case(product)
    }

    pub fn covers_department(&self, department: &str) -> bool {
        self.departments
            .iter()
            .any(|candidate| candidate == WILDCARD || candidate.eq_ignore_ascii_case(department))
    }

    pub fn covers(&self, product: &str, department: &str) -> bool {
        self.covers_product(product) && self.covers_department(department)
    }

    /// Active and not administratively held.
    pub fn is_open(&self) -> bool {
        self.active && !self.on_hold
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation("order id is required".to_string()));
        }
        if self.client_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation("order client_id is required".to_string()));
        }
        if self.entity.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation("order entity is required".to_string()));
        }
        if self.product.trim().is_empty() {
            return Err(DomainError::InvariantViolation("order product is required".to_string()));
        }
        if self.departments.is_empty() {
            return Err(DomainError::InvariantViolation(
                "order needs at least one department (or `*`)".to_string(),
            ));
        }
        if self.quota_semaine > MAX_WEEKLY_QUOTA {
            return Err(DomainError::InvariantViolation(format!(
                "quota_semaine must be at most {MAX_WEEKLY_QUOTA}, got {}",
                self.quota_semaine
            )));
        }
        if self.lb_target_pct < Decimal::ZERO || self.lb_target_pct > Decimal::ONE {
            return Err(DomainError::InvariantViolation(format!(
                "lb_target_pct must be within 0..=1, got {}",
                self.lb_target_pct
            )));
        }
        if self.remise_percent < Decimal::ZERO || self.remise_percent > Decimal::ONE_HUNDRED {
            return Err(DomainError::InvariantViolation(format!(
                "remise_percent must be within 0..=100, got {}",
                self.remise_percent
            )));
        }
        if self.prix_lead < Decimal::ZERO {
            return Err(DomainError::InvariantViolation("prix_lead cannot be negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::{BillingMode, ClientId, EntityCode, Order, OrderId};

    pub fn order(id: &str, quota: u32, priorite: i32, created_at: DateTime<Utc>) -> Order {
        Order {
            id: OrderId(id.to_string()),
            entity: EntityCode("north".to_string()),
            client_id: ClientId(format!("C-{id}")),
            client_name: format!("Client {id}"),
            product: "pac".to_string(),
            departments: vec!["75".to_string(), "92".to_string()],
            quota_semaine: quota,
            priorite,
            lb_target_pct: Decimal::ZERO,
            auto_renew: true,
            active: true,
            on_hold: false,
            prix_lead: Decimal::new(3_500, 2),
            remise_percent: Decimal::ZERO,
            billing_mode: BillingMode::PerLead,
            channels: vec!["https://client.example/leads".to_string()],
            created_at,
            updated_at: created_at,
        }
    }

    pub fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::fixtures::{now, order};
    use super::MAX_WEEKLY_QUOTA;
    use crate::errors::DomainError;

    #[test]
    fn wildcards_cover_any_product_and_department() {
        let mut order = order("O-1", 10, 1, now());
        assert!(order.covers("PAC", "92"));
        assert!(!order.covers("pac", "13"));
        assert!(!order.covers("solaire", "75"));

        order.product = "*".to_string();
        order.departments = vec!["*".to_string()];
        assert!(order.covers("solaire", "2A"));
    }

    #[test]
    fn held_or_inactive_orders_are_not_open() {
        let mut order = order("O-1", 10, 1, now());
        assert!(order.is_open());
        order.on_hold = true;
        assert!(!order.is_open());
        order.on_hold = false;
        order.active = false;
        assert!(!order.is_open());
    }

    #[test]
    fn validation_rejects_out_of_range_lb_target() {
        let mut order = order("O-1", 10, 1, now());
        order.lb_target_pct = Decimal::new(15, 1);
        let error = order.validate().expect_err("1.5 is not a fraction");
        assert!(matches!(error, DomainError::InvariantViolation(ref msg) if msg.contains("lb_target_pct")));
    }

    #[test]
    fn validation_bounds_the_weekly_quota() {
        let mut order = order("O-1", MAX_WEEKLY_QUOTA, 1, now());
        assert!(order.validate().is_ok());
        order.quota_semaine = u32::MAX;
        let error = order.validate().expect_err("quota too large");
        assert!(matches!(error, DomainError::InvariantViolation(ref msg) if msg.contains("quota_semaine")));
    }

    #[test]
    fn validation_requires_departments() {
        let mut order = order("O-1", 10, 1, now());
        order.departments.clear();
        assert!(order.validate().is_err());
    }
}
