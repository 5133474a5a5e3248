use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::delivery::DeliveryId;
use crate::domain::order::{EntityCode, OrderId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeadId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Routed,
    Livre,
    NoOpenOrders,
    HoldSource,
    PendingConfig,
    Duplicate,
    Invalid,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Routed => "routed",
            Self::Livre => "livre",
            Self::NoOpenOrders => "no_open_orders",
            Self::HoldSource => "hold_source",
            Self::PendingConfig => "pending_config",
            Self::Duplicate => "duplicate",
            Self::Invalid => "invalid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "routed" => Some(Self::Routed),
            "livre" => Some(Self::Livre),
            "no_open_orders" => Some(Self::NoOpenOrders),
            "hold_source" => Some(Self::HoldSource),
            "pending_config" => Some(Self::PendingConfig),
            "duplicate" => Some(Self::Duplicate),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }

    /// Statuses the matcher picks up again on a re-evaluation pass.
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::New | Self::NoOpenOrders | Self::HoldSource | Self::PendingConfig)
    }

    /// Quota has been consumed for the lead and it is attached to a delivery.
    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Routed | Self::Livre)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Duplicate | Self::Invalid)
    }

    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        use LeadStatus::*;

        matches!(
            (self, next),
            (New | NoOpenOrders | HoldSource | PendingConfig, Routed)
                | (New | NoOpenOrders | HoldSource | PendingConfig, NoOpenOrders)
                | (New | NoOpenOrders | HoldSource | PendingConfig, HoldSource)
                | (New | NoOpenOrders | HoldSource | PendingConfig, PendingConfig)
                | (Routed, Livre)
                | (Routed | Livre, New)
        )
    }
}

/// Immutable part of a lead as submitted by a source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadPayload {
    pub phone_raw: String,
    pub name: String,
    pub department: String,
    pub product: String,
    pub source: String,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub payload: LeadPayload,
    /// Canonical phone, absent when the raw value failed normalisation.
    pub phone: Option<String>,
    pub entity: Option<EntityCode>,
    pub entity_locked: bool,
    pub lb_eligible: bool,
    pub status: LeadStatus,
    pub status_reason: Option<String>,
    pub duplicate_of: Option<LeadId>,
    pub current_order_id: Option<OrderId>,
    pub current_delivery_id: Option<DeliveryId>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn transition_to(
        &mut self,
        next: LeadStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidLeadTransition { from: self.status, to: next });
        }

        self.status = next;
        self.status_reason = reason;
        self.updated_at = at;
        Ok(())
    }

    /// Sets the entity once; a locked lead keeps the entity it was first given.
    pub fn lock_entity(&mut self, entity: EntityCode) -> Result<(), DomainError> {
        match (&self.entity, self.entity_locked) {
            (Some(current), true) if current != &entity => {
                Err(DomainError::InvariantViolation(format!(
                    "lead {} is locked to entity {}",
                    self.id.0, current.0
                )))
            }
            _ => {
                self.entity = Some(entity);
                self.entity_locked = true;
                Ok(())
            }
        }
    }

    /// Reverts an allocated lead so it can be routed again.
    pub fn release_to_new(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(LeadStatus::New, None, at)?;
        self.current_order_id = None;
        self.current_delivery_id = None;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub entity: Option<EntityCode>,
    pub department: Option<String>,
    pub product: Option<String>,
    pub phone: Option<String>,
    pub order_id: Option<OrderId>,
    pub submitted_after: Option<DateTime<Utc>>,
    pub submitted_before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
