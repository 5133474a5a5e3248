use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::delivery::DeliveryId;
use crate::domain::lead::LeadId;
use crate::domain::order::OrderId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Lead,
    Order,
    Delivery,
    QuotaLedger,
    System,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Order => "order",
            Self::Delivery => "delivery",
            Self::QuotaLedger => "quota_ledger",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lead" => Some(Self::Lead),
            "order" => Some(Self::Order),
            "delivery" => Some(Self::Delivery),
            "quota_ledger" => Some(Self::QuotaLedger),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn lead(id: &LeadId) -> Self {
        Self { entity_type: EntityType::Lead, entity_id: id.0.clone() }
    }

    pub fn order(id: &OrderId) -> Self {
        Self { entity_type: EntityType::Order, entity_id: id.0.clone() }
    }

    pub fn delivery(id: &DeliveryId) -> Self {
        Self { entity_type: EntityType::Delivery, entity_id: id.0.clone() }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self { entity_type: EntityType::System, entity_id: id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventAction {
    LeadInvalid,
    LeadDuplicate,
    LeadDuplicateUndelivered,
    LeadDoubleSubmit,
    LeadRouted,
    LeadParked,
    LeadEntityAssigned,
    LeadDelivered,
    LeadReleased,
    DeliveryCreated,
    DeliveryPrepared,
    DeliverySending,
    DeliverySent,
    DeliveryFailed,
    DeliveryAccepted,
    DeliveryRejected,
    DeliveryLeadRemoved,
    OrderUpserted,
    OrderActiveToggled,
    OrderHoldChanged,
    QuotaWeekRolled,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadInvalid => "lead.invalid",
            Self::LeadDuplicate => "lead.duplicate",
            Self::LeadDuplicateUndelivered => "lead.duplicate_undelivered",
            Self::LeadDoubleSubmit => "lead.double_submit",
            Self::LeadRouted => "lead.routed",
            Self::LeadParked => "lead.parked",
            Self::LeadEntityAssigned => "lead.entity_assigned",
            Self::LeadDelivered => "lead.delivered",
            Self::LeadReleased => "lead.released",
            Self::DeliveryCreated => "delivery.created",
            Self::DeliveryPrepared => "delivery.prepared",
            Self::DeliverySending => "delivery.sending",
            Self::DeliverySent => "delivery.sent",
            Self::DeliveryFailed => "delivery.failed",
            Self::DeliveryAccepted => "delivery.accepted",
            Self::DeliveryRejected => "delivery.rejected",
            Self::DeliveryLeadRemoved => "delivery.lead_removed",
            Self::OrderUpserted => "order.upserted",
            Self::OrderActiveToggled => "order.active_toggled",
            Self::OrderHoldChanged => "order.hold_changed",
            Self::QuotaWeekRolled => "quota.week_rolled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        const ALL: [EventAction; 21] = [
            EventAction::LeadInvalid,
            EventAction::LeadDuplicate,
            EventAction::LeadDuplicateUndelivered,
            EventAction::LeadDoubleSubmit,
            EventAction::LeadRouted,
            EventAction::LeadParked,
            EventAction::LeadEntityAssigned,
            EventAction::LeadDelivered,
            EventAction::LeadReleased,
            EventAction::DeliveryCreated,
            EventAction::DeliveryPrepared,
            EventAction::DeliverySending,
            EventAction::DeliverySent,
            EventAction::DeliveryFailed,
            EventAction::DeliveryAccepted,
            EventAction::DeliveryRejected,
            EventAction::DeliveryLeadRemoved,
            EventAction::OrderUpserted,
            EventAction::OrderActiveToggled,
            EventAction::OrderHoldChanged,
            EventAction::QuotaWeekRolled,
        ];
        let value = value.trim();
        ALL.into_iter().find(|action| action.as_str() == value)
    }
}

/// Append-only audit record of one state change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    pub action: EventAction,
    pub subject: EntityRef,
    pub actor: String,
    pub correlation_id: String,
    pub reason: Option<String>,
    pub details: BTreeMap<String, String>,
    pub related: Vec<EntityRef>,
    pub occurred_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        action: EventAction,
        subject: EntityRef,
        actor: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            action,
            subject,
            actor: actor.into(),
            correlation_id: correlation_id.into(),
            reason: None,
            details: BTreeMap::new(),
            related: Vec::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    pub fn with_related(mut self, related: EntityRef) -> Self {
        if !self.related.contains(&related) {
            self.related.push(related);
        }
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub action: Option<EventAction>,
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    /// Matches events whose subject or related references include this id.
    pub references: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::{EntityRef, EntityType, EventAction, EventRecord};
    use crate::domain::delivery::DeliveryId;
    use crate::domain::lead::LeadId;

    #[test]
    fn builder_collects_reason_details_and_unique_related_refs() {
        let lead = LeadId("L-9".to_string());
        let record = EventRecord::new(
            EventAction::LeadRouted,
            EntityRef::lead(&lead),
            "system:intake",
            "req-17",
        )
        .with_reason("matched")
        .with_detail("week_key", "2026-10-12")
        .with_related(EntityRef::delivery(&DeliveryId("D-1".to_string())))
        .with_related(EntityRef::delivery(&DeliveryId("D-1".to_string())));

        assert_eq!(record.subject.entity_type, EntityType::Lead);
        assert_eq!(record.reason.as_deref(), Some("matched"));
        assert_eq!(record.details.get("week_key").map(String::as_str), Some("2026-10-12"));
        assert_eq!(record.related.len(), 1);
    }

    #[test]
    fn actions_round_trip_from_storage_encoding() {
        for action in [
            EventAction::LeadDuplicateUndelivered,
            EventAction::DeliveryLeadRemoved,
            EventAction::QuotaWeekRolled,
        ] {
            assert_eq!(EventAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(EventAction::parse("lead.exploded"), None);
    }
}
