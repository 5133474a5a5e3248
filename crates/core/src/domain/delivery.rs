use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadId;
use crate::domain::order::{ClientId, EntityCode, OrderId};
use crate::domain::quota::{QuotaSlot, WeekKey};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    PendingCsv,
    ReadyToSend,
    Sending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingCsv => "pending_csv",
            Self::ReadyToSend => "ready_to_send",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_csv" => Some(Self::PendingCsv),
            "ready_to_send" => Some(Self::ReadyToSend),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Accepted,
    Rejected,
    Removed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeDecision {
    pub outcome: DeliveryOutcome,
    pub reason: Option<String>,
    pub actor: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub entity: EntityCode,
    pub product: String,
    pub client_id: ClientId,
    pub order_id: OrderId,
    pub week_key: WeekKey,
    pub status: DeliveryStatus,
    pub outcome: Option<OutcomeDecision>,
    pub billable: bool,
    pub billable_set_at: Option<DateTime<Utc>>,
    pub sent_to: Vec<String>,
    pub send_attempts: u32,
    pub last_error: Option<String>,
    pub payload_json: Option<String>,
    pub payload_hash: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn outcome_kind(&self) -> Option<DeliveryOutcome> {
        self.outcome.as_ref().map(|decision| decision.outcome)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryLeadState {
    Active,
    Removed,
    Rejected,
}

impl DeliveryLeadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Removed => "removed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "removed" => Some(Self::Removed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Duplicate,
    OutOfZone,
    WrongNumber,
    Unreachable,
    TestLead,
    Other,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::OutOfZone => "out_of_zone",
            Self::WrongNumber => "wrong_number",
            Self::Unreachable => "unreachable",
            Self::TestLead => "test_lead",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "duplicate" => Some(Self::Duplicate),
            "out_of_zone" => Some(Self::OutOfZone),
            "wrong_number" => Some(Self::WrongNumber),
            "unreachable" => Some(Self::Unreachable),
            "test_lead" => Some(Self::TestLead),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Pairing of one lead with one delivery, including the quota it consumed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLead {
    pub delivery_id: DeliveryId,
    pub lead_id: LeadId,
    pub order_id: OrderId,
    pub week_key: WeekKey,
    pub slot: QuotaSlot,
    pub state: DeliveryLeadState,
    pub removal_reason: Option<RemovalReason>,
    pub removal_detail: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    pub attached_at: DateTime<Utc>,
    pub detached_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFilter {
    pub status: Option<DeliveryStatus>,
    pub order_id: Option<OrderId>,
    pub client_id: Option<ClientId>,
    pub entity: Option<EntityCode>,
    pub billable: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
