pub mod audit;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod intake;
pub mod lifecycle;
pub mod matcher;
pub mod payload;
pub mod transport;

pub use audit::{EntityRef, EntityType, EventAction, EventFilter, EventRecord};
pub use dedup::{DedupDecision, DuplicateDetector, PriorLead};
pub use domain::delivery::{
    Delivery, DeliveryFilter, DeliveryId, DeliveryLead, DeliveryLeadState, DeliveryOutcome,
    DeliveryStatus, OutcomeDecision, RemovalReason,
};
pub use domain::lead::{Lead, LeadFilter, LeadId, LeadPayload, LeadStatus};
pub use domain::order::{BillingMode, ClientId, EntityCode, Order, OrderId};
pub use domain::quota::{MidWeekQuota, QuotaCaps, QuotaLedgerEntry, QuotaSlot, WeekBoundary, WeekKey};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use intake::{LeadSubmission, SubmissionCheck};
pub use lifecycle::{DeliveryCommand, DeliveryState, TransitionPlan};
pub use transport::{DeliveryTransport, NoopTransport, Shipment, TransportError, TransportReceipt};
