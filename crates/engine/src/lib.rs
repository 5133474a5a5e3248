pub mod context;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod intake;
pub mod orders;
pub mod queries;
pub mod rollover;
pub mod routing;

pub use context::OperationContext;
pub use delivery::{RejectionReport, ReleasedLead, RemovalReport, RetryReport, SendReport, SENDING_TIMED_OUT};
pub use engine::LeadEngine;
pub use error::EngineError;
pub use intake::{IntakeOutcome, SubmitOutcome};
pub use orders::{OrderChange, OrderDraft};
pub use queries::{DeliveryDetail, LeadDetail, LoggedEvent, OrderStats, WeekStats};
pub use rollover::{ReevaluationReport, RolloverReport};
pub use routing::RoutingOutcome;
