use chrono::{DateTime, Utc};
use uuid::Uuid;

use leadflow_core::audit::{EntityRef, EventAction, EventRecord};

/// Who is acting, under which correlation id, and at what instant.
///
/// Every engine operation takes one of these instead of reading the clock
/// itself, so a whole operation (and every event it writes) shares one
/// timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub actor: String,
    pub correlation_id: String,
    pub now: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self { actor: actor.into(), correlation_id: Uuid::new_v4().to_string(), now: Utc::now() }
    }

    /// Context for scheduled work, e.g. `system:scheduler`.
    pub fn system(job: &str) -> Self {
        Self::new(format!("system:{job}"))
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub(crate) fn event(&self, action: EventAction, subject: EntityRef) -> EventRecord {
        EventRecord::new(action, subject, self.actor.as_str(), self.correlation_id.as_str()).at(self.now)
    }
}
