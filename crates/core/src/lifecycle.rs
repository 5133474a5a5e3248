//! Delivery state machine.
//!
//! `plan` is the single transition table for deliveries. It never mutates
//! anything: the delivery manager asks for a plan, then persists it with a
//! conditional update keyed on the `from` status so that two concurrent
//! commands cannot both apply.

use serde::{Deserialize, Serialize};

use crate::domain::delivery::{Delivery, DeliveryOutcome, DeliveryStatus};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryCommand {
    Prepare,
    StartSend { force: bool },
    CompleteSend,
    FailSend,
    TimeOut,
    Accept,
    Reject,
    RemoveLead,
}

impl DeliveryCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::StartSend { force: false } => "send",
            Self::StartSend { force: true } => "resend",
            Self::CompleteSend => "complete_send",
            Self::FailSend => "fail_send",
            Self::TimeOut => "time_out",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::RemoveLead => "remove_lead",
        }
    }
}

/// The slice of a delivery the transition table looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryState {
    pub status: DeliveryStatus,
    pub outcome: Option<DeliveryOutcome>,
    pub send_attempts: u32,
}

impl From<&Delivery> for DeliveryState {
    fn from(delivery: &Delivery) -> Self {
        Self {
            status: delivery.status,
            outcome: delivery.outcome_kind(),
            send_attempts: delivery.send_attempts,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub command: DeliveryCommand,
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
    /// Outcome to record, when the command decides one.
    pub outcome: Option<DeliveryOutcome>,
    /// True when the command starts a new transmission attempt.
    pub counts_attempt: bool,
}

pub fn plan(
    state: DeliveryState,
    command: DeliveryCommand,
    max_send_attempts: u32,
) -> Result<TransitionPlan, DomainError> {
    use DeliveryCommand::{Accept, CompleteSend, FailSend, Prepare, Reject, RemoveLead, StartSend, TimeOut};
    use DeliveryStatus::{Failed, PendingCsv, ReadyToSend, Sending, Sent};

    let refuse = |reason: &str| DomainError::InvalidDeliveryTransition {
        status: state.status,
        outcome: state.outcome,
        command,
        reason: reason.to_string(),
    };
    let keep = |outcome: Option<DeliveryOutcome>| TransitionPlan {
        command,
        from: state.status,
        to: state.status,
        outcome,
        counts_attempt: false,
    };
    let moves_to = |to: DeliveryStatus, counts_attempt: bool| TransitionPlan {
        command,
        from: state.status,
        to,
        outcome: None,
        counts_attempt,
    };

    match state.outcome {
        Some(DeliveryOutcome::Rejected) => return Err(refuse("delivery already rejected")),
        Some(DeliveryOutcome::Removed) => return Err(refuse("every lead was removed from this delivery")),
        Some(DeliveryOutcome::Accepted) | None => {}
    }

    match (state.status, command) {
        (PendingCsv, Prepare) => Ok(moves_to(ReadyToSend, false)),
        (_, Prepare) => Err(refuse("only pending_csv deliveries can be prepared")),

        (ReadyToSend, StartSend { .. }) => Ok(moves_to(Sending, true)),
        (Failed, StartSend { force }) => {
            if force || state.send_attempts < max_send_attempts {
                Ok(moves_to(Sending, true))
            } else {
                Err(refuse("send attempts exhausted; use force to resend"))
            }
        }
        // A resend is its own attempt but the delivery stays sent.
        (Sent, StartSend { force: true }) => Ok(TransitionPlan { counts_attempt: true, ..keep(state.outcome) }),
        (Sent, StartSend { force: false }) => Err(refuse("delivery already sent; use resend")),
        (PendingCsv, StartSend { .. }) => Err(refuse("delivery must be prepared before sending")),
        (Sending, StartSend { .. }) => Err(refuse("a transmission is already in flight")),

        (Sending, CompleteSend) => Ok(moves_to(Sent, false)),
        (Sending, FailSend) | (Sending, TimeOut) => Ok(moves_to(Failed, false)),
        (Sent, CompleteSend) | (Sent, FailSend) => Ok(keep(state.outcome)),
        (_, CompleteSend) | (_, FailSend) | (_, TimeOut) => {
            Err(refuse("no transmission is in flight"))
        }

        (Sent, Accept) if state.outcome.is_none() => Ok(keep(Some(DeliveryOutcome::Accepted))),
        (_, Accept) => Err(refuse("only a sent delivery without outcome can be accepted")),

        (Sent, Reject) if state.outcome.is_none() => Ok(keep(Some(DeliveryOutcome::Rejected))),
        (Sent, Reject) => Err(refuse("delivery outcome already decided")),
        (_, Reject) => Err(refuse("only sent deliveries can be rejected")),

        (Sending, RemoveLead) => Err(refuse("cannot remove a lead while sending")),
        (_, RemoveLead) => Ok(keep(state.outcome)),
    }
}
