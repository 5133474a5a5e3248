use chrono::{DateTime, Duration, Utc};

use crate::domain::lead::{LeadId, LeadStatus};

/// Prior lead sharing the candidate's canonical phone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorLead {
    pub id: LeadId,
    pub department: String,
    pub status: LeadStatus,
    pub session_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DedupCandidate<'a> {
    pub department: &'a str,
    pub session_id: Option<&'a str>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DedupDecision {
    Unique,
    /// Same session re-posted the form; intake returns the existing lead.
    DoubleSubmit { original: LeadId },
    /// Original already delivered; store the new lead as `duplicate`.
    Duplicate { original: LeadId },
    /// Original still routable; the submission is dropped.
    UndeliveredDuplicate { original: LeadId, original_status: LeadStatus },
}

impl DedupDecision {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::DoubleSubmit { .. } => "double_submit",
            Self::Duplicate { .. } => "duplicate_delivered",
            Self::UndeliveredDuplicate { .. } => "duplicate_undelivered",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuplicateDetector {
    window: Duration,
    double_submit_window: Duration,
}

impl DuplicateDetector {
    pub fn new(window_days: u32, double_submit_window_secs: u64) -> Self {
        Self {
            window: Duration::days(i64::from(window_days)),
            double_submit_window: Duration::seconds(
                i64::try_from(double_submit_window_secs).unwrap_or(i64::MAX / 1_000),
            ),
        }
    }

    /// Oldest submission time that still counts as a prior lead.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// `priors` may arrive in any order and may include other departments.
    pub fn classify(&self, candidate: &DedupCandidate<'_>, priors: &[PriorLead]) -> DedupDecision {
        let session = candidate.session_id.map(str::trim).filter(|session| !session.is_empty());

        if let Some(session) = session {
            let double_submit = priors
                .iter()
                .filter(|prior| prior.session_id.as_deref() == Some(session))
                .filter(|prior| {
                    let elapsed = candidate.submitted_at - prior.submitted_at;
                    elapsed >= Duration::zero() && elapsed <= self.double_submit_window
                })
                .max_by_key(|prior| prior.submitted_at);
            if let Some(prior) = double_submit {
                return DedupDecision::DoubleSubmit { original: prior.id.clone() };
            }
        }

        let window_start = self.window_start(candidate.submitted_at);
        let latest = priors
            .iter()
            .filter(|prior| prior.department.eq_ignore_ascii_case(candidate.department))
            .filter(|prior| !prior.status.is_terminal())
            .filter(|prior| prior.submitted_at >= window_start && prior.submitted_at <= candidate.submitted_at)
            .max_by(|left, right| {
                left.submitted_at.cmp(&right.submitted_at).then_with(|| left.id.cmp(&right.id))
            });

        match latest {
            None => DedupDecision::Unique,
            Some(prior) if prior.status.is_allocated() => {
                DedupDecision::Duplicate { original: prior.id.clone() }
            }
            Some(prior) => DedupDecision::UndeliveredDuplicate {
                original: prior.id.clone(),
                original_status: prior.status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{DedupCandidate, DedupDecision, DuplicateDetector, PriorLead};
    use crate::domain::lead::{LeadId, LeadStatus};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).single().expect("valid timestamp")
    }

    fn prior(id: &str, department: &str, status: LeadStatus, age: Duration) -> PriorLead {
        PriorLead {
            id: LeadId(id.to_string()),
            department: department.to_string(),
            status,
            session_id: None,
            submitted_at: now() - age,
        }
    }

    fn candidate(session_id: Option<&str>) -> DedupCandidate<'_> {
        DedupCandidate { department: "75", session_id, submitted_at: now() }
    }

    #[test]
    fn no_prior_lead_is_unique() {
        let detector = DuplicateDetector::new(30, 5);
        assert_eq!(detector.classify(&candidate(None), &[]), DedupDecision::Unique);
    }

    #[test]
    fn delivered_original_makes_a_duplicate() {
        let detector = DuplicateDetector::new(30, 5);
        let priors = [prior("L-1", "75", LeadStatus::Livre, Duration::days(3))];
        assert_eq!(
            detector.classify(&candidate(None), &priors),
            DedupDecision::Duplicate { original: LeadId("L-1".to_string()) }
        );
    }

    #[test]
    fn undelivered_original_absorbs_the_submission() {
        let detector = DuplicateDetector::new(30, 5);
        let priors = [prior("L-1", "75", LeadStatus::NoOpenOrders, Duration::hours(2))];
        assert_eq!(
            detector.classify(&candidate(None), &priors),
            DedupDecision::UndeliveredDuplicate {
                original: LeadId("L-1".to_string()),
                original_status: LeadStatus::NoOpenOrders,
            }
        );
    }

    #[test]
    fn window_and_department_bound_the_lookup() {
        let detector = DuplicateDetector::new(30, 5);
        let priors = [
            prior("L-old", "75", LeadStatus::Livre, Duration::days(31)),
            prior("L-other", "92", LeadStatus::Livre, Duration::days(1)),
            prior("L-dup", "75", LeadStatus::Duplicate, Duration::days(1)),
        ];
        assert_eq!(detector.classify(&candidate(None), &priors), DedupDecision::Unique);
    }

    #[test]
    fn most_recent_prior_decides() {
        let detector = DuplicateDetector::new(30, 5);
        let priors = [
            prior("L-1", "75", LeadStatus::Livre, Duration::days(10)),
            prior("L-2", "75", LeadStatus::New, Duration::days(1)),
        ];
        assert!(matches!(
            detector.classify(&candidate(None), &priors),
            DedupDecision::UndeliveredDuplicate { ref original, .. } if original.0 == "L-2"
        ));
    }

    #[test]
    fn same_session_within_seconds_is_a_double_submit() {
        let detector = DuplicateDetector::new(30, 5);
        let mut first = prior("L-1", "92", LeadStatus::Routed, Duration::seconds(2));
        first.session_id = Some("sess-9".to_string());

        assert_eq!(
            detector.classify(&candidate(Some("sess-9")), &[first.clone()]),
            DedupDecision::DoubleSubmit { original: LeadId("L-1".to_string()) }
        );

        first.submitted_at = now() - Duration::seconds(30);
        assert_eq!(detector.classify(&candidate(Some("sess-9")), &[first]), DedupDecision::Unique);
    }

    #[test]
    fn blank_session_never_counts_as_double_submit() {
        let detector = DuplicateDetector::new(30, 5);
        let mut first = prior("L-1", "92", LeadStatus::Routed, Duration::seconds(1));
        first.session_id = Some(String::new());
        assert_eq!(detector.classify(&candidate(Some("  ")), &[first]), DedupDecision::Unique);
    }
}
