//! Submission validation and canonical forms used by duplicate detection.

use serde::{Deserialize, Serialize};

use crate::domain::lead::LeadPayload;
use crate::domain::order::EntityCode;

/// Raw submission as posted by a lead source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSubmission {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set by the scoring collaborator when the lead may replace a flagged one.
    #[serde(default)]
    pub lb_eligible: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSubmission {
    pub payload: LeadPayload,
    pub phone: String,
    pub entity: Option<EntityCode>,
    pub lb_eligible: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedSubmission {
    pub payload: LeadPayload,
    /// Canonical phone when the phone itself was fine.
    pub phone: Option<String>,
    pub entity: Option<EntityCode>,
    pub lb_eligible: bool,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionCheck {
    Valid(ValidatedSubmission),
    Invalid(RejectedSubmission),
}

/// Canonical ten-digit national form, e.g. `+33 6 12 34 56 78` -> `0612345678`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '.' | '-' | '(' | ')' | '\u{a0}'))
        .collect();

    let national = if let Some(rest) = compact.strip_prefix("+33") {
        format!("0{rest}")
    } else if let Some(rest) = compact.strip_prefix("0033") {
        format!("0{rest}")
    } else {
        compact
    };

    let bytes = national.as_bytes();
    let valid = bytes.len() == 10
        && bytes.iter().all(u8::is_ascii_digit)
        && bytes[0] == b'0'
        && bytes[1] != b'0';

    valid.then_some(national)
}

pub fn normalize_department(raw: &str) -> Option<String> {
    let department = raw.trim().to_ascii_uppercase();
    let valid = (2..=3).contains(&department.len())
        && department.chars().all(|ch| ch.is_ascii_alphanumeric());
    valid.then_some(department)
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

pub fn check_submission(submission: &LeadSubmission) -> SubmissionCheck {
    let phone_raw = trimmed(&submission.phone);
    let department_raw = trimmed(&submission.department);
    let product = trimmed(&submission.product);
    let source = trimmed(&submission.source);

    let mut missing = Vec::new();
    if phone_raw.is_none() {
        missing.push("phone");
    }
    if department_raw.is_none() {
        missing.push("department");
    }
    if product.is_none() {
        missing.push("product");
    }
    if source.is_none() {
        missing.push("source");
    }

    let phone = phone_raw.as_deref().and_then(normalize_phone);
    let department = department_raw.as_deref().and_then(normalize_department);

    let payload = LeadPayload {
        phone_raw: phone_raw.clone().unwrap_or_default(),
        name: trimmed(&submission.name).unwrap_or_default(),
        department: department.clone().or(department_raw.clone()).unwrap_or_default(),
        product: product.map(|value| value.to_ascii_lowercase()).unwrap_or_default(),
        source: source.unwrap_or_default(),
        session_id: trimmed(&submission.session_id),
    };
    let entity = trimmed(&submission.entity).map(EntityCode);

    let reason = if !missing.is_empty() {
        Some(format!("missing_required:{}", missing.join(",")))
    } else if phone.is_none() {
        Some("invalid_phone".to_string())
    } else if department.is_none() {
        Some("invalid_department".to_string())
    } else {
        None
    };

    match (reason, phone) {
        (None, Some(phone)) => SubmissionCheck::Valid(ValidatedSubmission {
            payload,
            phone,
            entity,
            lb_eligible: submission.lb_eligible,
        }),
        (reason, phone) => SubmissionCheck::Invalid(RejectedSubmission {
            payload,
            phone,
            entity,
            lb_eligible: submission.lb_eligible,
            reason: reason.unwrap_or_else(|| "invalid_phone".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_submission, normalize_department, normalize_phone, LeadSubmission, SubmissionCheck};

    fn submission() -> LeadSubmission {
        LeadSubmission {
            phone: Some("+33 6 12 34 56 78".to_string()),
            name: Some("  Paul Durand ".to_string()),
            department: Some("2a".to_string()),
            product: Some("PAC".to_string()),
            entity: Some("north".to_string()),
            source: Some("landing-a".to_string()),
            session_id: Some("sess-1".to_string()),
            lb_eligible: false,
        }
    }

    #[test]
    fn phone_variants_share_one_canonical_form() {
        for raw in ["0612345678", "06.12.34.56.78", "+33 6 12 34 56 78", "0033612345678", "(06) 12-34-56-78"] {
            assert_eq!(normalize_phone(raw).as_deref(), Some("0612345678"), "raw = {raw}");
        }
    }

    #[test]
    fn malformed_phones_are_refused() {
        for raw in ["061234567", "06123456789", "0012345678", "06ab345678", ""] {
            assert_eq!(normalize_phone(raw), None, "raw = {raw}");
        }
    }

    #[test]
    fn departments_are_upper_cased_and_bounded() {
        assert_eq!(normalize_department(" 2a ").as_deref(), Some("2A"));
        assert_eq!(normalize_department("971").as_deref(), Some("971"));
        assert_eq!(normalize_department("7"), None);
        assert_eq!(normalize_department("75-1"), None);
    }

    #[test]
    fn valid_submission_is_normalised() {
        let SubmissionCheck::Valid(valid) = check_submission(&submission()) else {
            panic!("submission should be valid");
        };
        assert_eq!(valid.phone, "0612345678");
        assert_eq!(valid.payload.department, "2A");
        assert_eq!(valid.payload.product, "pac");
        assert_eq!(valid.payload.name, "Paul Durand");
        assert_eq!(valid.entity.map(|entity| entity.0).as_deref(), Some("north"));
    }

    #[test]
    fn missing_fields_are_listed_in_the_reason() {
        let mut input = submission();
        input.product = None;
        input.source = Some("   ".to_string());

        let SubmissionCheck::Invalid(rejected) = check_submission(&input) else {
            panic!("submission should be invalid");
        };
        assert_eq!(rejected.reason, "missing_required:product,source");
        assert_eq!(rejected.phone.as_deref(), Some("0612345678"));
    }

    #[test]
    fn bad_phone_is_reported_before_department() {
        let mut input = submission();
        input.phone = Some("12345".to_string());
        input.department = Some("x".to_string());

        let SubmissionCheck::Invalid(rejected) = check_submission(&input) else {
            panic!("submission should be invalid");
        };
        assert_eq!(rejected.reason, "invalid_phone");
        assert_eq!(rejected.payload.phone_raw, "12345");
    }
}
