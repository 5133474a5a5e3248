use leadflow_core::errors::{ApplicationError, DomainError};
use leadflow_db::RepositoryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(error: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(error))
    }
}

impl From<EngineError> for ApplicationError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Repository(error) => Self::Persistence(error.to_string()),
            EngineError::Domain(error) => Self::Domain(error),
            EngineError::NotFound { kind, id } => Self::NotFound { kind, id },
            EngineError::Validation(message) => Self::Validation(message),
            EngineError::Conflict(message) => Self::Conflict(message),
            EngineError::Payload(error) => Self::Integration(format!("payload encoding failed: {error}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use leadflow_core::domain::lead::LeadStatus;
    use leadflow_core::errors::{ApplicationError, DomainError, InterfaceError};

    use super::EngineError;

    #[test]
    fn lost_races_and_invalid_transitions_surface_as_conflicts() {
        let conflict: ApplicationError = EngineError::Conflict("delivery moved".to_string()).into();
        assert!(matches!(conflict.into_interface("corr-1"), InterfaceError::Conflict { .. }));

        let transition: ApplicationError = EngineError::Domain(DomainError::InvalidLeadTransition {
            from: LeadStatus::Duplicate,
            to: LeadStatus::Routed,
        })
        .into();
        assert!(matches!(transition.into_interface("corr-2"), InterfaceError::Conflict { .. }));
    }

    #[test]
    fn missing_records_keep_their_kind() {
        let mapped: ApplicationError = EngineError::not_found("lead", "lead-1").into();
        let interface = mapped.into_interface("corr-3");
        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert!(interface.message().contains("lead-1"));
    }
}
