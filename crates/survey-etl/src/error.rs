//! ETL error types
//!
//! Errors fall in two groups. Unit-level problems (a survey without a
//! `components` array, a submission payload that is not an object) are
//! recovered by the loaders: the unit is logged and skipped and the batch
//! carries on. Everything else aborts the run and leaves its run cycle at
//! `success = false`, so the next scheduled run retries the whole window.

use thiserror::Error;

/// Result type alias for ETL operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] survey_etl_common::CommonError),

    /// The survey's form document cannot be interpreted as a component list
    #[error("Survey {survey_id} has no usable form schema: {reason}")]
    MissingSchema { survey_id: i64, reason: String },

    /// A submission payload is not a key/answer object
    #[error("Submission {submission_id} has an invalid payload: {reason}")]
    InvalidPayload { submission_id: i64, reason: String },

    #[error("In-memory store lock poisoned")]
    LockPoisoned,
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn missing_schema(survey_id: i64, reason: impl Into<String>) -> Self {
        Self::MissingSchema {
            survey_id,
            reason: reason.into(),
        }
    }

    pub fn invalid_payload(submission_id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            submission_id,
            reason: reason.into(),
        }
    }

    /// Whether the error only concerns the unit being processed
    ///
    /// Recoverable errors skip one survey or submission; all others abort the
    /// run.
    pub fn is_unit_recoverable(&self) -> bool {
        matches!(
            self,
            EtlError::MissingSchema { .. } | EtlError::InvalidPayload { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_errors_are_recoverable() {
        assert!(EtlError::missing_schema(7, "no components").is_unit_recoverable());
        assert!(EtlError::invalid_payload(100, "not an object").is_unit_recoverable());
    }

    #[test]
    fn test_infrastructure_errors_abort() {
        assert!(!EtlError::Database(sqlx::Error::PoolTimedOut).is_unit_recoverable());
        assert!(!EtlError::LockPoisoned.is_unit_recoverable());
        assert!(!EtlError::config("bad").is_unit_recoverable());
    }

    #[test]
    fn test_error_messages_carry_ids() {
        let err = EtlError::missing_schema(7, "form_json has no components");
        assert_eq!(
            err.to_string(),
            "Survey 7 has no usable form schema: form_json has no components"
        );
    }
}
