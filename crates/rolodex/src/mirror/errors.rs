use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Errors from writing into the local mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The record has neither a remote id nor a usable email.
    #[error("Malformed record: {reason}")]
    Malformed { reason: String },

    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl MirrorError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Whether only this record is affected (the batch can continue).
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// Whether the error is a unique-index violation (a concurrent insert won).
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_is_record_level() {
        assert!(MirrorError::malformed("no key").is_record_level());
        assert!(!MirrorError::Database(DbErr::Custom("x".into())).is_record_level());
    }

    #[test]
    fn custom_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&DbErr::Custom("boom".into())));
    }
}
