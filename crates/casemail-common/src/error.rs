//! Error types for Casemail

use crate::types::FirmId;
use thiserror::Error;

/// Main error type for Casemail
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Mail provider error: {0}")]
    Provider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Firm mismatch: {entity} belongs to firm {actual}, expected {expected}")]
    FirmMismatch {
        entity: String,
        expected: FirmId,
        actual: FirmId,
    },

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Casemail
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Provider(_) => "PROVIDER_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::FirmMismatch { .. } => "FIRM_MISMATCH",
            Error::Scoring(_) => "SCORING_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure came from an I/O collaborator and may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Provider(_))
    }
}
