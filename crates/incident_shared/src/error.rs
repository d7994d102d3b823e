//! Error types for the incident orchestration core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IncidentError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container runtime rejected the operation: {0}")]
    Runtime(String),

    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IncidentError {
    /// HTTP status the exposed surface reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            IncidentError::NotFound(_) => 404,
            IncidentError::InvalidInput(_) => 400,
            IncidentError::RuntimeUnavailable(_)
            | IncidentError::Runtime(_)
            | IncidentError::Misconfiguration(_)
            | IncidentError::Storage(_)
            | IncidentError::Summarizer(_)
            | IncidentError::Io(_)
            | IncidentError::Json(_)
            | IncidentError::Internal(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IncidentError::NotFound(_))
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        IncidentError::NotFound(what.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IncidentError>;
