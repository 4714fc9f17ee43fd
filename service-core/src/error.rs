use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {1}")]
    Conflict(String, anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// Stable machine-readable code so callers can map errors to outward responses.
    ///
    /// Conflicts carry their own code; every other variant maps to a fixed one.
    pub fn code(&self) -> &str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(code, _) => code,
            AppError::InternalError(_) => "internal_error",
            AppError::ServiceUnavailable => "service_unavailable",
            AppError::DatabaseError(_) => "database_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Whether a caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ServiceUnavailable)
    }
}

/// Serializable error body for whichever transport sits in front of a service.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let (error, details) = match err {
            AppError::InternalError(e) => ("Internal server error".to_string(), Some(format!("{:#}", e))),
            AppError::DatabaseError(e) => ("Database error".to_string(), Some(e.to_string())),
            AppError::ConfigError(e) => ("Configuration error".to_string(), Some(e.to_string())),
            AppError::ServiceUnavailable => ("Service unavailable".to_string(), None),
            AppError::BadRequest(e) | AppError::NotFound(e) | AppError::Forbidden(e) => {
                (e.to_string(), None)
            }
            AppError::Conflict(_, e) => (e.to_string(), None),
        };

        ErrorResponse {
            error,
            code: err.code().to_string(),
            details,
        }
    }
}
