use http::StatusCode;
use thiserror::Error;

/// Error taxonomy shared by every ledger operation.
///
/// Each variant carries an `anyhow::Error` so call sites can attach context
/// without widening the enum. Callers branch on [`AppError::kind`] instead of
/// matching message text.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Validation error: {0}")]
    InvalidFields(#[from] validator::ValidationErrors),

    #[error("Immutable state: {0}")]
    ImmutableState(anyhow::Error),

    #[error("Overlapping time range: {0}")]
    Overlap(anyhow::Error),

    #[error("Cross-tenant access denied: {0}")]
    CrossTenantAccess(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Coarse classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ImmutableState,
    Overlap,
    CrossTenantAccess,
    Conflict,
    NotFound,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::InvalidFields(_) => ErrorKind::Validation,
            AppError::ImmutableState(_) => ErrorKind::ImmutableState,
            AppError::Overlap(_) => ErrorKind::Overlap,
            AppError::CrossTenantAccess(_) => ErrorKind::CrossTenantAccess,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::DatabaseError(_) | AppError::ConfigError(_) | AppError::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only a detected write conflict may be retried; everything else is
    /// either the caller's fault or fatal to the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    /// HTTP status the API layer should surface for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ImmutableState | ErrorKind::Overlap | ErrorKind::Conflict => {
                StatusCode::CONFLICT
            }
            ErrorKind::CrossTenantAccess => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(msg: impl std::fmt::Display) -> Self {
        AppError::Validation(anyhow::anyhow!("{}", msg))
    }

    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        AppError::NotFound(anyhow::anyhow!("{}", msg))
    }

    pub fn immutable(msg: impl std::fmt::Display) -> Self {
        AppError::ImmutableState(anyhow::anyhow!("{}", msg))
    }
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
