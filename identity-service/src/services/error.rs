use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account temporarily locked")]
    AccountLocked,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Tenant is not active")]
    TenantInactive,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Invalid verification code")]
    InvalidMfaCode,

    #[error("Too many verification attempts")]
    MfaAttemptsExceeded,

    #[error("Two-factor authentication already enabled")]
    MfaAlreadyEnabled,

    #[error("Two-factor authentication is not enabled")]
    MfaNotEnabled,

    #[error("Two-factor enrollment has not been started")]
    MfaNotEnrolled,

    #[error("Invitation expired")]
    InvitationExpired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),
}

impl ServiceError {
    /// Maps a unique-constraint violation to `Conflict`, leaving other errors as they are.
    pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ServiceError::Conflict(message.to_string())
            }
            _ => ServiceError::Database(err),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::from(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::AccountLocked => AppError::Forbidden(anyhow::anyhow!(
                "Account temporarily locked after repeated failed sign-in attempts"
            )),
            ServiceError::AccountDisabled => {
                AppError::Forbidden(anyhow::anyhow!("Account disabled"))
            }
            ServiceError::TenantInactive => {
                AppError::Forbidden(anyhow::anyhow!("Tenant is not active"))
            }
            ServiceError::InvalidToken => AppError::AuthError(anyhow::anyhow!("Invalid token")),
            ServiceError::TokenExpired => AppError::AuthError(anyhow::anyhow!("Token expired")),
            ServiceError::SessionRevoked => {
                AppError::AuthError(anyhow::anyhow!("Session revoked"))
            }
            ServiceError::InvalidMfaCode => {
                AppError::AuthError(anyhow::anyhow!("Invalid verification code"))
            }
            ServiceError::MfaAttemptsExceeded => AppError::TooManyRequests(
                "Too many verification attempts. Sign in again.".to_string(),
                None,
            ),
            ServiceError::MfaAlreadyEnabled => AppError::Conflict(anyhow::anyhow!(
                "Two-factor authentication already enabled"
            )),
            ServiceError::MfaNotEnabled => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor authentication is not enabled"
            )),
            ServiceError::MfaNotEnrolled => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor enrollment has not been started"
            )),
            ServiceError::InvitationExpired => {
                AppError::Gone(anyhow::anyhow!("Invitation expired"))
            }
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
        }
    }
}
