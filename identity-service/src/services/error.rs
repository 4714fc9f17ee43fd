use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    /// Zero rows matched or affected, whichever query produced it.
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(#[source] sqlx::Error),

    #[error("value out of uint32 range: {0}")]
    OutOfRange(i64),

    #[error("user account exists")]
    AccountExists,

    #[error("commander name already exists")]
    CommanderNameTaken,

    #[error("registration pin exists")]
    PinExists,

    #[error("registration challenge exists")]
    ChallengeExists,

    #[error("registration challenge not found")]
    ChallengeNotFound,

    #[error("registration challenge mismatch")]
    ChallengeMismatch,

    #[error("registration challenge pin mismatch")]
    ChallengePinMismatch,

    #[error("registration challenge consumed")]
    ChallengeConsumed,

    #[error("registration challenge expired")]
    ChallengeExpired,

    #[error("last role: {0}")]
    LastRole(String),

    #[error("password rejected: {0}")]
    PasswordPolicy(String),

    #[error("store unavailable")]
    StoreUnavailable,

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => IdentityError::NotFound,
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                IdentityError::UniqueViolation(err)
            }
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => IdentityError::StoreUnavailable,
            other => IdentityError::Database(other),
        }
    }
}

impl IdentityError {
    /// Label used for the error counter and for outward conflict codes.
    pub fn kind(&self) -> &'static str {
        match self {
            IdentityError::NotFound => "not_found",
            IdentityError::UniqueViolation(_) => "unique_violation",
            IdentityError::OutOfRange(_) => "out_of_range",
            IdentityError::AccountExists => "account_exists",
            IdentityError::CommanderNameTaken => "commander_name_taken",
            IdentityError::PinExists => "pin_exists",
            IdentityError::ChallengeExists => "challenge_exists",
            IdentityError::ChallengeNotFound => "challenge_not_found",
            IdentityError::ChallengeMismatch => "challenge_mismatch",
            IdentityError::ChallengePinMismatch => "challenge_pin_mismatch",
            IdentityError::ChallengeConsumed => "challenge_consumed",
            IdentityError::ChallengeExpired => "challenge_expired",
            IdentityError::LastRole(_) => "last_role",
            IdentityError::PasswordPolicy(_) => "password_policy",
            IdentityError::StoreUnavailable => "store_unavailable",
            IdentityError::Database(_) => "db_error",
            IdentityError::Internal(_) => "internal_error",
        }
    }

    /// Domain conflicts a caller is expected to branch on.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            IdentityError::AccountExists
                | IdentityError::CommanderNameTaken
                | IdentityError::PinExists
                | IdentityError::ChallengeExists
                | IdentityError::ChallengeNotFound
                | IdentityError::ChallengeMismatch
                | IdentityError::ChallengePinMismatch
                | IdentityError::ChallengeConsumed
                | IdentityError::ChallengeExpired
                | IdentityError::LastRole(_)
        )
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        let kind = err.kind();
        match err {
            IdentityError::NotFound => AppError::NotFound(anyhow::anyhow!("record not found")),
            IdentityError::UniqueViolation(e) => {
                AppError::Conflict(kind.to_string(), anyhow::Error::new(e))
            }
            IdentityError::OutOfRange(v) => {
                AppError::InternalError(anyhow::anyhow!("value out of uint32 range: {}", v))
            }
            IdentityError::PasswordPolicy(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            IdentityError::StoreUnavailable => AppError::ServiceUnavailable,
            IdentityError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            IdentityError::Internal(e) => AppError::InternalError(e),
            conflict => {
                let message = conflict.to_string();
                AppError::Conflict(kind.to_string(), anyhow::anyhow!(message))
            }
        }
    }
}
