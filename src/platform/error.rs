use thiserror::Error;

/// Errors raised by the backend platform: auth, policies, storage and tables.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not signed in")]
    Unauthorized,

    #[error("session expired")]
    SessionExpired,

    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("invalid signature")]
    BadSignature,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("malformed data: {0}")]
    Integrity(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

impl PlatformError {
    pub(crate) fn forbidden(why: impl Into<String>) -> Self {
        Self::Forbidden(why.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

/// Turns a unique-constraint violation into `Conflict(what)`.
pub(crate) fn conflict_on_unique(what: &str) -> impl FnOnce(sqlx::Error) -> PlatformError + '_ {
    move |err| match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PlatformError::Conflict(what.to_owned())
        }
        _ => PlatformError::Database(err),
    }
}
