use thiserror::Error;

use crate::{db::EmptyBody, platform::PlatformError};

/// Input rejected before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("only PDF, DOCX, and XLSX files are allowed (got {0})")]
    UnsupportedType(String),

    #[error("file size must be at most 10MB (got {0} bytes)")]
    TooLarge(u64),

    #[error("message needs text or an attachment")]
    EmptyMessage,

    #[error("no room is open")]
    NoActiveRoom,

    #[error("username must be 3-20 letters, numbers, or underscores")]
    Username,

    #[error("display name must be 1-50 characters")]
    DisplayName,

    #[error("bio must be at most 500 characters")]
    Bio,

    #[error("email address is not valid")]
    Email,

    #[error("password must be at least 6 characters")]
    Password,

    #[error("a report needs a reason")]
    EmptyReason,

    #[error("room name cannot be empty")]
    RoomName,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error("session expired, sign in again")]
    SessionExpired,

    #[error("not signed in")]
    NotSignedIn,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The caller's role or status does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0} already taken")]
    Conflict(String),

    #[error("backend error: {0}")]
    Transport(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<PlatformError> for Error {
    fn from(err: PlatformError) -> Self {
        use PlatformError::*;
        match err {
            Unauthorized => Error::Auth(AuthError::NotSignedIn),
            SessionExpired => Error::Auth(AuthError::SessionExpired),
            InvalidCredentials => Error::Auth(AuthError::InvalidCredentials),
            Forbidden(why) => Error::Forbidden(why),
            NotFound(what) => Error::NotFound(what),
            Conflict(what) => Error::Conflict(what),
            BadSignature | Database(_) | Hash(_) | Integrity(_) => Error::Transport(err.to_string()),
        }
    }
}

impl From<EmptyBody> for Error {
    fn from(err: EmptyBody) -> Self {
        Error::Transport(err.to_string())
    }
}

impl Error {
    #[inline]
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
