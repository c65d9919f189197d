use axum::{http::StatusCode, response::{IntoResponse, Response}};
use tracing::error;

use crate::platform::PlatformError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        use PlatformError::*;
        match self.0.downcast_ref::<PlatformError>() {
            Some(Unauthorized | SessionExpired | InvalidCredentials) => StatusCode::UNAUTHORIZED,
            Some(Forbidden(_) | BadSignature) => StatusCode::FORBIDDEN,
            Some(NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Conflict(_)) => StatusCode::CONFLICT,
            Some(Database(_) | Hash(_) | Integrity(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{:#}", self.0);
            return (status, "internal error").into_response();
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
