use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::{AppResult, platform::Platform};

#[derive(Debug, Deserialize)]
pub struct Signature {
    expires: i64,
    token: String,
}

/// Serves an object behind a signed link. No session is needed; the
/// signature is the authorization.
#[debug_handler(state = super::AppState)]
pub async fn signed_object(
    Path((bucket, path)): Path<(String, String)>,
    Query(sig): Query<Signature>,
    State(platform): State<Platform>,
) -> AppResult<Response> {
    platform.storage().verify(&bucket, &path, sig.expires, &sig.token)?;
    let object = platform.storage().download(&bucket, &path).await?;
    debug!(%bucket, %path, size = object.data.len(), "serving object");

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, "private, no-store".to_owned()),
        ],
        object.data,
    )
        .into_response())
}
