//! HTTP surface of the platform: signed downloads and the websocket change
//! feed.

mod download;
mod feed;

use axum::{Router, extract::FromRef, routing::get};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::platform::Platform;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub platform: Platform,
}

pub fn router(platform: Platform) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/storage/v1/object/sign/{bucket}/{*path}", get(download::signed_object))
        .route("/realtime/v1/{table}", get(feed::changes))
        .with_state(AppState { platform })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(listener: TcpListener, platform: Platform) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr()?, "listening");
    axum::serve(listener, router(platform)).await
}
