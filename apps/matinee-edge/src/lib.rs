pub mod bridge;
pub mod config;
pub mod fleet;
pub mod hub;
pub mod media;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod websocket;

use axum::{http::Method, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::{metrics_handler, status_handler, AppState};
use crate::websocket::ws_handler;

/// The edge node's HTTP surface: the WebSocket endpoint, node status, the
/// metrics scrape, and the HLS route shape (delivery itself lives on the
/// static media tier).
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/hls/:session/master.m3u8", get(media::master_playlist))
        .route("/hls/:session/playlist.m3u8", get(media::media_playlist))
        .route("/hls/:session/:name", get(media::segment))
        .route("/hls/:session/:name/playlist.m3u8", get(media::quality_playlist))
        .route("/hls/:session/:name/:segment", get(media::quality_segment))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
