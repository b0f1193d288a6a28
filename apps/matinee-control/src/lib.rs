pub mod config;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod storage;
pub mod telemetry;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    create_session, get_session, health_check, heartbeat_node, metrics_handler, register_node,
    validate_session, AppState,
};

/// The control-plane REST surface. Panics in handlers become 500s; CORS is
/// open but limited to the methods the API actually serves.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id/validate", get(validate_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/streaming-servers/register", post(register_node))
        .route("/api/streaming-servers/heartbeat", post(heartbeat_node))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}
