use axum::{extract::State, http::header, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;

use matinee_proto::EdgeNodeDescriptor;

use crate::{bridge::UpdateBridge, config::Config, fleet, hub::SessionHub, storage::StateStore};

/// Everything the edge handlers need, passed by value instead of living in
/// process globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: StateStore,
    pub hub: SessionHub,
    pub bridge: UpdateBridge,
    pub metrics: PrometheusHandle,
}

/// GET /status - this node's descriptor with the live connection count.
pub async fn status_handler(State(state): State<AppState>) -> Json<EdgeNodeDescriptor> {
    Json(fleet::descriptor(
        &state.config,
        state.hub.total_connections(),
    ))
}

/// GET /metrics - Prometheus scrape endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
