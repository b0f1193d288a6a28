use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use matinee_proto::{now_millis, EdgeNodeDescriptor, SessionRecord};

use crate::{error::ApiError, registry::EdgeRegistry, storage::Storage};

pub type SharedStorage = Arc<Storage>;

#[derive(Clone)]
pub struct AppState {
    pub storage: SharedStorage,
    pub registry: EdgeRegistry,
    pub metrics: PrometheusHandle,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    pub streaming_url: String,
    #[serde(rename = "hostToken")]
    pub host_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    #[serde(rename = "hostToken")]
    pub host_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateSessionResponse {
    pub valid: bool,
    #[serde(rename = "isHost")]
    pub is_host: bool,
    pub streaming_url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    servers: usize,
    sessions: usize,
}

/// POST /api/sessions - mint a session on the least-loaded edge node.
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let Some(node) = state.registry.select().await else {
        warn!("session creation refused: no active edge node");
        counter!("matinee_control_sessions_refused_total", 1);
        return Err(ApiError::NoStreamingServers);
    };

    let session_key = Uuid::new_v4().to_string();
    let host_token = Uuid::new_v4().to_string();
    let record = SessionRecord::new(node.url.clone(), host_token.clone(), now_millis());

    state
        .storage
        .create_session_record(&session_key, &record)
        .await
        .map_err(|err| {
            error!(session = %session_key, error = %err, "failed to persist session record");
            ApiError::SessionCreationFailed
        })?;
    state
        .storage
        .register_host_token(&session_key, &host_token)
        .await
        .map_err(|err| {
            error!(session = %session_key, error = %err, "failed to persist host token");
            ApiError::HostRegistrationFailed
        })?;

    debug!(session = %session_key, edge = %node.id, "session created");
    counter!("matinee_control_sessions_created_total", 1, "edge" => node.id);

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_key,
            streaming_url: node.url,
            host_token,
        }),
    ))
}

/// GET /api/sessions/{id}/validate - confirm a session and, when a token is
/// supplied, whether it grants host capability.
pub async fn validate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<ValidateSessionResponse>, ApiError> {
    let record = state
        .storage
        .get_session(&session_id)
        .await
        .map_err(|err| {
            error!(session = %session_id, error = %err, "session lookup failed");
            ApiError::ValidationError
        })?;

    let Some(record) = record else {
        return Ok(Json(ValidateSessionResponse {
            valid: false,
            is_host: false,
            streaming_url: String::new(),
        }));
    };

    let is_host = match query.host_token {
        Some(supplied) if !supplied.is_empty() => {
            let stored = state
                .storage
                .get_host_token(&session_id)
                .await
                .map_err(|err| {
                    error!(session = %session_id, error = %err, "host token lookup failed");
                    ApiError::ValidationError
                })?;
            stored.as_deref() == Some(supplied.as_str())
        }
        _ => false,
    };

    Ok(Json(ValidateSessionResponse {
        valid: true,
        is_host,
        streaming_url: record.streaming_url,
    }))
}

/// GET /api/sessions/{id} - the raw persisted record.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = state
        .storage
        .get_session_raw(&session_id)
        .await
        .map_err(|err| {
            error!(session = %session_id, error = %err, "session read failed");
            ApiError::ValidationError
        })?
        .ok_or(ApiError::InvalidSession)?;

    Ok(([(header::CONTENT_TYPE, "application/json")], raw))
}

/// POST /api/streaming-servers/register
pub async fn register_node(
    State(state): State<AppState>,
    Json(descriptor): Json<EdgeNodeDescriptor>,
) -> Json<serde_json::Value> {
    debug!(node = %descriptor.id, url = %descriptor.url, "edge node registered");
    state.registry.upsert(descriptor).await;
    Json(serde_json::json!({ "status": "registered" }))
}

/// POST /api/streaming-servers/heartbeat
pub async fn heartbeat_node(
    State(state): State<AppState>,
    Json(descriptor): Json<EdgeNodeDescriptor>,
) -> Json<serde_json::Value> {
    state.registry.heartbeat(descriptor).await;
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let sessions = match state.storage.count_sessions().await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, "failed to count sessions for health report");
            0
        }
    };
    Json(HealthStatus {
        status: "healthy",
        servers: state.registry.len().await,
        sessions,
    })
}

/// GET /metrics - Prometheus scrape endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
