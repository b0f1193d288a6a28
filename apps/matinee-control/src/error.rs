use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// REST-facing failures, rendered as `{"error": "<code>"}` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session does not exist")]
    InvalidSession,
    #[error("failed to persist session record")]
    SessionCreationFailed,
    #[error("failed to persist host capability")]
    HostRegistrationFailed,
    #[error("no active streaming server available")]
    NoStreamingServers,
    #[error("failed to read session state")]
    ValidationError,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidSession => StatusCode::NOT_FOUND,
            ApiError::SessionCreationFailed | ApiError::HostRegistrationFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NoStreamingServers => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ValidationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidSession => "invalid_session",
            ApiError::SessionCreationFailed => "session_creation_failed",
            ApiError::HostRegistrationFailed => "host_registration_failed",
            ApiError::NoStreamingServers => "no_streaming_servers_available",
            ApiError::ValidationError => "validation_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.code() })).into_response()
    }
}
