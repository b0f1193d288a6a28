use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use tracing::debug;

/// Segment names come straight off the URL; reject anything that could
/// escape the media root.
pub fn is_valid_segment_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

fn not_served(session_id: &str, what: &str) -> impl IntoResponse {
    debug!(session = %session_id, what, "media request delegated to the static tier");
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not_served" })))
}

/// GET /hls/{sessionID}/master.m3u8 — segment delivery lives on the static
/// media tier; the coordination node only owns the route shape.
pub async fn master_playlist(Path(session_id): Path<String>) -> impl IntoResponse {
    not_served(&session_id, "master playlist")
}

/// GET /hls/{sessionID}/playlist.m3u8
pub async fn media_playlist(Path(session_id): Path<String>) -> impl IntoResponse {
    not_served(&session_id, "media playlist")
}

/// GET /hls/{sessionID}/{segment}
pub async fn segment(Path((session_id, segment)): Path<(String, String)>) -> impl IntoResponse {
    if !is_valid_segment_name(&segment) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_segment_name" })),
        )
            .into_response();
    }
    not_served(&session_id, "segment").into_response()
}

/// GET /hls/{sessionID}/{quality}/playlist.m3u8
pub async fn quality_playlist(
    Path((session_id, _quality)): Path<(String, String)>,
) -> impl IntoResponse {
    not_served(&session_id, "quality playlist")
}

/// GET /hls/{sessionID}/{quality}/{segment}
pub async fn quality_segment(
    Path((session_id, _quality, segment)): Path<(String, String, String)>,
) -> impl IntoResponse {
    if !is_valid_segment_name(&segment) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_segment_name" })),
        )
            .into_response();
    }
    not_served(&session_id, "quality segment").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_attempts() {
        assert!(is_valid_segment_name("segment-003.ts"));
        assert!(!is_valid_segment_name("../secrets.env"));
        assert!(!is_valid_segment_name("a/b.ts"));
        assert!(!is_valid_segment_name("a\\b.ts"));
        assert!(!is_valid_segment_name(""));
    }
}
