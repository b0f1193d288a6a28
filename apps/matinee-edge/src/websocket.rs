use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use matinee_proto::{now_millis, ClientFrame, ServerFrame};

use crate::{
    state::AppState,
    storage::UpdateOutcome,
};

/// Close code for rejected sessions and host claims.
const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Close code when the backing store is unreachable during the handshake.
const CLOSE_BACKEND_UNAVAILABLE: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "sessionID")]
    pub session_id: Option<String>,
    #[serde(rename = "isHost")]
    pub is_host: Option<String>,
    #[serde(rename = "hostToken")]
    pub host_token: Option<String>,
}

struct Denied {
    code: u16,
    reason: &'static str,
}

/// GET /ws - WebSocket upgrade. A missing session id is rejected before the
/// upgrade; everything else is decided on the open socket so the client gets
/// a close code instead of a failed handshake.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing session ID").into_response();
    };

    let wants_host = query.is_host.as_deref() == Some("true");
    let host_token = query.host_token.filter(|token| !token.is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, wants_host, host_token))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    session_id: String,
    wants_host: bool,
    host_token: Option<String>,
) {
    let is_host = match authorize(&state, &session_id, wants_host, host_token.as_deref()).await {
        Ok(is_host) => is_host,
        Err(denied) => {
            counter!("matinee_edge_connections_rejected_total", 1, "reason" => denied.reason);
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: denied.code,
                    reason: denied.reason.into(),
                })))
                .await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let registration = state.hub.attach(&session_id, connection_id).await;
    if registration.first_in_session {
        state.bridge.ensure_subscribed(&session_id);
    }
    counter!("matinee_edge_connections_total", 1);
    gauge!(
        "matinee_edge_connections_active",
        state.hub.total_connections() as f64
    );
    info!(
        session = %session_id,
        connection = %connection_id,
        is_host,
        "viewer attached"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rx = registration.receiver;
    let sender = registration.sender;

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        debug!(session = %writer_session, "writer task finished");
    });

    // Late joiners mirror the persisted state immediately; the host already
    // has it locally.
    if !is_host {
        match state.store.get_state(&session_id).await {
            Ok(Some(playback)) => {
                send_frame(
                    &sender,
                    &session_id,
                    &ServerFrame::state_update(playback, now_millis()),
                );
            }
            Ok(None) => warn!(session = %session_id, "no persisted state to deliver on attach"),
            Err(err) => {
                warn!(session = %session_id, error = %err, "failed to load state for attach")
            }
        }
    }

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(&state, &session_id, is_host, &sender, &text).await;
            }
            Ok(Message::Binary(data)) => {
                // Some clients send JSON in binary frames; treat them alike.
                match String::from_utf8(data) {
                    Ok(text) => handle_frame(&state, &session_id, is_host, &sender, &text).await,
                    Err(_) => {
                        debug!(session = %session_id, "ignoring non-UTF8 binary frame");
                    }
                }
            }
            Ok(Message::Close(_)) => {
                debug!(session = %session_id, connection = %connection_id, "client closed");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(
                    session = %session_id,
                    connection = %connection_id,
                    error = %err,
                    "error reading from socket"
                );
                break;
            }
        }
    }

    let remaining = state.hub.detach(&session_id, connection_id).await;
    writer.abort();
    gauge!(
        "matinee_edge_connections_active",
        state.hub.total_connections() as f64
    );
    info!(
        session = %session_id,
        connection = %connection_id,
        remaining,
        "viewer detached"
    );
}

/// Resolve whether this connection may join and whether it holds the host
/// capability. Host status is granted by the token, never by the flag alone.
async fn authorize(
    state: &AppState,
    session_id: &str,
    wants_host: bool,
    host_token: Option<&str>,
) -> Result<bool, Denied> {
    match state.store.session_exists(session_id).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(Denied {
                code: CLOSE_UNAUTHORIZED,
                reason: "invalid_session",
            })
        }
        Err(err) => {
            error!(session = %session_id, error = %err, "session lookup failed during handshake");
            return Err(Denied {
                code: CLOSE_BACKEND_UNAVAILABLE,
                reason: "backend_unavailable",
            });
        }
    }

    let verified = match host_token {
        Some(supplied) => {
            let stored = state
                .store
                .get_host_token(session_id)
                .await
                .map_err(|err| {
                    error!(session = %session_id, error = %err, "host token lookup failed");
                    Denied {
                        code: CLOSE_BACKEND_UNAVAILABLE,
                        reason: "backend_unavailable",
                    }
                })?;
            stored.as_deref() == Some(supplied)
        }
        None => false,
    };

    if wants_host && !verified {
        return Err(Denied {
            code: CLOSE_UNAUTHORIZED,
            reason: "invalid_host_token",
        });
    }

    Ok(verified)
}

async fn handle_frame(
    state: &AppState,
    session_id: &str,
    is_host: bool,
    sender: &mpsc::Sender<Message>,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            counter!("matinee_edge_bad_frames_total", 1);
            warn!(session = %session_id, error = %err, "dropping undecodable frame");
            return;
        }
    };

    match frame {
        ClientFrame::StateUpdate { state: update } => {
            if !is_host {
                counter!("matinee_edge_non_host_updates_total", 1);
                debug!(session = %session_id, "dropping state update from non-host");
                return;
            }
            match state.store.apply_host_update(session_id, &update).await {
                Ok(UpdateOutcome::Accepted) => {
                    counter!("matinee_edge_updates_accepted_total", 1);
                    debug!(
                        session = %session_id,
                        timestamp = update.timestamp,
                        "host update accepted"
                    );
                }
                Ok(UpdateOutcome::Stale) => {
                    counter!("matinee_edge_updates_stale_total", 1);
                    debug!(
                        session = %session_id,
                        timestamp = update.timestamp,
                        "stale host update ignored"
                    );
                }
                Err(err) => {
                    // Store trouble drops this action only; the socket stays up.
                    warn!(session = %session_id, error = %err, "failed to apply host update");
                }
            }
        }
        ClientFrame::VideoMetadata => {
            send_frame(
                sender,
                session_id,
                &ServerFrame::VideoMetadata {
                    state: state.config.manifest.clone(),
                },
            );
        }
        ClientFrame::Heartbeat => {
            send_frame(sender, session_id, &ServerFrame::HeartbeatAck);
        }
    }
}

/// Reply on this connection only, with the same drop-on-full policy as
/// broadcasts.
fn send_frame(sender: &mpsc::Sender<Message>, session_id: &str, frame: &ServerFrame) {
    let payload = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            warn!(session = %session_id, error = %err, "failed to serialize reply frame");
            return;
        }
    };
    match sender.try_send(Message::Text(payload)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            counter!("matinee_edge_fanout_drops_total", 1, "session" => session_id.to_string());
            warn!(session = %session_id, "outbound queue full, dropping reply");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(session = %session_id, "reply after queue close");
        }
    }
}
