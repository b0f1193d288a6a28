//! Shared wire and data types for the matinee playback-sync cluster.
//!
//! Everything that crosses a process boundary lives here: the playback
//! state mirrored by every viewer, the WebSocket frames exchanged with
//! clients, the edge-node descriptor reported to the control plane, and
//! the Redis key / channel naming helpers both node roles must agree on.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The tuple every participant in a session tries to mirror.
///
/// `timestamp` is a client-supplied monotonic clock in milliseconds; writes
/// with a timestamp at or below the persisted one are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub paused: bool,
    #[serde(rename = "currentTime")]
    pub current_time: f64,
    #[serde(rename = "playbackRate")]
    pub playback_rate: f64,
    pub timestamp: i64,
}

impl PlaybackState {
    /// State a freshly created session starts from: paused at the beginning.
    pub fn initial(now: i64) -> Self {
        Self {
            paused: true,
            current_time: 0.0,
            playback_rate: 1.0,
            timestamp: now,
        }
    }
}

/// Full session record persisted under `session:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(flatten)]
    pub state: PlaybackState,
    #[serde(rename = "streamingUrl")]
    pub streaming_url: String,
    #[serde(rename = "hostToken")]
    pub host_token: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
}

impl SessionRecord {
    pub fn new(streaming_url: String, host_token: String, now: i64) -> Self {
        Self {
            state: PlaybackState::initial(now),
            streaming_url,
            host_token,
            last_updated: now,
        }
    }
}

/// Liveness of an edge node as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Stale,
    Evicted,
}

/// Descriptor an edge node registers and heartbeats with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeNodeDescriptor {
    pub id: String,
    pub url: String,
    pub capacity: i32,
    pub current_load: i32,
    pub status: NodeStatus,
    /// Seconds since the Unix epoch of the last heartbeat.
    pub last_ping: i64,
}

impl EdgeNodeDescriptor {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Fraction of declared capacity in use. A non-positive capacity sorts
    /// behind every node with headroom.
    pub fn load_ratio(&self) -> f64 {
        if self.capacity <= 0 {
            return f64::INFINITY;
        }
        self.current_load as f64 / self.capacity as f64
    }
}

/// Static description of the video a session is watching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoManifest {
    #[serde(rename = "chunkDuration")]
    pub chunk_duration: i32,
    #[serde(rename = "chunkCount")]
    pub chunk_count: i32,
    #[serde(rename = "videoDuration")]
    pub video_duration: f64,
    #[serde(rename = "videoFileType")]
    pub video_file_type: String,
}

impl Default for VideoManifest {
    fn default() -> Self {
        Self {
            chunk_duration: 5,
            chunk_count: 10,
            video_duration: 117.0,
            video_file_type: "mp4".to_string(),
        }
    }
}

/// Frames clients send to an edge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Host-driven playback mutation. Silently dropped from non-hosts.
    #[serde(rename = "stateUpdate")]
    StateUpdate { state: PlaybackState },
    /// Request for the video manifest, answered on this connection only.
    #[serde(rename = "videoMetadata")]
    VideoMetadata,
    /// Application-level keepalive.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Frames an edge node sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// A playback state to mirror. `servertime` is stamped at send time so
    /// the client can estimate one-way latency.
    #[serde(rename = "stateUpdate")]
    StateUpdate {
        state: PlaybackState,
        servertime: i64,
    },
    #[serde(rename = "videoMetadata")]
    VideoMetadata { state: VideoManifest },
    #[serde(rename = "heartbeatAck")]
    HeartbeatAck,
}

impl ServerFrame {
    pub fn state_update(state: PlaybackState, now: i64) -> Self {
        Self::StateUpdate {
            state,
            servertime: now,
        }
    }
}

/// Prefix of the per-session pub/sub channel.
pub const UPDATES_CHANNEL_PREFIX: &str = "session-updates:";

pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

pub fn host_key(session_id: &str) -> String {
    format!("session:{}:host", session_id)
}

pub fn state_key(session_id: &str) -> String {
    format!("session:{}:state", session_id)
}

pub fn updates_channel(session_id: &str) -> String {
    format!("{}{}", UPDATES_CHANNEL_PREFIX, session_id)
}

/// Inverse of [`updates_channel`].
pub fn session_id_from_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix(UPDATES_CHANNEL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn playback_state_uses_wire_field_names() {
        let state = PlaybackState {
            paused: false,
            current_time: 12.5,
            playback_rate: 1.0,
            timestamp: 1000,
        };
        let value = serde_json::to_value(state).unwrap();
        assert_eq!(
            value,
            json!({
                "paused": false,
                "currentTime": 12.5,
                "playbackRate": 1.0,
                "timestamp": 1000,
            })
        );
    }

    #[test]
    fn client_frames_decode_by_type_tag() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"stateUpdate","state":{"paused":false,"currentTime":3.0,"playbackRate":1.5,"timestamp":42}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::StateUpdate { state } => {
                assert!(!state.paused);
                assert_eq!(state.timestamp, 42);
                assert_eq!(state.playback_rate, 1.5);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let heartbeat: ClientFrame = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(heartbeat, ClientFrame::Heartbeat);

        let metadata: ClientFrame = serde_json::from_str(r#"{"type":"videoMetadata"}"#).unwrap();
        assert_eq!(metadata, ClientFrame::VideoMetadata);
    }

    #[test]
    fn server_state_update_carries_servertime() {
        let frame = ServerFrame::state_update(PlaybackState::initial(500), 12345);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "stateUpdate");
        assert_eq!(value["servertime"], 12345);
        assert_eq!(value["state"]["paused"], true);
    }

    #[test]
    fn heartbeat_ack_is_bare_tag() {
        let rendered = serde_json::to_string(&ServerFrame::HeartbeatAck).unwrap();
        assert_eq!(rendered, r#"{"type":"heartbeatAck"}"#);
    }

    #[test]
    fn session_record_flattens_playback_state() {
        let record = SessionRecord::new(
            "http://edge-1:8081".to_string(),
            "tok-abc".to_string(),
            777,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["paused"], true);
        assert_eq!(value["streamingUrl"], "http://edge-1:8081");
        assert_eq!(value["hostToken"], "tok-abc");
        assert_eq!(value["lastUpdated"], 777);

        let back: SessionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.state.timestamp, 777);
    }

    #[test]
    fn descriptor_round_trips_camel_case() {
        let node = EdgeNodeDescriptor {
            id: "edge-1".to_string(),
            url: "http://localhost:8081".to_string(),
            capacity: 100,
            current_load: 7,
            status: NodeStatus::Active,
            last_ping: 1_700_000_000,
        };
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["currentLoad"], 7);
        assert_eq!(value["lastPing"], 1_700_000_000i64);
        assert_eq!(value["status"], "active");

        let back: EdgeNodeDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn load_ratio_guards_zero_capacity() {
        let mut node = EdgeNodeDescriptor {
            id: "edge-1".to_string(),
            url: String::new(),
            capacity: 0,
            current_load: 0,
            status: NodeStatus::Active,
            last_ping: 0,
        };
        assert!(node.load_ratio().is_infinite());
        node.capacity = 50;
        node.current_load = 25;
        assert_eq!(node.load_ratio(), 0.5);
    }

    #[test]
    fn channel_name_round_trips() {
        let channel = updates_channel("abc-123");
        assert_eq!(channel, "session-updates:abc-123");
        assert_eq!(session_id_from_channel(&channel), Some("abc-123"));
        assert_eq!(session_id_from_channel("other:abc"), None);
    }
}
