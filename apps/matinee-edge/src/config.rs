use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use matinee_proto::VideoManifest;

#[derive(Debug, Parser)]
#[command(
    name = "matinee-edge",
    about = "Matinee edge node: WebSocket termination and session fan-out"
)]
pub struct Cli {
    /// Stable identifier this node registers under. Generated when unset.
    #[arg(long, env = "SERVER_ID")]
    pub server_id: Option<String>,

    /// Base URL clients reach this node at. Derived from the port when unset.
    #[arg(long, env = "SERVER_URL")]
    pub server_url: Option<String>,

    /// Port the WebSocket/HTTP listener binds to.
    #[arg(long, env = "SERVER_PORT", default_value_t = 8081)]
    pub port: u16,

    /// Base URL of the control node.
    #[arg(
        long,
        env = "MATINEE_CONTROL_URL",
        default_value = "http://localhost:8080"
    )]
    pub control_url: String,

    /// Redis connection URI for state snapshots and the update bus.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Declared connection capacity reported to the control plane.
    #[arg(long, env = "MATINEE_CAPACITY", default_value_t = 100)]
    pub capacity: i32,

    /// Seconds between heartbeats to the control node.
    #[arg(long, env = "MATINEE_HEARTBEAT_SECS", default_value_t = 30)]
    pub heartbeat_secs: u64,

    /// Session state TTL in seconds, refreshed on every accepted host write.
    #[arg(long, env = "SESSION_TTL", default_value_t = 86_400)]
    pub session_ttl_seconds: u64,

    /// Segment length in seconds advertised in the video manifest.
    #[arg(long, env = "MATINEE_CHUNK_DURATION", default_value_t = 5)]
    pub chunk_duration: i32,

    /// Segment count advertised in the video manifest.
    #[arg(long, env = "MATINEE_CHUNK_COUNT", default_value_t = 10)]
    pub chunk_count: i32,

    /// Total video duration in seconds advertised in the manifest.
    #[arg(long, env = "MATINEE_VIDEO_DURATION", default_value_t = 117.0)]
    pub video_duration: f64,

    /// Container type advertised in the manifest.
    #[arg(long, env = "MATINEE_VIDEO_FILE_TYPE", default_value = "mp4")]
    pub video_file_type: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_id: String,
    pub server_url: String,
    pub port: u16,
    pub control_url: String,
    pub redis_url: String,
    pub capacity: i32,
    pub heartbeat_interval: Duration,
    pub session_ttl_seconds: u64,
    pub manifest: VideoManifest,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let server_id = cli
            .server_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("edge-{}", Uuid::new_v4()));
        let server_url = cli
            .server_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| format!("http://localhost:{}", cli.port));

        Self {
            server_id,
            server_url,
            port: cli.port,
            control_url: cli.control_url.trim_end_matches('/').to_string(),
            redis_url: cli.redis_url,
            capacity: cli.capacity,
            heartbeat_interval: Duration::from_secs(cli.heartbeat_secs),
            session_ttl_seconds: cli.session_ttl_seconds,
            manifest: VideoManifest {
                chunk_duration: cli.chunk_duration,
                chunk_count: cli.chunk_count,
                video_duration: cli.video_duration,
                video_file_type: cli.video_file_type,
            },
        }
    }
}
