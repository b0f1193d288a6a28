use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::warn;

use matinee_proto::{host_key, session_key, state_key, updates_channel, PlaybackState};

/// What became of a host's `stateUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Persisted, TTLs refreshed, and published on the session channel.
    Accepted,
    /// Older than (or equal to) the persisted snapshot; ignored.
    Stale,
}

/// Whether an incoming host timestamp supersedes the persisted one.
///
/// A missing snapshot accepts the write; otherwise the timestamp must be
/// strictly newer, which keeps the persisted sequence non-decreasing.
pub fn supersedes(incoming: i64, persisted: Option<i64>) -> bool {
    match persisted {
        Some(current) => incoming > current,
        None => true,
    }
}

/// Redis access for the edge node: playback snapshots, host tokens, and the
/// per-session publish side of the update bus.
#[derive(Clone)]
pub struct StateStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl StateStore {
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis, ttl_seconds })
    }

    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(session_key(session_id)).await?;
        Ok(exists)
    }

    pub async fn get_host_token(&self, session_id: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let token: Option<String> = conn.get(host_key(session_id)).await?;
        Ok(token)
    }

    pub async fn get_state(&self, session_id: &str) -> Result<Option<PlaybackState>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(state_key(session_id)).await?;
        match value {
            Some(json) => match serde_json::from_str(&json) {
                Ok(state) => Ok(Some(state)),
                Err(err) => {
                    warn!(session = %session_id, error = %err, "undecodable persisted state");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Apply a host update: accept iff its timestamp supersedes the
    /// persisted snapshot, then write back with TTL refresh on the snapshot
    /// and the session record, and publish on the session channel — all in
    /// one pipeline.
    pub async fn apply_host_update(
        &self,
        session_id: &str,
        state: &PlaybackState,
    ) -> Result<UpdateOutcome> {
        let persisted = self.get_state(session_id).await?;
        if !supersedes(state.timestamp, persisted.map(|s| s.timestamp)) {
            return Ok(UpdateOutcome::Stale);
        }

        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(state)?;
        redis::pipe()
            .cmd("SETEX")
            .arg(state_key(session_id))
            .arg(self.ttl_seconds)
            .arg(&payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(session_key(session_id))
            .arg(self.ttl_seconds)
            .ignore()
            .cmd("EXPIRE")
            .arg(host_key(session_id))
            .arg(self.ttl_seconds)
            .ignore()
            .cmd("PUBLISH")
            .arg(updates_channel(session_id))
            .arg(&payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(UpdateOutcome::Accepted)
    }
}
