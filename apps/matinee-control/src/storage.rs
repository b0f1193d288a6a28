use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use matinee_proto::{host_key, session_key, state_key, SessionRecord};

/// Redis-backed persistence for session records and host capabilities.
#[derive(Clone)]
pub struct Storage {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl Storage {
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis, ttl_seconds })
    }

    /// Persist the session record and its initial playback snapshot in a
    /// single pipeline so the two are never half-created.
    pub async fn create_session_record(
        &self,
        session_id: &str,
        record: &SessionRecord,
    ) -> Result<()> {
        let mut conn = self.redis.clone();
        let record_json = serde_json::to_string(record)?;
        let state_json = serde_json::to_string(&record.state)?;
        redis::pipe()
            .cmd("SETEX")
            .arg(session_key(session_id))
            .arg(self.ttl_seconds)
            .arg(record_json)
            .ignore()
            .cmd("SETEX")
            .arg(state_key(session_id))
            .arg(self.ttl_seconds)
            .arg(state_json)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Store the host capability token. Expires with the session.
    pub async fn register_host_token(&self, session_id: &str, token: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(host_key(session_id), token, self.ttl_seconds)
            .await?;
        Ok(())
    }

    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(session_key(session_id)).await?;
        Ok(exists)
    }

    /// The raw persisted record JSON, passed through untouched by the
    /// `GET /api/sessions/{id}` handler.
    pub async fn get_session_raw(&self, session_id: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(session_key(session_id)).await?;
        Ok(value)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        match self.get_session_raw(session_id).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn get_host_token(&self, session_id: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let token: Option<String> = conn.get(host_key(session_id)).await?;
        Ok(token)
    }

    /// Count live sessions by scanning base `session:<id>` keys. Subkeys
    /// (`:host`, `:state`) carry extra colons and are skipped.
    pub async fn count_sessions(&self) -> Result<usize> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut count = 0usize;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg("session:*")
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            count += keys
                .iter()
                .filter(|key| key.matches(':').count() == 1)
                .count();
            if cursor == 0 {
                break;
            }
        }
        Ok(count)
    }
}
