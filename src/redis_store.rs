use crate::error::{redis_error, SessionResult};
use crate::model::{SessionPatch, SessionRecord};
use crate::store::SessionStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, AsyncIter, Client};
use std::collections::HashMap;

const DEFAULT_NAMESPACE: &str = "agent:session";

/// Redis-backed session store that mirrors the in-memory semantics.
///
/// Records live as JSON strings under `{ns}:session:{user}:{session}`
/// with a native Redis expiry; the per-user index is a set under
/// `{ns}:user:{user}`. Expiry of the primary key is reflected in
/// index-derived reads through lazy reconciliation, never through a
/// separate notification channel.
///
/// Constructors accept connection URLs only; no Redis client types appear
/// in the public API.
pub struct RedisSessionStore {
    client: Client,
    namespace: String,
}

impl RedisSessionStore {
    /// Creates a store using a Redis URL and the default namespace prefix.
    pub fn from_url(url: impl AsRef<str>) -> SessionResult<Self> {
        let client = Client::open(url.as_ref()).map_err(redis_error)?;
        Ok(Self::from_client_with_namespace(client, DEFAULT_NAMESPACE))
    }

    /// Creates a store using a Redis URL and a custom namespace prefix.
    pub fn from_url_with_namespace(
        url: impl AsRef<str>,
        namespace: impl Into<String>,
    ) -> SessionResult<Self> {
        let client = Client::open(url.as_ref()).map_err(redis_error)?;
        Ok(Self::from_client_with_namespace(client, namespace))
    }

    fn from_client_with_namespace(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn conn(&self) -> SessionResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)
    }

    fn record_key(&self, user_id: &str, session_id: &str) -> String {
        format!("{}:session:{}:{}", self.namespace, user_id, session_id)
    }

    fn index_key(&self, user_id: &str) -> String {
        format!("{}:user:{}", self.namespace, user_id)
    }

    fn serialize(record: &SessionRecord) -> SessionResult<String> {
        Ok(serde_json::to_string(record)?)
    }

    fn deserialize(payload: String) -> SessionResult<SessionRecord> {
        Ok(serde_json::from_str(&payload)?)
    }

    async fn write_record(
        &self,
        conn: &mut MultiplexedConnection,
        user_id: &str,
        record: &SessionRecord,
    ) -> SessionResult<()> {
        let key = self.record_key(user_id, &record.session_id);
        let payload = Self::serialize(record)?;
        if record.ttl_secs == 0 {
            // Zero TTL means never expire, matching the in-memory backend.
            conn.set::<_, _, ()>(key, payload).await.map_err(redis_error)
        } else {
            conn.set_ex::<_, _, ()>(key, payload, record.ttl_secs)
                .await
                .map_err(redis_error)
        }
    }

    /// Lazy reconciliation of one user's index set against the primary
    /// records, which Redis expires natively.
    async fn reconcile_user(
        &self,
        conn: &mut MultiplexedConnection,
        user_id: &str,
    ) -> SessionResult<()> {
        let index_key = self.index_key(user_id);
        let session_ids: Vec<String> = conn.smembers(&index_key).await.map_err(redis_error)?;
        for session_id in session_ids {
            let live: bool = conn
                .exists(self.record_key(user_id, &session_id))
                .await
                .map_err(redis_error)?;
            if !live {
                tracing::debug!(user_id, session_id, "dropping expired session id from user index");
                let _: () = conn
                    .srem(&index_key, &session_id)
                    .await
                    .map_err(redis_error)?;
            }
        }
        let remaining: u64 = conn.scard(&index_key).await.map_err(redis_error)?;
        if remaining == 0 {
            let _: () = conn.del(&index_key).await.map_err(redis_error)?;
        }
        Ok(())
    }

    async fn scan_keys(
        &self,
        conn: &mut MultiplexedConnection,
        pattern: String,
    ) -> SessionResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut iter: AsyncIter<'_, String> =
            conn.scan_match(pattern).await.map_err(redis_error)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, user_id: &str, record: SessionRecord) -> SessionResult<String> {
        let mut conn = self.conn().await?;
        let session_id = record.session_id.clone();
        self.write_record(&mut conn, user_id, &record).await?;
        let _: () = conn
            .sadd(self.index_key(user_id), &session_id)
            .await
            .map_err(redis_error)?;
        Ok(session_id)
    }

    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        patch: SessionPatch,
    ) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        let existing: Option<String> = conn
            .get(self.record_key(user_id, session_id))
            .await
            .map_err(redis_error)?;
        let Some(payload) = existing else {
            return Ok(false);
        };
        let mut record = Self::deserialize(payload)?;
        patch.apply(&mut record);
        self.write_record(&mut conn, user_id, &record).await?;
        Ok(true)
    }

    async fn get(&self, user_id: &str, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        let mut conn = self.conn().await?;
        let payload: Option<String> = conn
            .get(self.record_key(user_id, session_id))
            .await
            .map_err(redis_error)?;
        payload.map(Self::deserialize).transpose()
    }

    async fn exists(&self, user_id: &str, session_id: &str) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(self.record_key(user_id, session_id))
            .await
            .map_err(redis_error)
    }

    async fn user_exists(&self, user_id: &str) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        self.reconcile_user(&mut conn, user_id).await?;
        conn.exists(self.index_key(user_id))
            .await
            .map_err(redis_error)
    }

    async fn session_ids(&self, user_id: &str) -> SessionResult<Vec<String>> {
        let mut conn = self.conn().await?;
        self.reconcile_user(&mut conn, user_id).await?;
        let mut ids: Vec<String> = conn
            .smembers(self.index_key(user_id))
            .await
            .map_err(redis_error)?;
        ids.sort();
        Ok(ids)
    }

    async fn all_sessions(&self) -> SessionResult<HashMap<String, Vec<String>>> {
        let mut conn = self.conn().await?;
        let prefix = format!("{}:user:", self.namespace);
        let keys = self.scan_keys(&mut conn, format!("{prefix}*")).await?;

        let mut result = HashMap::new();
        for key in keys {
            let Some(user_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            let user_id = user_id.to_owned();
            self.reconcile_user(&mut conn, &user_id).await?;
            let mut ids: Vec<String> = conn
                .smembers(self.index_key(&user_id))
                .await
                .map_err(redis_error)?;
            if ids.is_empty() {
                continue;
            }
            ids.sort();
            result.insert(user_id, ids);
        }
        Ok(result)
    }

    async fn most_recent_session_id(&self, user_id: &str) -> SessionResult<Option<String>> {
        let mut conn = self.conn().await?;
        self.reconcile_user(&mut conn, user_id).await?;
        let session_ids: Vec<String> = conn
            .smembers(self.index_key(user_id))
            .await
            .map_err(redis_error)?;

        let mut latest: Option<(time::OffsetDateTime, String)> = None;
        for session_id in session_ids {
            let payload: Option<String> = conn
                .get(self.record_key(user_id, &session_id))
                .await
                .map_err(redis_error)?;
            let Some(payload) = payload else {
                continue;
            };
            let record = Self::deserialize(payload)?;
            let Some(updated) = record.last_updated else {
                continue;
            };
            match &latest {
                Some((best, _)) if *best >= updated => {}
                _ => latest = Some((updated, session_id)),
            }
        }
        Ok(latest.map(|(_, session_id)| session_id))
    }

    async fn count(&self) -> SessionResult<usize> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}:session:*", self.namespace);
        let keys = self.scan_keys(&mut conn, pattern).await?;
        Ok(keys.len())
    }

    async fn delete(&self, user_id: &str, session_id: &str) -> SessionResult<bool> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .srem(self.index_key(user_id), session_id)
            .await
            .map_err(redis_error)?;
        let removed: u64 = conn
            .del(self.record_key(user_id, session_id))
            .await
            .map_err(redis_error)?;
        Ok(removed > 0)
    }
}
