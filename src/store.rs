use crate::error::SessionResult;
use crate::inmemory::InMemorySessionStore;
use crate::model::{SessionPatch, SessionRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Persistent session storage used by the coordinator.
///
/// Implementations keep one record per `(user_id, session_id)` pair plus a
/// per-user index of session ids. Expired records must never be returned
/// by any read, and reads that depend on the per-user index reconcile it
/// lazily first: index entries whose primary record is gone are dropped,
/// and an emptied index set is deleted.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Inserts a record with a fresh TTL and indexes its id under the user.
    /// Returns the stored session id.
    async fn create(&self, user_id: &str, record: SessionRecord) -> SessionResult<String>;

    /// Read-modify-write partial update. Returns `false` when no live
    /// record exists (callers create first). The TTL countdown restarts on
    /// every successful update, using the patched TTL when supplied.
    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        patch: SessionPatch,
    ) -> SessionResult<bool>;

    async fn get(&self, user_id: &str, session_id: &str) -> SessionResult<Option<SessionRecord>>;

    async fn exists(&self, user_id: &str, session_id: &str) -> SessionResult<bool>;

    /// Whether the user has at least one live session.
    async fn user_exists(&self, user_id: &str) -> SessionResult<bool>;

    /// Ids of the user's live sessions, sorted for determinism.
    async fn session_ids(&self, user_id: &str) -> SessionResult<Vec<String>>;

    /// Every user with live sessions, mapped to their session ids.
    async fn all_sessions(&self) -> SessionResult<HashMap<String, Vec<String>>>;

    /// The user's session with the greatest `last_updated`. Records still
    /// carrying the never-updated sentinel are excluded.
    async fn most_recent_session_id(&self, user_id: &str) -> SessionResult<Option<String>>;

    /// Number of live session records system-wide.
    async fn count(&self) -> SessionResult<usize>;

    /// Removes the record and its index entry. Returns `false` when the
    /// record was already absent.
    async fn delete(&self, user_id: &str, session_id: &str) -> SessionResult<bool>;
}

/// Backend selection for [`create_session_store`].
#[derive(Clone, Debug)]
pub enum SessionBackendConfig {
    InMemory,
    #[cfg(feature = "redis")]
    Redis {
        url: String,
        /// Key prefix; defaults to the crate's namespace when `None`.
        namespace: Option<String>,
    },
}

/// Builds a store handle for the selected backend.
///
/// The handle is meant to be constructed once at startup and injected into
/// the coordinator; there is no process-wide singleton.
pub fn create_session_store(config: SessionBackendConfig) -> SessionResult<Arc<dyn SessionStore>> {
    match config {
        SessionBackendConfig::InMemory => Ok(Arc::new(InMemorySessionStore::new())),
        #[cfg(feature = "redis")]
        SessionBackendConfig::Redis { url, namespace } => {
            let store = match namespace {
                Some(ns) => crate::redis_store::RedisSessionStore::from_url_with_namespace(url, ns)?,
                None => crate::redis_store::RedisSessionStore::from_url(url)?,
            };
            Ok(Arc::new(store))
        }
    }
}
