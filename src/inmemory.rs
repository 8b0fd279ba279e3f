use crate::error::SessionResult;
use crate::model::{SessionPatch, SessionRecord};
use crate::store::SessionStore;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use time::{Duration, OffsetDateTime};

struct Entry {
    record: SessionRecord,
    expires_at: Option<OffsetDateTime>,
}

impl Entry {
    fn new(record: SessionRecord, now: OffsetDateTime) -> Self {
        let expires_at = expiry(now, record.ttl_secs);
        Self { record, expires_at }
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        match self.expires_at {
            Some(exp) => now >= exp,
            None => false,
        }
    }
}

fn expiry(now: OffsetDateTime, ttl_secs: u64) -> Option<OffsetDateTime> {
    if ttl_secs == 0 {
        // A zero TTL is treated as "never expire".
        return None;
    }
    Some(now + Duration::seconds(ttl_secs as i64))
}

/// In-memory implementation backed by concurrent hash maps.
///
/// Expiration is handled lazily on access; a coarse sweep runs at most
/// once a minute so abandoned sessions do not accumulate.
pub struct InMemorySessionStore {
    records: DashMap<(String, String), Entry>,
    user_index: DashMap<String, HashSet<String>>,
    cleanup_hint: Mutex<OffsetDateTime>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            user_index: DashMap::new(),
            cleanup_hint: Mutex::new(OffsetDateTime::now_utc()),
        }
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn maybe_cleanup(&self, now: OffsetDateTime) {
        let mut guard = self.cleanup_hint.lock();
        if now - *guard < Duration::seconds(60) {
            return;
        }

        let stale_keys: Vec<_> = self
            .records
            .iter()
            .filter_map(|entry| {
                if entry.value().is_expired(now) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        for key in stale_keys {
            self.records.remove(&key);
            self.unindex(&key.0, &key.1);
        }

        *guard = now;
    }

    /// Lazy reconciliation: drops index entries whose primary record has
    /// expired, and removes the index set once it empties.
    fn reconcile_user(&self, user_id: &str, now: OffsetDateTime) {
        let Some(indexed) = self
            .user_index
            .get(user_id)
            .map(|set| set.iter().cloned().collect::<Vec<_>>())
        else {
            return;
        };

        let mut stale = Vec::new();
        for session_id in indexed {
            let key = (user_id.to_owned(), session_id.clone());
            let live = match self.records.get(&key) {
                Some(entry) if entry.is_expired(now) => {
                    drop(entry);
                    self.records.remove(&key);
                    false
                }
                Some(_) => true,
                None => false,
            };
            if !live {
                stale.push(session_id);
            }
        }

        if stale.is_empty() {
            return;
        }
        tracing::debug!(user_id, removed = stale.len(), "dropped expired session ids from user index");
        if let Some(mut set) = self.user_index.get_mut(user_id) {
            for session_id in &stale {
                set.remove(session_id);
            }
            if set.is_empty() {
                drop(set);
                self.user_index.remove(user_id);
            }
        }
    }

    fn unindex(&self, user_id: &str, session_id: &str) {
        if let Some(mut set) = self.user_index.get_mut(user_id) {
            set.remove(session_id);
            if set.is_empty() {
                drop(set);
                self.user_index.remove(user_id);
            }
        }
    }

    fn live_record(&self, user_id: &str, session_id: &str, now: OffsetDateTime) -> Option<SessionRecord> {
        let key = (user_id.to_owned(), session_id.to_owned());
        if let Some(entry) = self.records.get(&key) {
            if entry.is_expired(now) {
                drop(entry);
                self.records.remove(&key);
                self.unindex(user_id, session_id);
                return None;
            }
            return Some(entry.record.clone());
        }
        None
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, user_id: &str, record: SessionRecord) -> SessionResult<String> {
        let now = Self::now();
        self.maybe_cleanup(now);
        let session_id = record.session_id.clone();
        self.records.insert(
            (user_id.to_owned(), session_id.clone()),
            Entry::new(record, now),
        );
        self.user_index
            .entry(user_id.to_owned())
            .or_default()
            .insert(session_id.clone());
        Ok(session_id)
    }

    async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        patch: SessionPatch,
    ) -> SessionResult<bool> {
        let now = Self::now();
        self.maybe_cleanup(now);
        let key = (user_id.to_owned(), session_id.to_owned());

        if let Some(mut guard) = self.records.get_mut(&key) {
            if guard.is_expired(now) {
                drop(guard);
                self.records.remove(&key);
                self.unindex(user_id, session_id);
                return Ok(false);
            }

            patch.apply(&mut guard.record);
            guard.expires_at = expiry(now, guard.record.ttl_secs);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get(&self, user_id: &str, session_id: &str) -> SessionResult<Option<SessionRecord>> {
        let now = Self::now();
        self.maybe_cleanup(now);
        Ok(self.live_record(user_id, session_id, now))
    }

    async fn exists(&self, user_id: &str, session_id: &str) -> SessionResult<bool> {
        let now = Self::now();
        Ok(self.live_record(user_id, session_id, now).is_some())
    }

    async fn user_exists(&self, user_id: &str) -> SessionResult<bool> {
        let now = Self::now();
        self.reconcile_user(user_id, now);
        Ok(self.user_index.contains_key(user_id))
    }

    async fn session_ids(&self, user_id: &str) -> SessionResult<Vec<String>> {
        let now = Self::now();
        self.reconcile_user(user_id, now);
        let mut ids: Vec<String> = self
            .user_index
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn all_sessions(&self) -> SessionResult<HashMap<String, Vec<String>>> {
        let now = Self::now();
        let users: Vec<String> = self.user_index.iter().map(|e| e.key().clone()).collect();
        let mut result = HashMap::new();
        for user_id in users {
            self.reconcile_user(&user_id, now);
            if let Some(set) = self.user_index.get(&user_id) {
                let mut ids: Vec<String> = set.iter().cloned().collect();
                ids.sort();
                result.insert(user_id, ids);
            }
        }
        Ok(result)
    }

    async fn most_recent_session_id(&self, user_id: &str) -> SessionResult<Option<String>> {
        let now = Self::now();
        self.reconcile_user(user_id, now);
        let Some(indexed) = self
            .user_index
            .get(user_id)
            .map(|set| set.iter().cloned().collect::<Vec<_>>())
        else {
            return Ok(None);
        };

        let mut latest: Option<(OffsetDateTime, String)> = None;
        for session_id in indexed {
            let Some(record) = self.live_record(user_id, &session_id, now) else {
                continue;
            };
            // Records never touched by a write carry no timestamp and do
            // not compete for "most recently active".
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
        let now = Self::now();
        Ok(self
            .records
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count())
    }

    async fn delete(&self, user_id: &str, session_id: &str) -> SessionResult<bool> {
        let now = Self::now();
        self.unindex(user_id, session_id);
        // An entry past its TTL counts as already absent even if no read
        // has lazily removed it yet.
        let removed = match self
            .records
            .remove(&(user_id.to_owned(), session_id.to_owned()))
        {
            Some((_, entry)) => !entry.is_expired(now),
            None => false,
        };
        Ok(removed)
    }
}
