//! Per-request orchestration: loads or creates the session record,
//! validates the transition, drives the agent runtime, and persists the
//! classified outcome. Store writes always happen after the runtime
//! returns, so a caller that awaits a response observes store state at
//! least as fresh as that response.

use crate::api::{
    ActiveSessionResponse, AgentResponse, InvokeRequest, ResumeRequest, SessionListResponse,
    SessionStatusResponse, SystemInfoResponse,
};
use crate::error::{SessionError, SessionResult};
use crate::interrupt::build_resume_payload;
use crate::lifecycle::{self, SessionEvent};
use crate::model::{ResponsePayload, SessionPatch, SessionRecord, SessionStatus};
use crate::runtime::{AgentInput, AgentRuntime, MemoryService, RunOutcome, RuntimeError};
use crate::store::SessionStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Coordinator tunables.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// TTL applied on every session write.
    pub default_ttl_secs: u64,
    /// Interval between polls in [`SessionCoordinator::wait_until_settled`].
    pub poll_interval: Duration,
    /// Poll budget before giving up on a `running` session.
    pub max_poll_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 30,
        }
    }
}

/// Ties the store, lifecycle rules, interrupt validation, and the agent
/// runtime together, one logical call chain per invoke or resume.
///
/// Invoke and resume are serialized per (user, session) through a lock
/// table, so the store's read-modify-write `update` cannot lose writes
/// within this process.
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    runtime: Arc<dyn AgentRuntime>,
    memory: Option<Arc<dyn MemoryService>>,
    config: CoordinatorConfig,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            store,
            runtime,
            memory: None,
            config: CoordinatorConfig::default(),
            locks: DashMap::new(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    fn lock_for(&self, user_id: &str, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id.to_owned(), session_id.to_owned()))
            .or_default()
            .clone()
    }

    /// Drops this call's lock handle and removes the table entry unless
    /// another call still holds or awaits the mutex. Sessions usually end
    /// through TTL expiry, so the table must not retain an entry per
    /// session ever seen.
    fn prune_lock(&self, user_id: &str, session_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&(user_id.to_owned(), session_id.to_owned()), |_, entry| {
                Arc::strong_count(entry) == 1
            });
    }

    /// Runs one query. Creates the record on first contact, rejects the
    /// call while a run is already in flight, and absorbs runtime failures
    /// into an `error` response.
    pub async fn invoke(&self, request: InvokeRequest) -> SessionResult<AgentResponse> {
        let user_id = request.user_id.clone();
        let session_id = request.session_id.clone();
        let lock = self.lock_for(&user_id, &session_id);
        let guard = lock.lock().await;
        let result = self.invoke_locked(request).await;
        drop(guard);
        self.prune_lock(&user_id, &session_id, lock);
        result
    }

    async fn invoke_locked(&self, request: InvokeRequest) -> SessionResult<AgentResponse> {
        let user_id = request.user_id.clone();
        let session_id = request.session_id.clone();

        let system_message = self.augmented_system_message(&request).await;

        let current = self.store.get(&user_id, &session_id).await?;
        let current_status = current.as_ref().map(|record| record.status);
        lifecycle::transition(current_status, SessionEvent::Invoke)?;

        let now = OffsetDateTime::now_utc();
        let ttl = self.config.default_ttl_secs;
        if current.is_none() {
            self.store
                .create(
                    &user_id,
                    SessionRecord::new(&session_id, SessionStatus::Idle, ttl).touched_at(now),
                )
                .await?;
        }
        self.store
            .update(
                &user_id,
                &session_id,
                SessionPatch::new()
                    .status(SessionStatus::Running)
                    .query(&request.query)
                    .clear_response()
                    .touched_at(now)
                    .ttl(ttl),
            )
            .await?;

        info!(user_id, session_id, "invoking agent run");
        let outcome = self
            .runtime
            .invoke(
                AgentInput {
                    system_message,
                    query: request.query,
                },
                &session_id,
            )
            .await;

        self.finish_round(&user_id, &session_id, outcome).await
    }

    /// Re-enters a paused run with decisions for its pending interrupts.
    /// Validation happens before the runtime or the record is touched; a
    /// rejected resume leaves the session `interrupted`.
    pub async fn resume(&self, request: ResumeRequest) -> SessionResult<AgentResponse> {
        let user_id = request.user_id.clone();
        let session_id = request.session_id.clone();
        let lock = self.lock_for(&user_id, &session_id);
        let guard = lock.lock().await;
        let result = self.resume_locked(request).await;
        drop(guard);
        self.prune_lock(&user_id, &session_id, lock);
        result
    }

    async fn resume_locked(&self, request: ResumeRequest) -> SessionResult<AgentResponse> {
        let user_id = request.user_id.clone();
        let session_id = request.session_id.clone();

        let record = self
            .store
            .get(&user_id, &session_id)
            .await?
            .ok_or_else(|| SessionError::not_found(&user_id, &session_id))?;
        lifecycle::transition(Some(record.status), SessionEvent::Resume)?;

        let pending = record
            .last_response
            .as_ref()
            .map(ResponsePayload::pending_interrupts)
            .unwrap_or_default();
        let payload = build_resume_payload(pending, request.directive()?)?;

        let now = OffsetDateTime::now_utc();
        self.store
            .update(
                &user_id,
                &session_id,
                SessionPatch::new()
                    .status(SessionStatus::Running)
                    .clear_query()
                    .clear_response()
                    .touched_at(now)
                    .ttl(self.config.default_ttl_secs),
            )
            .await?;

        info!(user_id, session_id, "resuming interrupted agent run");
        let outcome = self.runtime.resume(payload, &session_id).await;

        self.finish_round(&user_id, &session_id, outcome).await
    }

    async fn finish_round(
        &self,
        user_id: &str,
        session_id: &str,
        outcome: Result<RunOutcome, RuntimeError>,
    ) -> SessionResult<AgentResponse> {
        if let Err(err) = &outcome {
            warn!(user_id, session_id, error = %err, "agent run failed; recording error status");
        }
        let (event, payload) = lifecycle::classify(outcome);
        let status = lifecycle::transition(Some(SessionStatus::Running), event)?;

        let persisted = self
            .store
            .update(
                user_id,
                session_id,
                SessionPatch::new()
                    .status(status)
                    .clear_query()
                    .response(payload.clone())
                    .touched_at(OffsetDateTime::now_utc())
                    .ttl(self.config.default_ttl_secs),
            )
            .await?;
        if !persisted {
            // The record expired mid-run; the caller still gets the result.
            warn!(user_id, session_id, "session record vanished during the run");
        }

        Ok(AgentResponse::new(session_id, payload))
    }

    /// Reports the session's persisted state; `not_found` is a successful
    /// answer, not an error.
    pub async fn status(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> SessionResult<SessionStatusResponse> {
        match self.store.get(user_id, session_id).await? {
            Some(record) => Ok(SessionStatusResponse::from_record(user_id, record)),
            None => Ok(SessionStatusResponse::not_found(user_id, session_id)),
        }
    }

    /// The user's most recently active session id; empty string when the
    /// user is unknown or no session has been touched yet.
    pub async fn active_session_id(&self, user_id: &str) -> SessionResult<ActiveSessionResponse> {
        if !self.store.user_exists(user_id).await? {
            return Ok(ActiveSessionResponse {
                active_session_id: String::new(),
            });
        }
        let active_session_id = self
            .store
            .most_recent_session_id(user_id)
            .await?
            .unwrap_or_default();
        Ok(ActiveSessionResponse { active_session_id })
    }

    pub async fn session_ids(&self, user_id: &str) -> SessionResult<SessionListResponse> {
        Ok(SessionListResponse {
            session_ids: self.store.session_ids(user_id).await?,
        })
    }

    pub async fn system_info(&self) -> SessionResult<SystemInfoResponse> {
        Ok(SystemInfoResponse {
            sessions_count: self.store.count().await?,
            active_users: self.store.all_sessions().await?,
        })
    }

    /// Idempotent delete: `Ok(false)` reports "already absent" rather than
    /// an error.
    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> SessionResult<bool> {
        let removed = self.store.delete(user_id, session_id).await?;
        // An in-flight call still holding the mutex keeps its entry; it is
        // pruned when that call releases it.
        self.locks
            .remove_if(&(user_id.to_owned(), session_id.to_owned()), |_, entry| {
                Arc::strong_count(entry) == 1
            });
        if removed {
            info!(user_id, session_id, "session deleted");
        }
        Ok(removed)
    }

    /// Stores a long-term memory entry for a known user and returns the
    /// memory id.
    pub async fn write_long_term(&self, user_id: &str, memory_info: &str) -> SessionResult<String> {
        let Some(memory) = &self.memory else {
            return Err(SessionError::Memory("no memory service configured".into()));
        };
        if !self.store.user_exists(user_id).await? {
            return Err(SessionError::UserNotFound(user_id.to_owned()));
        }
        memory
            .write(user_id, memory_info)
            .await
            .map_err(|err| SessionError::Memory(err.message))
    }

    /// Client-side liveness fallback: polls a `running` session at a fixed
    /// interval up to a bounded number of attempts and returns the last
    /// observed status. Callers still seeing `running` afterwards should
    /// start a fresh session rather than wait indefinitely.
    pub async fn wait_until_settled(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> SessionResult<SessionStatus> {
        let observe = |record: Option<SessionRecord>| {
            record
                .map(|record| record.status)
                .unwrap_or(SessionStatus::NotFound)
        };

        let mut last = observe(self.store.get(user_id, session_id).await?);
        let mut attempts = 0;
        while last == SessionStatus::Running && attempts < self.config.max_poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;
            attempts += 1;
            last = observe(self.store.get(user_id, session_id).await?);
        }
        Ok(last)
    }

    /// Prepends long-term memory context to the system message when the
    /// collaborator is configured and has content; read failures are
    /// tolerated and the invoke proceeds without the context.
    async fn augmented_system_message(&self, request: &InvokeRequest) -> Option<String> {
        let Some(memory) = &self.memory else {
            return request.system_message.clone();
        };
        match memory.read(&request.user_id).await {
            Ok(Some(info)) if !info.is_empty() => Some(match &request.system_message {
                Some(base) => format!("{base}\nAdditional user context: {info}"),
                None => format!("Additional user context: {info}"),
            }),
            Ok(_) => request.system_message.clone(),
            Err(err) => {
                warn!(
                    user_id = request.user_id,
                    error = %err,
                    "long-term memory read failed; continuing without it"
                );
                request.system_message.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemorySessionStore;
    use crate::runtime::ResumePayload;
    use async_trait::async_trait;
    use serde_json::json;

    struct CompletingRuntime;

    #[async_trait]
    impl AgentRuntime for CompletingRuntime {
        async fn invoke(
            &self,
            _input: AgentInput,
            _thread_id: &str,
        ) -> Result<RunOutcome, RuntimeError> {
            Ok(RunOutcome::Completed(json!({"ok": true})))
        }

        async fn resume(
            &self,
            _payload: ResumePayload,
            _thread_id: &str,
        ) -> Result<RunOutcome, RuntimeError> {
            Ok(RunOutcome::Completed(json!({"ok": true})))
        }
    }

    fn coordinator() -> SessionCoordinator {
        SessionCoordinator::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(CompletingRuntime),
        )
    }

    fn request(session_id: &str) -> InvokeRequest {
        InvokeRequest {
            user_id: "u1".into(),
            session_id: session_id.into(),
            query: "hello".into(),
            system_message: None,
            parameter_info: None,
        }
    }

    #[tokio::test]
    async fn lock_entries_do_not_outlive_their_calls() {
        let coordinator = coordinator();
        for session_id in ["s1", "s2", "s3"] {
            coordinator.invoke(request(session_id)).await.expect("invoke");
        }
        assert!(
            coordinator.locks.is_empty(),
            "finished calls must not leave lock entries behind"
        );
    }

    #[tokio::test]
    async fn delete_leaves_a_held_lock_in_place() {
        let coordinator = coordinator();
        coordinator.invoke(request("s1")).await.expect("invoke");

        let lock = coordinator.lock_for("u1", "s1");
        let guard = lock.lock().await;
        coordinator.delete_session("u1", "s1").await.expect("delete");

        // The holder keeps its entry, so a concurrent caller still waits
        // on the same mutex.
        assert!(Arc::ptr_eq(&coordinator.lock_for("u1", "s1"), &lock));

        drop(guard);
        coordinator.prune_lock("u1", "s1", lock);
        assert!(coordinator.locks.is_empty());
    }
}
