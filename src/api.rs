//! Request and response shapes exchanged with clients. Field names follow
//! the service wire format; an HTTP layer can pass these through as JSON
//! unchanged.

use crate::error::{SessionError, SessionResult};
use crate::interrupt::{decision_from_parts, ResumeDirective};
use crate::model::{Decision, DecisionKind, ResponsePayload, SessionRecord, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub user_id: String,
    pub session_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_info: Option<Value>,
}

/// Resume request. Exactly one addressing mode applies: `interrupt_responses`
/// (batch, keyed by interrupt id), `interrupt_id` (single, explicit), or
/// neither (legacy — `response_type`/`args` apply to the sole pending
/// interrupt).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub user_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<DecisionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_responses: Option<HashMap<String, Decision>>,
}

impl ResumeRequest {
    /// Resolves which addressing mode the caller used.
    pub fn directive(&self) -> SessionResult<ResumeDirective> {
        if let Some(decisions) = &self.interrupt_responses {
            if decisions.is_empty() {
                return Err(SessionError::InvalidDecision(
                    "interrupt_responses must not be empty".into(),
                ));
            }
            return Ok(ResumeDirective::Batch(decisions.clone()));
        }

        let Some(kind) = self.response_type else {
            return Err(SessionError::InvalidDecision(
                "response_type is required outside of batch resumes".into(),
            ));
        };
        let decision = decision_from_parts(kind, self.args.as_ref())?;

        match &self.interrupt_id {
            Some(interrupt_id) => Ok(ResumeDirective::Single {
                interrupt_id: interrupt_id.clone(),
                decision,
            }),
            None => Ok(ResumeDirective::Legacy(decision)),
        }
    }
}

/// Terminal response of one invoke or resume call. The payload variant
/// carries only the fields meaningful to its status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentResponse {
    pub session_id: String,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub outcome: ResponsePayload,
}

impl AgentResponse {
    pub fn new(session_id: impl Into<String>, outcome: ResponsePayload) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: OffsetDateTime::now_utc(),
            outcome,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.outcome.status()
    }
}

/// Status query result. `status == not_found` is a successful response,
/// not an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub user_id: String,
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_query: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::timestamp::option"
    )]
    pub last_updated: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<ResponsePayload>,
}

impl SessionStatusResponse {
    pub fn not_found(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let session_id = session_id.into();
        let message = format!("session {user_id}:{session_id} does not exist");
        Self {
            user_id,
            session_id,
            status: SessionStatus::NotFound,
            message: Some(message),
            last_query: None,
            last_updated: None,
            last_response: None,
        }
    }

    pub fn from_record(user_id: impl Into<String>, record: SessionRecord) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: record.session_id,
            status: record.status,
            message: None,
            last_query: record.last_query,
            last_updated: record.last_updated,
            last_response: record.last_response,
        }
    }
}

/// The user's most recently active session id; empty when the user has no
/// live sessions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActiveSessionResponse {
    pub active_session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub session_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemInfoResponse {
    pub sessions_count: usize,
    pub active_users: HashMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_response_flattens_its_outcome() {
        let response = AgentResponse::new(
            "s1",
            ResponsePayload::Completed {
                result: json!({"answer": 42}),
            },
        );
        let wire = serde_json::to_value(&response).expect("serialize");
        assert_eq!(wire["session_id"], "s1");
        assert_eq!(wire["status"], "completed");
        assert_eq!(wire["result"]["answer"], 42);
        assert!(wire["timestamp"].is_number());
    }

    #[test]
    fn resume_request_modes_resolve() {
        let batch: ResumeRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "session_id": "s1",
            "interrupt_responses": {"i1": {"type": "approve"}},
        }))
        .expect("deserialize");
        assert!(matches!(
            batch.directive().expect("directive"),
            ResumeDirective::Batch(_)
        ));

        let single: ResumeRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "session_id": "s1",
            "response_type": "reject",
            "interrupt_id": "i1",
        }))
        .expect("deserialize");
        assert!(matches!(
            single.directive().expect("directive"),
            ResumeDirective::Single { .. }
        ));

        let legacy: ResumeRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "session_id": "s1",
            "response_type": "approve",
        }))
        .expect("deserialize");
        assert!(matches!(
            legacy.directive().expect("directive"),
            ResumeDirective::Legacy(_)
        ));
    }

    #[test]
    fn resume_request_without_mode_is_rejected() {
        let bare: ResumeRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "session_id": "s1",
        }))
        .expect("deserialize");
        assert!(bare.directive().is_err());
    }
}
