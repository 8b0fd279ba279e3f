use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a session.
///
/// `NotFound` is virtual: status queries report it when no record exists,
/// and it is never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Interrupted,
    Completed,
    Error,
    NotFound,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::NotFound => "not_found",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution kinds an approver may apply to a pending interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Reject,
    Edit,
    Response,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 4] = [
        DecisionKind::Approve,
        DecisionKind::Reject,
        DecisionKind::Edit,
        DecisionKind::Response,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Approve => "approve",
            DecisionKind::Reject => "reject",
            DecisionKind::Edit => "edit",
            DecisionKind::Response => "response",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn all_decisions() -> Vec<DecisionKind> {
    DecisionKind::ALL.to_vec()
}

/// Replacement tool call carried by an `edit` decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditedAction {
    pub action: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// One approval request raised by the agent runtime mid-run.
///
/// A tool narrows `allowed_decisions` to restrict how approvers may
/// resolve it; the default admits all four kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    /// Unique within one run.
    pub interrupt_id: String,
    pub action_name: String,
    #[serde(default)]
    pub action_args: Map<String, Value>,
    #[serde(default = "all_decisions")]
    pub allowed_decisions: Vec<DecisionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PendingInterrupt {
    pub fn new(interrupt_id: impl Into<String>, action_name: impl Into<String>) -> Self {
        Self {
            interrupt_id: interrupt_id.into(),
            action_name: action_name.into(),
            action_args: Map::new(),
            allowed_decisions: all_decisions(),
            description: None,
        }
    }

    /// Restricts which decision kinds this interrupt accepts.
    pub fn allowing(mut self, decisions: impl Into<Vec<DecisionKind>>) -> Self {
        self.allowed_decisions = decisions.into();
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.action_args = args;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed_decisions.contains(&kind)
    }
}

/// The approver's resolution of one pending interrupt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    /// Required for `edit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_action: Option<EditedAction>,
    /// Required for `response`; optional feedback for `reject`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Decision {
    pub fn approve() -> Self {
        Self {
            kind: DecisionKind::Approve,
            edited_action: None,
            message: None,
        }
    }

    pub fn reject() -> Self {
        Self {
            kind: DecisionKind::Reject,
            edited_action: None,
            message: None,
        }
    }

    pub fn reject_with(message: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Reject,
            edited_action: None,
            message: Some(message.into()),
        }
    }

    pub fn edit(action: EditedAction) -> Self {
        Self {
            kind: DecisionKind::Edit,
            edited_action: Some(action),
            message: None,
        }
    }

    pub fn response(message: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Response,
            edited_action: None,
            message: Some(message.into()),
        }
    }
}

/// Terminal outcome of one invoke or resume round, one variant per status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponsePayload {
    Completed {
        result: Value,
    },
    Interrupted {
        interrupts: Vec<PendingInterrupt>,
    },
    Error {
        message: String,
    },
}

impl ResponsePayload {
    pub fn status(&self) -> SessionStatus {
        match self {
            ResponsePayload::Completed { .. } => SessionStatus::Completed,
            ResponsePayload::Interrupted { .. } => SessionStatus::Interrupted,
            ResponsePayload::Error { .. } => SessionStatus::Error,
        }
    }

    /// The approval requests this payload is suspended on, if any.
    pub fn pending_interrupts(&self) -> &[PendingInterrupt] {
        match self {
            ResponsePayload::Interrupted { interrupts } => interrupts,
            _ => &[],
        }
    }
}

/// One session record, keyed by (user_id, session_id).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<ResponsePayload>,
    /// `None` until the first write touches the record; excluded from
    /// most-recent-session selection while unset.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::timestamp::option"
    )]
    pub last_updated: Option<OffsetDateTime>,
    /// Lifetime applied at the last write. Zero means never expire.
    pub ttl_secs: u64,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, status: SessionStatus, ttl_secs: u64) -> Self {
        Self {
            session_id: session_id.into(),
            status,
            last_query: None,
            last_response: None,
            last_updated: None,
            ttl_secs,
        }
    }

    /// Builds a record with a freshly generated session id.
    pub fn with_generated_id(status: SessionStatus, ttl_secs: u64) -> Self {
        Self::new(Uuid::new_v4().to_string(), status, ttl_secs)
    }

    pub fn touched_at(mut self, at: OffsetDateTime) -> Self {
        self.last_updated = Some(at);
        self
    }
}

/// Partial update applied through `SessionStore::update`.
///
/// An outer `None` leaves the field untouched; for clearable fields the
/// inner `Option` distinguishes clearing a value from keeping it.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub last_query: Option<Option<String>>,
    pub last_response: Option<Option<ResponsePayload>>,
    pub last_updated: Option<OffsetDateTime>,
    pub ttl_secs: Option<u64>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.last_query = Some(Some(query.into()));
        self
    }

    pub fn clear_query(mut self) -> Self {
        self.last_query = Some(None);
        self
    }

    pub fn response(mut self, payload: ResponsePayload) -> Self {
        self.last_response = Some(Some(payload));
        self
    }

    pub fn clear_response(mut self) -> Self {
        self.last_response = Some(None);
        self
    }

    pub fn touched_at(mut self, at: OffsetDateTime) -> Self {
        self.last_updated = Some(at);
        self
    }

    pub fn ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// Overwrites only the supplied fields, preserving all others.
    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(last_query) = &self.last_query {
            record.last_query = last_query.clone();
        }
        if let Some(last_response) = &self.last_response {
            record.last_response = last_response.clone();
        }
        if let Some(at) = self.last_updated {
            record.last_updated = Some(at);
        }
        if let Some(ttl_secs) = self.ttl_secs {
            record.ttl_secs = ttl_secs;
        }
    }
}
