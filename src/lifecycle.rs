//! Pure session lifecycle rules: the status transition table and the
//! classification of runtime outcomes. No I/O happens here.

use crate::error::SessionError;
use crate::model::{ResponsePayload, SessionStatus};
use crate::runtime::{RunOutcome, RuntimeError};
use serde_json::Value;

/// Request-level events that drive a session between statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new query arrives (creates the record on first contact).
    Invoke,
    /// Decisions arrive for a paused run.
    Resume,
    /// The run finished with no pending approvals.
    RunCompleted,
    /// The run paused on one or more approvals.
    RunInterrupted,
    /// The run raised.
    RunFailed,
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::Invoke => "invoke",
            SessionEvent::Resume => "resume",
            SessionEvent::RunCompleted => "complete",
            SessionEvent::RunInterrupted => "interrupt",
            SessionEvent::RunFailed => "fail",
        }
    }
}

/// Applies one event to the current status.
///
/// `current == None` means no record exists yet; the only event legal in
/// that state is `Invoke`, which implies creating the record first. An
/// invoke on a `running` session is rejected rather than racing the
/// in-flight call; a stuck `running` record is recoverable only through
/// TTL expiry or the client-side polling fallback.
pub fn transition(
    current: Option<SessionStatus>,
    event: SessionEvent,
) -> Result<SessionStatus, SessionError> {
    use SessionEvent::*;
    use SessionStatus::*;

    let status = current.unwrap_or(NotFound);
    match (status, event) {
        (NotFound | Idle | Completed | Error, Invoke) => Ok(Running),
        (Interrupted, Resume) => Ok(Running),
        (Running, RunCompleted) => Ok(Completed),
        (Running, RunInterrupted) => Ok(Interrupted),
        (Running, RunFailed) => Ok(Error),
        (status, event) => Err(SessionError::InvalidTransition {
            event: event.as_str(),
            status,
        }),
    }
}

/// Classifies a runtime outcome into the event to apply and the payload to
/// persist. Presence of pending-interrupt markers means interrupted; their
/// absence means completed; a raised error is absorbed into an error
/// payload.
pub fn classify(outcome: Result<RunOutcome, RuntimeError>) -> (SessionEvent, ResponsePayload) {
    match outcome {
        Ok(RunOutcome::Completed(result)) => {
            (SessionEvent::RunCompleted, ResponsePayload::Completed { result })
        }
        Ok(RunOutcome::Interrupted(interrupts)) => {
            if interrupts.is_empty() {
                // No markers present: classified as a completed round.
                return (
                    SessionEvent::RunCompleted,
                    ResponsePayload::Completed { result: Value::Null },
                );
            }
            (
                SessionEvent::RunInterrupted,
                ResponsePayload::Interrupted { interrupts },
            )
        }
        Err(err) => (
            SessionEvent::RunFailed,
            ResponsePayload::Error {
                message: err.message,
            },
        ),
    }
}
