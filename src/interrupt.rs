//! Builds and validates the decision payload required to resume a paused
//! run. All validation happens before the runtime sees anything, so a
//! rejected resume has no side effect.

use crate::error::{SessionError, SessionResult};
use crate::model::{Decision, DecisionKind, EditedAction, PendingInterrupt};
use crate::runtime::ResumePayload;
use serde_json::Value;
use std::collections::HashMap;

/// How the caller addressed the pending interrupts of one round.
#[derive(Clone, Debug)]
pub enum ResumeDirective {
    /// Bare decision without an interrupt id; only legal when exactly one
    /// interrupt is pending.
    Legacy(Decision),
    /// Decision for one explicitly named interrupt.
    Single {
        interrupt_id: String,
        decision: Decision,
    },
    /// One decision per pending interrupt, keyed by id.
    Batch(HashMap<String, Decision>),
}

/// Translates the caller's decisions into the runtime resume payload.
///
/// With more than one interrupt pending, only a full batch keyed by
/// interrupt id is accepted; partial resume is not supported, the batch is
/// all-or-nothing per round.
pub fn build_resume_payload(
    pending: &[PendingInterrupt],
    directive: ResumeDirective,
) -> SessionResult<ResumePayload> {
    if pending.is_empty() {
        return Err(SessionError::InvalidDecision(
            "session has no pending interrupts to resume".into(),
        ));
    }

    match directive {
        ResumeDirective::Legacy(decision) => {
            let [interrupt] = pending else {
                return Err(SessionError::InvalidDecision(format!(
                    "{} interrupts are pending; supply a decision per interrupt_id",
                    pending.len()
                )));
            };
            validate_decision(interrupt, &decision)?;
            Ok(ResumePayload::Single(decision))
        }
        ResumeDirective::Single {
            interrupt_id,
            decision,
        } => {
            if pending.len() > 1 {
                return Err(SessionError::InvalidDecision(format!(
                    "{} interrupts are pending; a resume must decide all of them",
                    pending.len()
                )));
            }
            let interrupt = find_pending(pending, &interrupt_id)?;
            validate_decision(interrupt, &decision)?;
            let mut decisions = HashMap::new();
            decisions.insert(interrupt_id, decision);
            Ok(ResumePayload::Keyed(decisions))
        }
        ResumeDirective::Batch(decisions) => {
            for interrupt_id in decisions.keys() {
                find_pending(pending, interrupt_id)?;
            }
            let missing: Vec<&str> = pending
                .iter()
                .filter(|interrupt| !decisions.contains_key(&interrupt.interrupt_id))
                .map(|interrupt| interrupt.interrupt_id.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(SessionError::InvalidDecision(format!(
                    "missing decisions for pending interrupts: {}",
                    missing.join(", ")
                )));
            }
            for interrupt in pending {
                validate_decision(interrupt, &decisions[&interrupt.interrupt_id])?;
            }
            Ok(ResumePayload::Keyed(decisions))
        }
    }
}

fn find_pending<'a>(
    pending: &'a [PendingInterrupt],
    interrupt_id: &str,
) -> SessionResult<&'a PendingInterrupt> {
    pending
        .iter()
        .find(|interrupt| interrupt.interrupt_id == interrupt_id)
        .ok_or_else(|| {
            SessionError::InvalidDecision(format!("unknown interrupt_id: {interrupt_id}"))
        })
}

fn validate_decision(interrupt: &PendingInterrupt, decision: &Decision) -> SessionResult<()> {
    if !interrupt.allows(decision.kind) {
        let allowed: Vec<&str> = interrupt
            .allowed_decisions
            .iter()
            .map(DecisionKind::as_str)
            .collect();
        return Err(SessionError::InvalidDecision(format!(
            "decision '{}' is not allowed for interrupt {} (allowed: {})",
            decision.kind,
            interrupt.interrupt_id,
            allowed.join(", ")
        )));
    }
    match decision.kind {
        DecisionKind::Edit => {
            let Some(action) = &decision.edited_action else {
                return Err(SessionError::InvalidDecision(format!(
                    "edit decision for interrupt {} requires an edited action",
                    interrupt.interrupt_id
                )));
            };
            if action.action.is_empty() {
                return Err(SessionError::InvalidDecision(
                    "edited action name must not be empty".into(),
                ));
            }
        }
        DecisionKind::Response => {
            if decision.message.as_deref().unwrap_or("").is_empty() {
                return Err(SessionError::InvalidDecision(format!(
                    "response decision for interrupt {} requires a message",
                    interrupt.interrupt_id
                )));
            }
        }
        DecisionKind::Approve | DecisionKind::Reject => {}
    }
    Ok(())
}

/// Builds a decision from the flat wire fields of the single/legacy resume
/// paths. For `edit`, `args` must parse as a structured action (name plus
/// argument map); for `response` and `reject`, it may carry the literal
/// message either directly or under a `message` key.
pub(crate) fn decision_from_parts(
    kind: DecisionKind,
    args: Option<&Value>,
) -> SessionResult<Decision> {
    match kind {
        DecisionKind::Approve => Ok(Decision::approve()),
        DecisionKind::Edit => {
            let Some(args) = args else {
                return Err(SessionError::InvalidDecision(
                    "edit decision requires args with the replacement action".into(),
                ));
            };
            let action: EditedAction = serde_json::from_value(args.clone()).map_err(|err| {
                SessionError::InvalidDecision(format!(
                    "edited action does not parse as name + argument map: {err}"
                ))
            })?;
            Ok(Decision::edit(action))
        }
        DecisionKind::Reject | DecisionKind::Response => {
            let message = args.and_then(extract_message);
            Ok(Decision {
                kind,
                edited_action: None,
                message,
            })
        }
    }
}

fn extract_message(args: &Value) -> Option<String> {
    match args {
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}
