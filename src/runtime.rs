//! Interfaces of the external collaborators the session core drives.
//!
//! The core never looks inside the agent run; it only classifies the three
//! possible outcomes of an invoke or resume call.

use crate::model::{Decision, PendingInterrupt};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Failure raised by a collaborator during invoke or resume.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Conversation input for one invoke round.
#[derive(Clone, Debug, Default)]
pub struct AgentInput {
    pub system_message: Option<String>,
    pub query: String,
}

/// What one run round produced.
///
/// An interrupted outcome carries the approval requests the run is
/// suspended on; the list is non-empty by contract.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed(Value),
    Interrupted(Vec<PendingInterrupt>),
}

/// Validated decisions handed back to the runtime on resume.
#[derive(Clone, Debug, PartialEq)]
pub enum ResumePayload {
    /// Applies to the sole pending interrupt (legacy single path).
    Single(Decision),
    /// One decision per pending interrupt, keyed by interrupt id.
    Keyed(HashMap<String, Decision>),
}

/// The agent execution and checkpointing collaborator.
///
/// `thread_id` scopes checkpoint state; the coordinator passes the session
/// id so a resumed run continues exactly where it paused.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn invoke(&self, input: AgentInput, thread_id: &str) -> Result<RunOutcome, RuntimeError>;

    async fn resume(
        &self,
        payload: ResumePayload,
        thread_id: &str,
    ) -> Result<RunOutcome, RuntimeError>;
}

/// Long-term memory collaborator.
///
/// Read results are prepended to the system message before invoke; a read
/// failure is tolerated and the invoke proceeds without the context.
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn read(&self, user_id: &str) -> Result<Option<String>, RuntimeError>;

    /// Stores a memory entry and returns its id.
    async fn write(&self, user_id: &str, memory_info: &str) -> Result<String, RuntimeError>;
}
