#![forbid(unsafe_code)]

pub mod api;
pub mod coordinator;
pub mod error;
pub mod inmemory;
pub mod interrupt;
pub mod lifecycle;
pub mod model;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod runtime;
pub mod store;

pub use api::{AgentResponse, InvokeRequest, ResumeRequest, SessionStatusResponse};
pub use coordinator::{CoordinatorConfig, SessionCoordinator};
pub use error::{SessionError, SessionResult};
pub use model::{Decision, DecisionKind, PendingInterrupt, SessionRecord, SessionStatus};
pub use runtime::{AgentRuntime, MemoryService, RunOutcome};
pub use store::{create_session_store, SessionBackendConfig, SessionStore};
