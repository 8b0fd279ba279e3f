use agent_session::api::{InvokeRequest, ResumeRequest};
use agent_session::inmemory::InMemorySessionStore;
use agent_session::model::{Decision, DecisionKind, EditedAction, PendingInterrupt};
use agent_session::runtime::{AgentInput, AgentRuntime, ResumePayload, RunOutcome, RuntimeError};
use agent_session::store::SessionStore;
use agent_session::{SessionCoordinator, SessionError, SessionStatus};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Pauses every invoke on a fixed set of interrupts and completes any
/// resume, recording the payloads it was handed.
struct PausingRuntime {
    interrupts: Vec<PendingInterrupt>,
    resume_payloads: Mutex<Vec<ResumePayload>>,
}

impl PausingRuntime {
    fn new(interrupts: Vec<PendingInterrupt>) -> Self {
        Self {
            interrupts,
            resume_payloads: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AgentRuntime for PausingRuntime {
    async fn invoke(
        &self,
        _input: AgentInput,
        _thread_id: &str,
    ) -> Result<RunOutcome, RuntimeError> {
        Ok(RunOutcome::Interrupted(self.interrupts.clone()))
    }

    async fn resume(
        &self,
        payload: ResumePayload,
        _thread_id: &str,
    ) -> Result<RunOutcome, RuntimeError> {
        self.resume_payloads.lock().unwrap().push(payload);
        Ok(RunOutcome::Completed(json!({"answer": "done"})))
    }
}

async fn interrupted_session(
    interrupts: Vec<PendingInterrupt>,
) -> (Arc<InMemorySessionStore>, Arc<PausingRuntime>, SessionCoordinator) {
    let store = Arc::new(InMemorySessionStore::new());
    let runtime = Arc::new(PausingRuntime::new(interrupts));
    let coordinator = SessionCoordinator::new(store.clone(), runtime.clone());
    coordinator
        .invoke(InvokeRequest {
            user_id: "u1".into(),
            session_id: "s1".into(),
            query: "plan the trip".into(),
            system_message: None,
            parameter_info: None,
        })
        .await
        .expect("invoke");
    (store, runtime, coordinator)
}

fn batch_resume(decisions: HashMap<String, Decision>) -> ResumeRequest {
    ResumeRequest {
        user_id: "u1".into(),
        session_id: "s1".into(),
        response_type: None,
        args: None,
        interrupt_id: None,
        interrupt_responses: Some(decisions),
    }
}

#[tokio::test]
async fn full_batch_resumes_with_one_runtime_call() {
    let (_store, runtime, coordinator) = interrupted_session(vec![
        PendingInterrupt::new("i1", "book_flight_ticket"),
        PendingInterrupt::new("i2", "book_hotel"),
    ])
    .await;

    let mut decisions = HashMap::new();
    decisions.insert("i1".to_owned(), Decision::approve());
    decisions.insert(
        "i2".to_owned(),
        Decision::edit(EditedAction {
            action: "book_hotel".into(),
            args: serde_json::from_value(json!({"hotel_name": "Grand"})).unwrap(),
        }),
    );

    let response = coordinator
        .resume(batch_resume(decisions))
        .await
        .expect("resume");
    assert_eq!(response.status(), SessionStatus::Completed);

    let payloads = runtime.resume_payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1, "both decisions travel in one resume");
    let ResumePayload::Keyed(keyed) = &payloads[0] else {
        panic!("expected keyed payload");
    };
    assert_eq!(keyed.len(), 2);
    assert_eq!(keyed["i1"].kind, DecisionKind::Approve);
    assert_eq!(
        keyed["i2"].edited_action.as_ref().expect("edit").args["hotel_name"],
        "Grand"
    );
}

#[tokio::test]
async fn partial_batch_is_rejected_and_session_stays_interrupted() {
    let (store, runtime, coordinator) = interrupted_session(vec![
        PendingInterrupt::new("i1", "book_flight_ticket"),
        PendingInterrupt::new("i2", "book_hotel"),
        PendingInterrupt::new("i3", "charge_card"),
    ])
    .await;

    let mut decisions = HashMap::new();
    decisions.insert("i1".to_owned(), Decision::approve());
    decisions.insert("i2".to_owned(), Decision::reject());

    let err = coordinator
        .resume(batch_resume(decisions))
        .await
        .expect_err("partial batch must be rejected");
    let SessionError::InvalidDecision(message) = err else {
        panic!("unexpected error class");
    };
    assert!(message.contains("i3"));

    assert!(runtime.resume_payloads.lock().unwrap().is_empty());
    let record = store.get("u1", "s1").await.expect("get").expect("present");
    assert_eq!(record.status, SessionStatus::Interrupted);
    // The pending interrupts are still there for a later, complete batch.
    assert_eq!(
        record
            .last_response
            .expect("payload")
            .pending_interrupts()
            .len(),
        3
    );
}

#[tokio::test]
async fn narrowed_decision_set_rejects_the_whole_batch() {
    let (store, _runtime, coordinator) = interrupted_session(vec![
        PendingInterrupt::new("i1", "book_flight_ticket"),
        PendingInterrupt::new("i2", "charge_card")
            .allowing([DecisionKind::Approve, DecisionKind::Reject]),
    ])
    .await;

    let mut decisions = HashMap::new();
    decisions.insert("i1".to_owned(), Decision::approve());
    decisions.insert(
        "i2".to_owned(),
        Decision::edit(EditedAction {
            action: "charge_card".into(),
            args: Default::default(),
        }),
    );

    let err = coordinator
        .resume(batch_resume(decisions))
        .await
        .expect_err("narrowed set must reject edit");
    assert!(matches!(err, SessionError::InvalidDecision(_)));

    let record = store.get("u1", "s1").await.expect("get").expect("present");
    assert_eq!(record.status, SessionStatus::Interrupted);
}

#[tokio::test]
async fn empty_batch_map_is_rejected() {
    let (_store, _runtime, coordinator) =
        interrupted_session(vec![PendingInterrupt::new("i1", "book_hotel")]).await;

    let err = coordinator
        .resume(batch_resume(HashMap::new()))
        .await
        .expect_err("empty map must be rejected");
    assert!(matches!(err, SessionError::InvalidDecision(_)));
}

#[tokio::test]
async fn single_mode_cannot_answer_one_of_many() {
    let (store, _runtime, coordinator) = interrupted_session(vec![
        PendingInterrupt::new("i1", "book_flight_ticket"),
        PendingInterrupt::new("i2", "book_hotel"),
    ])
    .await;

    let err = coordinator
        .resume(ResumeRequest {
            user_id: "u1".into(),
            session_id: "s1".into(),
            response_type: Some(DecisionKind::Approve),
            args: None,
            interrupt_id: Some("i1".into()),
            interrupt_responses: None,
        })
        .await
        .expect_err("partial resume must be rejected");
    assert!(matches!(err, SessionError::InvalidDecision(_)));

    let record = store.get("u1", "s1").await.expect("get").expect("present");
    assert_eq!(record.status, SessionStatus::Interrupted);
}
