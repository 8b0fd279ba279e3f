use agent_session::inmemory::InMemorySessionStore;
use agent_session::model::{PendingInterrupt, ResponsePayload, SessionPatch};
use agent_session::store::SessionStore;
use agent_session::{SessionRecord, SessionStatus};
use serde_json::json;
use time::OffsetDateTime;

fn record(session_id: &str, ttl_secs: u64) -> SessionRecord {
    SessionRecord::new(session_id, SessionStatus::Idle, ttl_secs)
        .touched_at(OffsetDateTime::now_utc())
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let store = InMemorySessionStore::new();
    let mut seed = record("s1", 60);
    seed.last_query = Some("book a flight".into());
    seed.last_response = Some(ResponsePayload::Interrupted {
        interrupts: vec![PendingInterrupt::new("i1", "book_flight_ticket")],
    });
    seed.status = SessionStatus::Interrupted;

    let session_id = store.create("u1", seed.clone()).await.expect("create");
    assert_eq!(session_id, "s1");

    let fetched = store.get("u1", "s1").await.expect("get").expect("present");
    assert_eq!(fetched.status, SessionStatus::Interrupted);
    assert_eq!(fetched.last_query.as_deref(), Some("book a flight"));
    assert_eq!(fetched.last_response, seed.last_response);
}

#[tokio::test]
async fn update_overwrites_only_patched_fields() {
    let store = InMemorySessionStore::new();
    let mut seed = record("s1", 60);
    seed.last_query = Some("original query".into());
    store.create("u1", seed).await.expect("create");

    let updated = store
        .update(
            "u1",
            "s1",
            SessionPatch::new()
                .status(SessionStatus::Completed)
                .response(ResponsePayload::Completed {
                    result: json!({"answer": 1}),
                }),
        )
        .await
        .expect("update");
    assert!(updated);

    let fetched = store.get("u1", "s1").await.expect("get").expect("present");
    assert_eq!(fetched.status, SessionStatus::Completed);
    // Unpatched fields survive the read-modify-write.
    assert_eq!(fetched.last_query.as_deref(), Some("original query"));

    let cleared = store
        .update("u1", "s1", SessionPatch::new().clear_query())
        .await
        .expect("update");
    assert!(cleared);
    let fetched = store.get("u1", "s1").await.expect("get").expect("present");
    assert!(fetched.last_query.is_none());
}

#[tokio::test]
async fn update_on_missing_record_reports_false() {
    let store = InMemorySessionStore::new();
    let updated = store
        .update("u1", "ghost", SessionPatch::new().status(SessionStatus::Running))
        .await
        .expect("update");
    assert!(!updated);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = InMemorySessionStore::new();
    store.create("u1", record("s1", 60)).await.expect("create");

    assert!(store.delete("u1", "s1").await.expect("first delete"));
    assert!(!store.delete("u1", "s1").await.expect("second delete"));
    assert!(!store.delete("u1", "never-existed").await.expect("absent delete"));
}

#[tokio::test]
async fn per_user_listing_and_existence() {
    let store = InMemorySessionStore::new();
    store.create("u1", record("s2", 60)).await.expect("create");
    store.create("u1", record("s1", 60)).await.expect("create");
    store.create("u2", record("s3", 60)).await.expect("create");

    assert!(store.exists("u1", "s1").await.expect("exists"));
    assert!(!store.exists("u1", "s3").await.expect("exists"));
    assert!(store.user_exists("u1").await.expect("user exists"));
    assert!(!store.user_exists("nobody").await.expect("user exists"));

    assert_eq!(
        store.session_ids("u1").await.expect("session ids"),
        vec!["s1".to_owned(), "s2".to_owned()]
    );
    assert_eq!(store.count().await.expect("count"), 3);

    let all = store.all_sessions().await.expect("all sessions");
    assert_eq!(all.len(), 2);
    assert_eq!(all["u2"], vec!["s3".to_owned()]);
}

#[tokio::test]
async fn most_recent_session_follows_last_updated() {
    let store = InMemorySessionStore::new();
    let now = OffsetDateTime::now_utc();

    store
        .create("u1", SessionRecord::new("old", SessionStatus::Completed, 60).touched_at(now - time::Duration::seconds(30)))
        .await
        .expect("create");
    store
        .create("u1", SessionRecord::new("new", SessionStatus::Completed, 60).touched_at(now))
        .await
        .expect("create");
    // Never touched by a write: must not win.
    store
        .create("u1", SessionRecord::new("untouched", SessionStatus::Idle, 60))
        .await
        .expect("create");

    let most_recent = store
        .most_recent_session_id("u1")
        .await
        .expect("most recent");
    assert_eq!(most_recent.as_deref(), Some("new"));
}

#[tokio::test]
async fn most_recent_is_absent_when_nothing_was_touched() {
    let store = InMemorySessionStore::new();
    store
        .create("u1", SessionRecord::new("s1", SessionStatus::Idle, 60))
        .await
        .expect("create");

    assert!(store
        .most_recent_session_id("u1")
        .await
        .expect("most recent")
        .is_none());
}
