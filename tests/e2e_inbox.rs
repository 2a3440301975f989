//! E2E tests for the inbox endpoints

mod common;

use common::TestServer;
use serde_json::{Value, json};

const ALICE: &str = "https://remote.test/users/alice";
const MALLORY: &str = "https://remote.test/users/mallory";
const BOB: &str = "https://local.test/ap/users/bob";

fn create_note(id: &str) -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Create",
        "id": format!("{id}/activity"),
        "actor": ALICE,
        "to": [BOB],
        "object": {
            "id": id,
            "type": "Note",
            "attributedTo": ALICE,
            "content": "<p>hi @bob</p>",
        },
    })
}

#[tokio::test]
async fn test_create_is_accepted_and_stored_once() {
    let server = TestServer::new().await;
    server.create_local_actor("bob").await;
    server.seed_remote_actor(ALICE).await;
    let activity = create_note("https://remote.test/notes/1");

    let first = server.post_activity("/ap/users/bob/inbox", &activity).await;
    let retry = server.post_activity("/ap/users/bob/inbox", &activity).await;

    assert_eq!(first.status(), 202);
    assert_eq!(retry.status(), 202);
    assert_eq!(server.state.db.get_inbox_object_ids(BOB).await.unwrap().len(), 1);
    assert_eq!(server.state.db.get_notifications(BOB).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shared_inbox_routes_by_addressing() {
    let server = TestServer::new().await;
    server.create_local_actor("bob").await;
    server.seed_remote_actor(ALICE).await;

    let response = server
        .post_activity("/inbox", &create_note("https://remote.test/notes/2"))
        .await;

    assert_eq!(response.status(), 202);
    assert_eq!(server.state.db.get_inbox_object_ids(BOB).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sent_notification_reaches_feed() {
    let server = TestServer::new().await;
    server.create_local_actor("bob").await;
    server.seed_remote_actor(ALICE).await;
    let mut feed = server.state.notifier.subscribe();

    server
        .post_activity("/inbox", &create_note("https://remote.test/notes/3"))
        .await;

    let event = feed.try_recv().unwrap();
    assert_eq!(event.kind, "mention");
    assert_eq!(event.recipient, BOB);
    assert_eq!(event.body, "hi @bob");
}

#[tokio::test]
async fn test_unknown_local_inbox_is_404() {
    let server = TestServer::new().await;

    let response = server
        .post_activity("/ap/users/nobody/inbox", &create_note("https://remote.test/notes/4"))
        .await;

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_invalid_json_is_400() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/inbox"))
        .header("Content-Type", "application/activity+json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "malformed_activity");
}

#[tokio::test]
async fn test_update_of_unknown_object_is_404() {
    let server = TestServer::new().await;
    server.seed_remote_actor(ALICE).await;

    let response = server
        .post_activity(
            "/inbox",
            &json!({
                "type": "Update",
                "actor": ALICE,
                "object": { "id": "https://remote.test/notes/404", "type": "Note" },
            }),
        )
        .await;

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "unknown_entity");
}

#[tokio::test]
async fn test_spoofed_update_is_403_and_delete_is_ignored() {
    let server = TestServer::new().await;
    server.create_local_actor("bob").await;
    server.seed_remote_actor(ALICE).await;
    server.seed_remote_actor(MALLORY).await;
    server
        .post_activity("/inbox", &create_note("https://remote.test/notes/5"))
        .await;

    let update = server
        .post_activity(
            "/inbox",
            &json!({
                "type": "Update",
                "actor": MALLORY,
                "object": { "id": "https://remote.test/notes/5", "type": "Note", "content": "spoof" },
            }),
        )
        .await;
    let delete = server
        .post_activity(
            "/inbox",
            &json!({ "type": "Delete", "actor": MALLORY, "object": "https://remote.test/notes/5" }),
        )
        .await;

    assert_eq!(update.status(), 403);
    assert_eq!(delete.status(), 202);
    let stored = server
        .state
        .db
        .get_object_by_original_id("https://remote.test/notes/5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.properties["content"], "<p>hi @bob</p>");
}

#[tokio::test]
async fn test_unsupported_activity_is_acknowledged() {
    let server = TestServer::new().await;

    let response = server
        .post_activity(
            "/inbox",
            &json!({ "type": "Move", "actor": ALICE, "object": ALICE }),
        )
        .await;

    assert_eq!(response.status(), 202);
}

#[tokio::test]
async fn test_unsupported_object_type_is_acknowledged() {
    let server = TestServer::new().await;
    server.seed_remote_actor(ALICE).await;
    let mut activity = create_note("https://remote.test/questions/1");
    activity["object"]["type"] = json!("Question");

    let response = server.post_activity("/inbox", &activity).await;

    assert_eq!(response.status(), 202);
    assert!(
        server
            .state
            .db
            .get_object_by_original_id("https://remote.test/questions/1")
            .await
            .unwrap()
            .is_none()
    );
}
