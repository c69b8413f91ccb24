
use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use reclaim_server::handlers::history;

#[tokio::test]
async fn offline_recipient_catches_up_via_history() {
    let server = test_utils::start_server().await;
    let mut alice = server.connect("alice").await;

    // Bob has never connected
    let frame = json!({ "receiver_id": "bob", "message": "are you there?" }).to_string();
    alice.send(Message::Text(frame)).await.unwrap();

    let store = server.store.clone();
    test_utils::wait_until(|| {
        let store = store.clone();
        async move { store.message_count().await == 1 }
    })
    .await;

    let messages = history::conversation(server.store.as_ref(), "bob", "alice")
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, "alice");
    assert_eq!(messages[0].content, "are you there?");
}

#[tokio::test]
async fn history_stays_empty_for_strangers() {
    let server = test_utils::start_server().await;
    let _alice = server.connect("alice").await;

    let messages = history::conversation(server.store.as_ref(), "alice", "bob")
        .await
        .unwrap();
    assert!(messages.is_empty());
    assert_eq!(server.store.channel_count().await, 0);
}
