use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::message::IncomingMessage;
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::store::{ChatStore, NewMessage, StoredMessage};

/// Processes one well-formed inbound frame: resolve the channel for the
/// sender/receiver pair, persist the message, then attempt live delivery.
///
/// Persistence and delivery are two independent steps. Delivery runs only
/// after the write has succeeded, is best-effort and is never retried: a
/// closed recipient handle does not fail the call, the message is already
/// durable and surfaces on the recipient's next history fetch.
pub async fn process_frame(
    store: &dyn ChatStore,
    registry: &ConnectionRegistry,
    sender_id: &str,
    frame: IncomingMessage,
) -> AppResult<StoredMessage> {
    if frame.receiver_id.is_empty() {
        return Err(AppError::validation("receiver_id must not be empty"));
    }
    if frame.message.is_empty() {
        return Err(AppError::validation("message must not be empty"));
    }

    let channel = store
        .resolve_channel(sender_id, &frame.receiver_id)
        .await?;

    let stored = store
        .insert_message(NewMessage {
            channel_id: channel.id,
            sender: sender_id.to_string(),
            receiver: frame.receiver_id,
            content: frame.message,
            sent_at: Utc::now().timestamp(),
        })
        .await?;

    match registry.lookup(&stored.receiver).await {
        Some(tx) => match tx.send(stored.clone()) {
            Ok(_) => {
                metrics::MESSAGES_DELIVERED_TOTAL.inc();
                tracing::debug!(message_id = %stored.id, "Message delivered to online recipient");
            }
            Err(_) => {
                // Handle closed between lookup and send; the recipient's
                // loop is tearing down. History will surface the message.
                tracing::debug!(message_id = %stored.id, "Recipient handle closed, delivery skipped");
            }
        },
        None => {
            tracing::debug!(message_id = %stored.id, "Recipient offline, message stored only");
        }
    }

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{FailingStore, MemStore};

    fn frame(receiver: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            receiver_id: receiver.to_string(),
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn first_contact_creates_channel_and_persists() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();

        let stored = process_frame(&store, &registry, "alice", frame("bob", "hi"))
            .await
            .unwrap();

        assert_eq!(stored.sender, "alice");
        assert_eq!(stored.receiver, "bob");
        assert_eq!(stored.content, "hi");
        assert_eq!(store.channel_count().await, 1);

        let channel = store
            .channel_for_pair("alice", "bob")
            .await
            .unwrap()
            .expect("channel should exist");
        assert_eq!(channel.id, stored.channel_id);
        assert!(channel.includes("alice") && channel.includes("bob"));
    }

    #[tokio::test]
    async fn online_recipient_receives_persisted_record() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.register("bob", &tx).await;

        let stored = process_frame(&store, &registry, "alice", frame("bob", "hi"))
            .await
            .unwrap();

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.id, stored.id);
        assert_eq!(delivered.channel_id, stored.channel_id);
        assert_eq!(delivered.content, "hi");
    }

    #[tokio::test]
    async fn offline_recipient_message_still_durable() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();

        let stored = process_frame(&store, &registry, "alice", frame("bob", "while you were out"))
            .await
            .unwrap();

        let history = store.messages_for_channel(stored.channel_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "while you were out");
    }

    #[tokio::test]
    async fn replies_reuse_the_same_channel() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();

        let first = process_frame(&store, &registry, "alice", frame("bob", "hello"))
            .await
            .unwrap();
        let reply = process_frame(&store, &registry, "bob", frame("alice", "hey"))
            .await
            .unwrap();

        assert_eq!(first.channel_id, reply.channel_id);
        assert_eq!(store.channel_count().await, 1);

        let history = store.messages_for_channel(first.channel_id).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hey"]);
    }

    #[tokio::test]
    async fn messages_in_quick_succession_keep_send_order() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();

        for text in ["one", "two", "three"] {
            process_frame(&store, &registry, "alice", frame("bob", text))
                .await
                .unwrap();
        }

        let channel = store.channel_for_pair("alice", "bob").await.unwrap().unwrap();
        let history = store.messages_for_channel(channel.id).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn empty_receiver_is_rejected_without_side_effects() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();

        let result = process_frame(&store, &registry, "alice", frame("", "hi")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.channel_count().await, 0);
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_side_effects() {
        let store = MemStore::new();
        let registry = ConnectionRegistry::new();

        let result = process_frame(&store, &registry, "alice", frame("bob", "")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(store.channel_count().await, 0);
    }

    #[tokio::test]
    async fn store_failure_propagates_and_nothing_is_delivered() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.register("bob", &tx).await;

        let result = process_frame(&FailingStore, &registry, "alice", frame("bob", "hi")).await;
        assert!(result.is_err());

        // Delivery must never happen for a message that was not persisted
        assert!(rx.try_recv().is_err());
    }
}
