use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

use crate::store::StoredMessage;

/// Handle used to push persisted messages to a live connection's write half.
pub type DeliverySender = mpsc::UnboundedSender<StoredMessage>;

/// Process-wide table of live connections: user id -> delivery handle.
///
/// This is the only state shared across connection tasks. At most one entry
/// exists per user; registering a second connection for the same user
/// replaces the first, which is left to age out when its own read loop ends
/// (it is never force-closed here).
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<String, DeliverySender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `user`.
    pub async fn register(&self, user: &str, tx: &DeliverySender) {
        let previous = self
            .inner
            .write()
            .await
            .insert(user.to_string(), tx.clone());
        if previous.is_some() {
            tracing::info!(user_id = %user, "Replaced existing live connection");
        }
    }

    /// Removes the entry for `user`, but only if it still belongs to this
    /// connection. A connection that was displaced by a newer one must not
    /// evict its replacement on the way out.
    pub async fn unregister(&self, user: &str, tx: &DeliverySender) {
        let mut table = self.inner.write().await;
        if table.get(user).is_some_and(|current| current.same_channel(tx)) {
            table.remove(user);
        }
    }

    /// Returns the delivery handle for `user`, if they have a live connection.
    pub async fn lookup(&self, user: &str) -> Option<DeliverySender> {
        self.inner.read().await.get(user).cloned()
    }
}
