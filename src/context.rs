use crate::auth::AuthManager;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::store::ChatStore;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application context containing shared dependencies
/// This reduces parameter passing and makes it easier to add new dependencies
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn ChatStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub auth: Arc<AuthManager>,
    pub config: Arc<Config>,
    /// Process-wide shutdown signal; every connection task subscribes and
    /// closes its socket when it fires.
    pub shutdown: broadcast::Sender<()>,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn ChatStore>,
        registry: Arc<ConnectionRegistry>,
        auth: Arc<AuthManager>,
        config: Arc<Config>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            store,
            registry,
            auth,
            config,
            shutdown,
        }
    }
}
