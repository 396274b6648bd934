//! Shared server state.

use crate::directory::Directory;
use std::sync::Arc;
use taskcast_core::broadcast::Broadcaster;
use taskcast_core::registry::Registry;

/// State handed to every endpoint.
pub struct AppState {
    /// Registry of live connections and channel memberships.
    pub registry: Arc<Registry>,
    /// Handle for enqueueing events onto the dispatch queue.
    pub broadcaster: Broadcaster,
    /// User resolution and task-access checks.
    pub directory: Arc<dyn Directory>,
    /// HS256 signing secret for channel tokens.
    pub secret: Vec<u8>,
}

impl AppState {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        broadcaster: Broadcaster,
        directory: Arc<dyn Directory>,
        secret: Vec<u8>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            directory,
            secret,
        }
    }
}
