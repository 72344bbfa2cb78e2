//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;
use std::time::Duration;

use voice_bridge_config::Settings;

use crate::session::SessionManager;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Validated configuration
    pub config: Arc<Settings>,
    /// Session registry
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Settings) -> Self {
        let sessions = SessionManager::with_config(
            config.server.max_sessions,
            Duration::from_secs(config.server.session_timeout_secs),
            Duration::from_secs(config.server.cleanup_interval_secs),
        );

        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
        }
    }
}
