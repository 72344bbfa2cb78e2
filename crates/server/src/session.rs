//! Session Management
//!
//! Arena-style registry: opaque session id to owned session record, O(1)
//! lookup and removal. The record carries only what concurrent readers need
//! (activity, closing flag, a turn-state snapshot for introspection); all
//! live per-session state is owned by the session's event loop.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use voice_bridge_core::TurnState;

use crate::ServerError;

/// Session record
pub struct Session {
    /// Session ID
    pub id: String,
    /// Creation time
    pub created_at: Instant,
    /// Last activity
    last_activity: RwLock<Instant>,
    /// Set once teardown begins; gates every outbound send
    closing: AtomicBool,
    /// Snapshot of the turn state, mirrored by the orchestrator
    turn: RwLock<TurnState>,
}

impl Session {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            closing: AtomicBool::new(false),
            turn: RwLock::new(TurnState::Idle),
        }
    }

    /// Update last activity
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Check if session is expired
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.last_activity.read().elapsed() > timeout
    }

    /// Begin teardown; no further events reach the client after this.
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn set_turn_state(&self, state: TurnState) {
        *self.turn.write() = state;
    }

    pub fn turn_state(&self) -> TurnState {
        *self.turn.read()
    }
}

/// Session manager
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(max_sessions: usize) -> Self {
        Self::with_config(
            max_sessions,
            Duration::from_secs(3600),
            Duration::from_secs(300),
        )
    }

    /// Create a new session manager with custom timeout and cleanup interval
    pub fn with_config(
        max_sessions: usize,
        session_timeout: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            session_timeout,
            cleanup_interval,
        }
    }

    /// Start a background task that periodically removes expired sessions.
    ///
    /// Returns a shutdown sender that stops the task.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let before = manager.count();
                        manager.cleanup_expired();
                        let after = manager.count();
                        if before != after {
                            tracing::info!(
                                "Session cleanup: removed {} expired sessions ({} remaining)",
                                before - after,
                                after
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session cleanup task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Create a new session
    pub fn create(&self) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            self.cleanup_expired_internal(&mut sessions);

            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Session("Max sessions reached".to_string()));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(&id));
        sessions.insert(id.clone(), session.clone());

        tracing::info!(session_id = %id, active = sessions.len(), "Created session");

        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session
    pub fn remove(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.remove(id) {
            session.mark_closing();
            tracing::info!(session_id = %id, "Removed session");
        }
    }

    /// Get active session count
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Cleanup expired sessions
    pub fn cleanup_expired(&self) {
        let mut sessions = self.sessions.write();
        self.cleanup_expired_internal(&mut sessions);
    }

    fn cleanup_expired_internal(&self, sessions: &mut HashMap<String, Arc<Session>>) {
        let timeout = self.session_timeout;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(session) = sessions.remove(&id) {
                session.mark_closing();
                tracing::info!(session_id = %id, "Expired session");
            }
        }
    }

    /// List all session IDs
    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let manager = SessionManager::new(10);
        let session = manager.create().unwrap();

        assert!(!session.is_closing());
        assert!(!session.is_expired(Duration::from_secs(60)));
        assert_eq!(session.turn_state(), TurnState::Idle);
    }

    #[test]
    fn test_session_get_and_remove() {
        let manager = SessionManager::new(10);
        let session = manager.create().unwrap();
        let id = session.id.clone();

        let retrieved = manager.get(&id).unwrap();
        assert_eq!(retrieved.id, id);

        manager.remove(&id);
        assert!(manager.get(&id).is_none());
        // Removal marks the record so in-flight emitters stop.
        assert!(session.is_closing());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let manager = SessionManager::new(2);
        manager.create().unwrap();
        manager.create().unwrap();
        assert!(manager.create().is_err());
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn test_expired_sessions_are_swept() {
        let manager =
            SessionManager::with_config(2, Duration::from_millis(10), Duration::from_secs(300));
        let session = manager.create().unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // Capacity pressure reclaims the expired slot.
        let second = manager.create().unwrap();
        assert!(manager.get(&session.id).is_none());
        assert!(manager.get(&second.id).is_some());
    }

    #[test]
    fn test_turn_state_snapshot() {
        let manager = SessionManager::new(10);
        let session = manager.create().unwrap();
        session.set_turn_state(TurnState::Listening);
        assert_eq!(session.turn_state(), TurnState::Listening);
    }
}
