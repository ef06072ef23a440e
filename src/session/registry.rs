//! Session registry — manages active charge point connections

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::CallFailure;

use super::connection::Connection;
use super::Session;

/// Thread-safe registry of active OCPP charge point sessions
pub struct SessionRegistry {
    sessions: DashMap<String, Connection>,
}

/// Shared, reference-counted session registry
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Wrap in `Arc` for shared ownership
    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register a new charge point session. A still-registered session with
    /// the same id is evicted and closed — the newest connection wins.
    pub fn register(&self, session: Arc<Session>) {
        let connection = Connection::new(session);
        let charge_point_id = connection.charge_point_id.clone();
        info!(
            charge_point_id = charge_point_id.as_str(),
            "Registering charge point session"
        );
        if let Some(evicted) = self.sessions.insert(charge_point_id.clone(), connection) {
            warn!(
                charge_point_id = charge_point_id.as_str(),
                connected_at = %evicted.connected_at,
                "Evicting previous session for reconnecting charge point"
            );
            evicted.session().close();
        }
    }

    /// Unregister only if `session` is still the registered one. Used on
    /// connection teardown so a driver that was evicted by a reconnect does
    /// not tear down its successor's entry.
    pub fn unregister_if_current(&self, session: &Arc<Session>) {
        let charge_point_id = session.charge_point_id();
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, conn| Arc::ptr_eq(conn.session(), session));
        if removed.is_some() {
            info!(charge_point_id, "Unregistered charge point session");
        }
    }

    /// Unregister a charge point connection
    pub fn unregister(&self, charge_point_id: &str) {
        if let Some((_, conn)) = self.sessions.remove(charge_point_id) {
            conn.session().close();
            info!(charge_point_id, "Unregistered charge point session");
        } else {
            warn!(charge_point_id, "Attempted to unregister unknown session");
        }
    }

    /// Session handle for a connected charge point.
    pub fn get(&self, charge_point_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(charge_point_id)
            .map(|conn| conn.session().clone())
    }

    /// Send a raw frame to a specific charge point
    pub fn send_to(&self, charge_point_id: &str, message: String) -> Result<(), CallFailure> {
        match self.sessions.get(charge_point_id) {
            Some(conn) => conn.send(message),
            None => Err(CallFailure::SendFailed(format!(
                "charge point {} not connected",
                charge_point_id
            ))),
        }
    }

    /// Update last activity for a charge point
    pub fn touch(&self, charge_point_id: &str) {
        if let Some(mut conn) = self.sessions.get_mut(charge_point_id) {
            conn.touch();
        }
    }

    /// Check if a charge point is currently connected
    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    /// Get all connected charge point IDs
    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    /// Snapshot of the live sessions, safe to iterate while connections
    /// come and go.
    pub fn snapshot(&self) -> Vec<(String, Arc<Session>)> {
        self.sessions
            .iter()
            .map(|r| (r.key().clone(), r.session().clone()))
            .collect()
    }

    /// Charge points with no inbound activity for longer than the threshold.
    pub fn stale_ids(&self, timeout_seconds: i64) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|r| r.is_stale(timeout_seconds))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Number of active sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every session (server shutdown).
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.session().close();
        }
        self.sessions.clear();
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge_point::ChargePointState;
    use crate::router::ActionRouter;
    use crate::session::{SessionConfig, SessionDriver};

    fn make_session(id: &str) -> (Arc<Session>, SessionDriver) {
        Session::new(
            id,
            Arc::new(ActionRouter::new()),
            Arc::new(ChargePointState::new()),
            SessionConfig::default(),
        )
    }

    #[test]
    fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let (session, _driver) = make_session("CP001");
        registry.register(session);

        assert!(registry.is_connected("CP001"));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("CP001").is_some());
        assert!(registry.get("CP002").is_none());
    }

    #[test]
    fn duplicate_registration_evicts_old_session() {
        let registry = SessionRegistry::new();
        let (old, _old_driver) = make_session("CP001");
        let (new, _new_driver) = make_session("CP001");
        registry.register(old.clone());
        registry.register(new.clone());

        assert_eq!(registry.count(), 1);
        assert!(old.is_closed());
        assert!(!new.is_closed());
    }

    #[test]
    fn unregister_closes_session() {
        let registry = SessionRegistry::new();
        let (session, _driver) = make_session("CP001");
        registry.register(session.clone());
        registry.unregister("CP001");

        assert!(!registry.is_connected("CP001"));
        assert!(session.is_closed());
    }

    #[test]
    fn send_to_unknown_charge_point_fails() {
        let registry = SessionRegistry::new();
        assert!(registry.send_to("CP404", "[]".into()).is_err());
    }

    #[test]
    fn close_all_empties_the_registry() {
        let registry = SessionRegistry::new();
        let (a, _da) = make_session("A");
        let (b, _db) = make_session("B");
        registry.register(a.clone());
        registry.register(b.clone());

        registry.close_all();
        assert_eq!(registry.count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
