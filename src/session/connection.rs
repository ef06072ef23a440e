//! Connection bookkeeping
//!
//! A registry entry for one live charge point connection: the session
//! handle plus activity timestamps for staleness accounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::CallFailure;

use super::Session;

/// An active charge point connection as seen by the registry.
#[derive(Clone)]
pub struct Connection {
    /// Charge point ID
    pub charge_point_id: String,
    session: Arc<Session>,
    /// When the connection was established
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity timestamp
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    pub fn new(session: Arc<Session>) -> Self {
        let now = Utc::now();
        Self {
            charge_point_id: session.charge_point_id().to_string(),
            session,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Queue a raw frame for this charge point.
    pub fn send(&self, message: String) -> Result<(), CallFailure> {
        self.session.send_raw(message)
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Check if connection is considered stale
    pub fn is_stale(&self, timeout_seconds: i64) -> bool {
        let elapsed = Utc::now()
            .signed_duration_since(self.last_activity)
            .num_seconds();
        elapsed > timeout_seconds
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge_point::ChargePointState;
    use crate::router::ActionRouter;
    use crate::session::SessionConfig;

    fn make_connection() -> (Connection, crate::session::SessionDriver) {
        let (session, driver) = Session::new(
            "CP001",
            Arc::new(ActionRouter::new()),
            Arc::new(ChargePointState::new()),
            SessionConfig::default(),
        );
        (Connection::new(session), driver)
    }

    #[test]
    fn new_connection_fields() {
        let (conn, _driver) = make_connection();
        assert_eq!(conn.charge_point_id, "CP001");
        assert!(conn.connected_at <= Utc::now());
    }

    #[test]
    fn touch_updates_last_activity() {
        let (mut conn, _driver) = make_connection();
        let before = conn.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(10));
        conn.touch();
        assert!(conn.last_activity >= before);
    }

    #[test]
    fn is_stale_with_old_activity() {
        let (mut conn, _driver) = make_connection();
        conn.last_activity = Utc::now() - chrono::Duration::seconds(10);
        assert!(conn.is_stale(5));
    }

    #[test]
    fn is_not_stale_with_large_timeout() {
        let (conn, _driver) = make_connection();
        assert!(!conn.is_stale(3600));
    }
}
