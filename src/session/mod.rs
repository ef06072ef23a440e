//! Per-connection session engine
//!
//! A [`Session`] binds one connection's correlation table, action router and
//! connector state machine together; its [`SessionDriver`] owns the
//! transport and is the connection's single reader, so frames are processed
//! strictly in receipt order.
//!
//! Outbound calls go through [`Session::call`], which enforces the OCPP
//! rule of at most one unanswered Call per direction: a second caller
//! *waits* for the in-flight exchange to finish rather than being rejected.
//! Closing a session is idempotent and deterministic — new calls fail fast
//! with `SessionClosed`, every pending call completes with
//! `ConnectionClosed`, and the transport is released exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::charge_point::ChargePointState;
use crate::error::CallFailure;
use crate::protocol::{ErrorCode, OcppFrame};
use crate::router::{ActionRouter, SessionContext};
use crate::shutdown::ShutdownSignal;
use crate::transport::Transport;

pub mod correlation;

mod connection;
mod registry;

pub use connection::Connection;
pub use registry::{SessionRegistry, SharedSessionRegistry};

use correlation::{CallOutcome, CallTracker};

// ── Configuration ──────────────────────────────────────────────

/// Per-session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for each outbound call, independent of the read timeout.
    pub call_timeout: Duration,
    /// Close the session after this much inbound silence. `None` disables
    /// the read timeout (client sessions usually rely on heartbeats).
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            idle_timeout: None,
        }
    }
}

// ── InboundTap ─────────────────────────────────────────────────

/// Observer of raw inbound frames, invoked before dispatch. Used by the
/// server for activity tracking and the broadcast relay; the engine works
/// without one.
pub trait InboundTap: Send + Sync {
    fn on_frame(&self, origin: &str, raw: &str);
}

// ── Session ────────────────────────────────────────────────────

/// One charge point connection's protocol engine.
pub struct Session {
    ctx: SessionContext,
    router: Arc<ActionRouter>,
    calls: CallTracker,
    outbox: mpsc::UnboundedSender<String>,
    config: SessionConfig,
    /// Serializes outbound calls: at most one unanswered Call per direction.
    call_gate: Mutex<()>,
    closed: AtomicBool,
    closing: ShutdownSignal,
}

impl Session {
    /// Create a session and the driver that must be run against a transport.
    pub fn new(
        charge_point_id: impl Into<String>,
        router: Arc<ActionRouter>,
        state: Arc<ChargePointState>,
        config: SessionConfig,
    ) -> (Arc<Self>, SessionDriver) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            ctx: SessionContext {
                charge_point_id: charge_point_id.into(),
                state,
            },
            router,
            calls: CallTracker::new(),
            outbox,
            config,
            call_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
            closing: ShutdownSignal::new(),
        });
        let driver = SessionDriver {
            session: session.clone(),
            outbox_rx,
            tap: None,
        };
        (session, driver)
    }

    pub fn charge_point_id(&self) -> &str {
        &self.ctx.charge_point_id
    }

    pub fn state(&self) -> Arc<ChargePointState> {
        self.ctx.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Signal that fires when the session starts closing; lets auxiliary
    /// tasks (heartbeat timers) end deterministically.
    pub fn closed_signal(&self) -> ShutdownSignal {
        self.closing.clone()
    }

    /// Calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    /// Queue a raw frame for the peer, bypassing correlation. Used for
    /// replies and relay traffic.
    pub fn send_raw(&self, text: String) -> Result<(), CallFailure> {
        if self.is_closed() {
            return Err(CallFailure::SessionClosed);
        }
        self.outbox
            .send(text)
            .map_err(|_| CallFailure::SendFailed("connection task gone".into()))
    }

    /// Send a Call and await its result payload.
    ///
    /// Holds the call gate for the whole exchange, so concurrent callers
    /// queue up instead of putting a second unanswered Call on the wire.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, CallFailure> {
        if self.is_closed() {
            return Err(CallFailure::SessionClosed);
        }
        let _gate = self.call_gate.lock().await;
        if self.is_closed() {
            return Err(CallFailure::SessionClosed);
        }

        let unique_id = Uuid::new_v4().to_string();
        let rx = self.calls.register(&unique_id, action);

        let frame = OcppFrame::Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };
        debug!(
            charge_point_id = self.charge_point_id(),
            action,
            unique_id = unique_id.as_str(),
            "Sending call"
        );
        if let Err(e) = self.send_raw(frame.serialize()) {
            self.calls.forget(&unique_id);
            return Err(e);
        }

        match timeout(self.config.call_timeout, rx).await {
            Ok(Ok(CallOutcome::Result(payload))) => Ok(payload),
            Ok(Ok(CallOutcome::Error { code, description })) => {
                Err(CallFailure::CallError { code, description })
            }
            // Slot dropped: the session tore down while we waited
            Ok(Err(_)) => Err(CallFailure::ConnectionClosed),
            Err(_) => {
                self.calls.forget(&unique_id);
                warn!(
                    charge_point_id = self.charge_point_id(),
                    action,
                    unique_id = unique_id.as_str(),
                    "Call timed out"
                );
                Err(CallFailure::Timeout)
            }
        }
    }

    /// Typed variant of [`call`](Self::call): serializes the request body
    /// and decodes the response against the expected shape.
    pub async fn call_typed<P, R>(&self, action: &str, request: &P) -> Result<R, CallFailure>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)
            .map_err(|e| CallFailure::SendFailed(e.to_string()))?;
        let result = self.call(action, payload).await?;
        serde_json::from_value(result).map_err(|e| CallFailure::InvalidResponse(e.to_string()))
    }

    /// Close the session: refuse new calls, fail every pending call, wake
    /// the driver and any timer tasks. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closing.trigger();
        let failed = self.calls.fail_all();
        info!(
            charge_point_id = self.charge_point_id(),
            pending_failed = failed,
            "Session closed"
        );
    }
}

// ── SessionDriver ──────────────────────────────────────────────

enum Disposition {
    Continue,
    Close,
}

/// Owns the transport and the outbox receiver; the connection's single
/// reader/writer task.
pub struct SessionDriver {
    session: Arc<Session>,
    outbox_rx: mpsc::UnboundedReceiver<String>,
    tap: Option<Arc<dyn InboundTap>>,
}

impl SessionDriver {
    /// Attach an inbound frame observer (activity tracking, relay fan-out).
    pub fn with_tap(mut self, tap: Arc<dyn InboundTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run the connection to completion. Returns when the peer goes away,
    /// the read timeout fires, or the session is closed.
    pub async fn run<T: Transport>(mut self, mut transport: T) {
        let session = self.session.clone();
        let charge_point_id = session.charge_point_id().to_string();
        info!(
            charge_point_id = charge_point_id.as_str(),
            "Session loop started"
        );

        let mut idle_deadline = session
            .config
            .idle_timeout
            .map(|d| tokio::time::Instant::now() + d);

        loop {
            if session.is_closed() {
                break;
            }
            tokio::select! {
                _ = session.closing.notified().wait() => break,

                outbound = self.outbox_rx.recv() => match outbound {
                    Some(text) => {
                        if let Err(e) = transport.send(text).await {
                            error!(
                                charge_point_id = charge_point_id.as_str(),
                                error = %e,
                                "Send error"
                            );
                            break;
                        }
                    }
                    // Session dropped its sender side; nothing left to write
                    None => break,
                },

                inbound = transport.recv() => match inbound {
                    Some(text) => {
                        if let Some(d) = session.config.idle_timeout {
                            idle_deadline = Some(tokio::time::Instant::now() + d);
                        }
                        if let Some(tap) = &self.tap {
                            tap.on_frame(&charge_point_id, &text);
                        }
                        match self.process_frame(&text).await {
                            Disposition::Continue => {}
                            Disposition::Close => break,
                        }
                    }
                    None => {
                        info!(
                            charge_point_id = charge_point_id.as_str(),
                            "Peer closed the connection"
                        );
                        break;
                    }
                },

                _ = idle_wait(idle_deadline) => {
                    warn!(
                        charge_point_id = charge_point_id.as_str(),
                        "Read timeout, closing session"
                    );
                    break;
                }
            }
        }

        session.close();
        // Flush already-queued replies before releasing the transport
        while let Ok(text) = self.outbox_rx.try_recv() {
            if transport.send(text).await.is_err() {
                break;
            }
        }
        transport.close().await;
        info!(
            charge_point_id = charge_point_id.as_str(),
            "Session loop ended"
        );
    }

    /// Decode and act on one inbound frame.
    async fn process_frame(&self, text: &str) -> Disposition {
        let session = &self.session;
        match OcppFrame::parse(text) {
            Ok(OcppFrame::Call {
                unique_id,
                action,
                payload,
            }) => {
                let reply = session
                    .router
                    .dispatch(&session.ctx, unique_id, &action, payload)
                    .await;
                // Peer vanishing mid-dispatch is handled by the write side
                let _ = session.outbox.send(reply.serialize());
                Disposition::Continue
            }
            Ok(OcppFrame::CallResult { unique_id, payload }) => {
                session.calls.resolve(&unique_id, payload);
                Disposition::Continue
            }
            Ok(OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            }) => {
                session
                    .calls
                    .reject(&unique_id, &error_code, &error_description);
                Disposition::Continue
            }
            Err(e) => {
                // Frame-level malformation is fatal for the link. Reply when
                // the frame is still addressable, then close either way.
                match OcppFrame::recover_unique_id(text) {
                    Some(unique_id) => {
                        error!(
                            charge_point_id = session.charge_point_id(),
                            error = %e,
                            "Malformed frame, replying and closing"
                        );
                        let reply = OcppFrame::error_response(
                            unique_id,
                            ErrorCode::FormationViolation,
                            e.to_string(),
                        );
                        let _ = session.outbox.send(reply.serialize());
                    }
                    None => {
                        error!(
                            charge_point_id = session.charge_point_id(),
                            error = %e,
                            "Unaddressable malformed frame, closing"
                        );
                    }
                }
                Disposition::Close
            }
        }
    }
}

async fn idle_wait(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
