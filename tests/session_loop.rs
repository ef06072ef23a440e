//! End-to-end session tests over an in-memory transport
//!
//! Drives complete sessions — codec, router, correlation, state machine —
//! through a channel-backed transport pair, no sockets involved. The peer
//! side of each pair plays the charge point (or a misbehaving client).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use chargelink::charge_point::{ChargePointState, ConnectorStatus, TransactionIdAllocator};
use chargelink::handlers::{central_system_router, AcceptAll};
use chargelink::relay::BroadcastRelay;
use chargelink::session::{InboundTap, SessionRegistry};
use chargelink::{
    CallFailure, OcppFrame, Session, SessionConfig, Transport, TransportError,
};

// ── In-memory transport ────────────────────────────────────────

struct ChannelTransport {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// The far end of a transport pair: what the charge point would see.
struct Peer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    fn send(&self, text: &str) {
        self.tx.send(text.to_string()).expect("session gone");
    }

    /// Next raw frame from the session, `None` once the session closed.
    async fn recv_raw(&mut self) -> Option<String> {
        timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
    }

    async fn recv_frame(&mut self) -> OcppFrame {
        let raw = self.recv_raw().await.expect("connection closed");
        OcppFrame::parse(&raw).expect("session sent an unparseable frame")
    }
}

fn transport_pair() -> (ChannelTransport, Peer) {
    let (to_session_tx, to_session_rx) = mpsc::unbounded_channel();
    let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            rx: to_session_rx,
            tx: to_peer_tx,
        },
        Peer {
            tx: to_session_tx,
            rx: to_peer_rx,
        },
    )
}

/// A central-system session wired to an in-memory peer.
fn cs_session(call_timeout: Duration) -> (Arc<Session>, Peer, JoinHandle<()>) {
    let router = Arc::new(central_system_router(
        Arc::new(AcceptAll),
        Arc::new(TransactionIdAllocator::new()),
        60,
    ));
    let (session, driver) = Session::new(
        "CP001",
        router,
        Arc::new(ChargePointState::new()),
        SessionConfig {
            call_timeout,
            idle_timeout: None,
        },
    );
    let (transport, peer) = transport_pair();
    let handle = tokio::spawn(driver.run(transport));
    (session, peer, handle)
}

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

// ── Inbound call dispatch ──────────────────────────────────────

#[tokio::test]
async fn heartbeat_round_trip() {
    let (_session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    peer.send(r#"[2,"1","Heartbeat",{}]"#);
    match peer.recv_frame().await {
        OcppFrame::CallResult { unique_id, payload } => {
            assert_eq!(unique_id, "1");
            assert!(payload["currentTime"].is_string());
        }
        other => panic!("expected CallResult, got {other:?}"),
    }
}

#[tokio::test]
async fn boot_notification_assigns_heartbeat_interval() {
    let (_session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    peer.send(
        r#"[2,"1","BootNotification",{"chargePointVendor":"VendorY","chargePointModel":"ModelX"}]"#,
    );
    match peer.recv_frame().await {
        OcppFrame::CallResult { payload, .. } => {
            assert_eq!(payload["status"], "Accepted");
            assert_eq!(payload["interval"], 60);
        }
        other => panic!("expected CallResult, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_start_transaction_is_rejected_and_preserves_the_first() {
    let (session, mut peer, _handle) = cs_session(CALL_TIMEOUT);
    let start =
        r#"{"connectorId":1,"idTag":"TAG1","meterStart":0,"timestamp":"2025-01-01T00:00:00Z"}"#;

    peer.send(&format!(r#"[2,"2","StartTransaction",{start}]"#));
    let first_id = match peer.recv_frame().await {
        OcppFrame::CallResult { payload, .. } => {
            assert_eq!(payload["idTagInfo"]["status"], "Accepted");
            payload["transactionId"].as_i64().unwrap()
        }
        other => panic!("expected CallResult, got {other:?}"),
    };

    peer.send(&format!(r#"[2,"3","StartTransaction",{start}]"#));
    match peer.recv_frame().await {
        OcppFrame::CallResult { unique_id, payload } => {
            assert_eq!(unique_id, "3");
            assert_eq!(payload["idTagInfo"]["status"], "ConcurrentTx");
            assert_eq!(payload["transactionId"].as_i64().unwrap(), first_id);
        }
        other => panic!("expected CallResult, got {other:?}"),
    }

    let record = session.state().snapshot(1).unwrap();
    assert_eq!(record.status, ConnectorStatus::Charging);
    assert_eq!(record.transaction_id, Some(first_id as i32));
}

#[tokio::test]
async fn stop_transaction_requires_a_matching_id() {
    let (session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    peer.send(
        r#"[2,"1","StartTransaction",{"connectorId":1,"idTag":"TAG1","meterStart":0,"timestamp":"2025-01-01T00:00:00Z"}]"#,
    );
    let transaction_id = match peer.recv_frame().await {
        OcppFrame::CallResult { payload, .. } => payload["transactionId"].as_i64().unwrap(),
        other => panic!("expected CallResult, got {other:?}"),
    };

    // Wrong id: rejected, still charging
    peer.send(
        r#"[2,"2","StopTransaction",{"transactionId":9999,"meterStop":100,"timestamp":"2025-01-01T01:00:00Z"}]"#,
    );
    match peer.recv_frame().await {
        OcppFrame::CallResult { payload, .. } => {
            assert_eq!(payload["idTagInfo"]["status"], "Invalid");
        }
        other => panic!("expected CallResult, got {other:?}"),
    }
    assert_eq!(
        session.state().snapshot(1).unwrap().status,
        ConnectorStatus::Charging
    );

    // Matching id: accepted, back to Available
    peer.send(&format!(
        r#"[2,"3","StopTransaction",{{"transactionId":{transaction_id},"meterStop":100,"timestamp":"2025-01-01T01:00:00Z"}}]"#,
    ));
    match peer.recv_frame().await {
        OcppFrame::CallResult { payload, .. } => {
            assert_eq!(payload["idTagInfo"]["status"], "Accepted");
        }
        other => panic!("expected CallResult, got {other:?}"),
    }
    let record = session.state().snapshot(1).unwrap();
    assert_eq!(record.status, ConnectorStatus::Available);
    assert_eq!(record.transaction_id, None);
}

#[tokio::test]
async fn unknown_action_answers_not_implemented() {
    let (_session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    peer.send(r#"[2,"1","NoSuchAction",{}]"#);
    match peer.recv_frame().await {
        OcppFrame::CallError {
            unique_id,
            error_code,
            ..
        } => {
            assert_eq!(unique_id, "1");
            assert_eq!(error_code, "NotImplemented");
        }
        other => panic!("expected CallError, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_payload_is_a_formation_violation_and_the_link_survives() {
    let (_session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    peer.send(r#"[2,"1","StartTransaction",{}]"#);
    match peer.recv_frame().await {
        OcppFrame::CallError { error_code, .. } => {
            assert_eq!(error_code, "FormationViolation");
        }
        other => panic!("expected CallError, got {other:?}"),
    }

    // Connection still usable
    peer.send(r#"[2,"2","Heartbeat",{}]"#);
    assert!(peer.recv_frame().await.is_call_result());
}

// ── Malformed frames ───────────────────────────────────────────

#[tokio::test]
async fn unaddressable_malformed_frame_closes_the_connection() {
    let (session, mut peer, handle) = cs_session(CALL_TIMEOUT);

    peer.send("not-json");
    assert_eq!(peer.recv_raw().await, None, "no reply, just a close");

    let _ = timeout(Duration::from_secs(1), handle).await.unwrap();
    assert!(session.is_closed());
}

#[tokio::test]
async fn malformed_frame_with_recoverable_id_gets_an_error_then_close() {
    let (session, mut peer, handle) = cs_session(CALL_TIMEOUT);

    // Right shape for a Call but one element short
    peer.send(r#"[2,"77","Heartbeat"]"#);
    match peer.recv_frame().await {
        OcppFrame::CallError {
            unique_id,
            error_code,
            ..
        } => {
            assert_eq!(unique_id, "77");
            assert_eq!(error_code, "FormationViolation");
        }
        other => panic!("expected CallError, got {other:?}"),
    }
    assert_eq!(peer.recv_raw().await, None);

    let _ = timeout(Duration::from_secs(1), handle).await.unwrap();
    assert!(session.is_closed());
}

// ── Outbound calls ─────────────────────────────────────────────

#[tokio::test]
async fn outbound_call_resolves_with_the_peer_reply() {
    let (session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    let call_task = {
        let session = session.clone();
        tokio::spawn(async move { session.call("Reset", json!({"type": "Soft"})).await })
    };

    let unique_id = match peer.recv_frame().await {
        OcppFrame::Call {
            unique_id, action, ..
        } => {
            assert_eq!(action, "Reset");
            unique_id
        }
        other => panic!("expected Call, got {other:?}"),
    };
    peer.send(&format!(r#"[3,"{unique_id}",{{"status":"Accepted"}}]"#));

    let result = call_task.await.unwrap().unwrap();
    assert_eq!(result["status"], "Accepted");
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn peer_call_error_surfaces_to_the_caller() {
    let (session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    let call_task = {
        let session = session.clone();
        tokio::spawn(async move { session.call("Reset", json!({"type": "Hard"})).await })
    };

    let unique_id = match peer.recv_frame().await {
        OcppFrame::Call { unique_id, .. } => unique_id,
        other => panic!("expected Call, got {other:?}"),
    };
    peer.send(&format!(
        r#"[4,"{unique_id}","NotSupported","no hard reset",{{}}]"#
    ));

    match call_task.await.unwrap() {
        Err(CallFailure::CallError { code, description }) => {
            assert_eq!(code, "NotSupported");
            assert_eq!(description, "no hard reset");
        }
        other => panic!("expected CallError failure, got {other:?}"),
    }
}

#[tokio::test]
async fn stray_responses_are_ignored_until_the_matching_one_arrives() {
    let (session, mut peer, _handle) = cs_session(CALL_TIMEOUT);

    let call_task = {
        let session = session.clone();
        tokio::spawn(async move { session.call("Reset", json!({"type": "Soft"})).await })
    };

    let unique_id = match peer.recv_frame().await {
        OcppFrame::Call { unique_id, .. } => unique_id,
        other => panic!("expected Call, got {other:?}"),
    };

    // A retransmitted response for some long-gone id must not match
    peer.send(r#"[3,"stale-id",{"status":"Rejected"}]"#);
    peer.send(&format!(r#"[3,"{unique_id}",{{"status":"Accepted"}}]"#));

    let result = call_task.await.unwrap().unwrap();
    assert_eq!(result["status"], "Accepted");
}

#[tokio::test]
async fn call_timeout_fails_the_caller_and_leaves_no_entry() {
    let (session, mut peer, _handle) = cs_session(Duration::from_millis(100));

    let result = session.call("Reset", json!({"type": "Soft"})).await;
    assert_eq!(result.unwrap_err(), CallFailure::Timeout);
    assert_eq!(session.pending_calls(), 0, "timed-out call must not leak");

    // The frame did go out; only the reply never came
    assert!(peer.recv_frame().await.is_call());
}

#[tokio::test]
async fn disconnect_fails_every_pending_call() {
    let (session, mut peer, handle) = cs_session(CALL_TIMEOUT);

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.call("Reset", json!({"type": "Soft"})).await })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .call("UnlockConnector", json!({"connectorId": 1}))
                .await
        })
    };

    // First call reaches the wire; the second queues behind the call gate
    assert!(peer.recv_frame().await.is_call());

    // Peer vanishes without answering
    drop(peer);
    let _ = timeout(Duration::from_secs(1), handle).await.unwrap();

    let first = timeout(Duration::from_secs(1), first)
        .await
        .expect("first call must not hang")
        .unwrap();
    let second = timeout(Duration::from_secs(1), second)
        .await
        .expect("second call must not hang")
        .unwrap();

    assert_eq!(first.unwrap_err(), CallFailure::ConnectionClosed);
    assert!(matches!(
        second.unwrap_err(),
        CallFailure::ConnectionClosed | CallFailure::SessionClosed
    ));
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn closed_session_rejects_new_calls() {
    let (session, _peer, handle) = cs_session(CALL_TIMEOUT);

    session.close();
    let _ = timeout(Duration::from_secs(1), handle).await.unwrap();

    let result = session.call("Heartbeat", json!({})).await;
    assert_eq!(result.unwrap_err(), CallFailure::SessionClosed);
}

// ── Broadcast relay ────────────────────────────────────────────

#[tokio::test]
async fn relay_forwards_raw_frames_to_every_other_session() {
    let registry = SessionRegistry::shared();
    let relay = BroadcastRelay::new(registry.clone());
    let router = Arc::new(central_system_router(
        Arc::new(AcceptAll),
        Arc::new(TransactionIdAllocator::new()),
        60,
    ));

    let mut peers = Vec::new();
    for id in ["CP-A", "CP-B"] {
        let (session, driver) = Session::new(
            id,
            router.clone(),
            Arc::new(ChargePointState::new()),
            SessionConfig {
                call_timeout: CALL_TIMEOUT,
                idle_timeout: None,
            },
        );
        registry.register(session.clone());
        let (transport, peer) = transport_pair();
        let tap: Arc<dyn InboundTap> = relay.clone();
        tokio::spawn(driver.with_tap(tap).run(transport));
        peers.push(peer);
    }
    let mut peer_b = peers.pop().unwrap();
    let mut peer_a = peers.pop().unwrap();

    let raw = r#"[2,"1","Heartbeat",{}]"#;
    peer_a.send(raw);

    // The sender gets its normal reply...
    assert!(peer_a.recv_frame().await.is_call_result());
    // ...and the other session receives the unmodified frame
    assert_eq!(peer_b.recv_raw().await.unwrap(), raw);
}
