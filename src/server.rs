//! WebSocket central system server
//!
//! Accepts charge point connections, negotiates the `ocpp1.6` subprotocol,
//! derives the charge point identity from the URL path's final segment and
//! runs one session per connection. Also exposes the central-system command
//! surface (RemoteStart/Stop, Reset, ChangeAvailability, TriggerMessage)
//! over the connected sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};

use crate::charge_point::{ChargePointState, TransactionIdAllocator};
use crate::config::AppConfig;
use crate::error::CallFailure;
use crate::handlers::{central_system_router, AcceptAll, AuthorizationPolicy};
use crate::protocol::action;
use crate::protocol::messages::{
    AvailabilityStatus, AvailabilityType, ChangeAvailabilityRequest, ChangeAvailabilityResponse,
    MessageTrigger, RemoteStartStopStatus, RemoteStartTransactionRequest,
    RemoteStartTransactionResponse, RemoteStopTransactionRequest, RemoteStopTransactionResponse,
    ResetRequest, ResetResponse, ResetStatus, ResetType, TriggerMessageRequest,
    TriggerMessageResponse, TriggerMessageStatus,
};
use crate::relay::BroadcastRelay;
use crate::router::ActionRouter;
use crate::session::{
    InboundTap, Session, SessionConfig, SessionRegistry, SharedSessionRegistry,
};
use crate::shutdown::ShutdownSignal;
use crate::transport::WsTransport;

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

// ── CentralSystem ──────────────────────────────────────────────

/// OCPP central system server.
pub struct CentralSystem {
    config: AppConfig,
    registry: SharedSessionRegistry,
    router: Arc<ActionRouter>,
    relay: Option<Arc<BroadcastRelay>>,
    shutdown_signal: Option<ShutdownSignal>,
}

impl CentralSystem {
    /// Server with the default accept-everything authorization policy.
    pub fn new(config: AppConfig) -> Self {
        Self::with_policy(config, Arc::new(AcceptAll))
    }

    /// Server with a caller-supplied authorization policy.
    pub fn with_policy(config: AppConfig, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        let registry = SessionRegistry::shared();
        let transactions = Arc::new(TransactionIdAllocator::new());
        let router = Arc::new(central_system_router(
            policy,
            transactions,
            config.session.heartbeat_interval_secs,
        ));
        let relay = config
            .server
            .relay_enabled
            .then(|| BroadcastRelay::new(registry.clone()));

        Self {
            config,
            registry,
            router,
            relay,
            shutdown_signal: None,
        }
    }

    /// Set the shutdown signal for graceful shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    /// Get the session registry
    pub fn registry(&self) -> &SharedSessionRegistry {
        &self.registry
    }

    /// Start the WebSocket server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.config.server.address();
        let listener = TcpListener::bind(&addr).await?;

        info!("🔌 OCPP 1.6 Central System started on ws://{}", addr);
        info!(
            "   Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
            addr
        );

        match &self.shutdown_signal {
            Some(shutdown) => self.run_with_shutdown(listener, shutdown.clone()).await,
            None => self.run_loop(listener).await,
        }
    }

    async fn run_loop(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        while let Ok((stream, addr)) = listener.accept().await {
            self.spawn_connection(stream, addr);
        }
        Ok(())
    }

    async fn run_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = shutdown.notified().wait() => {
                    info!("🛑 WebSocket server received shutdown signal");
                    self.graceful_shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let router = self.router.clone();
        let relay = self.relay.clone();
        let session_config = SessionConfig {
            call_timeout: self.config.session.call_timeout(),
            idle_timeout: Some(self.config.session.idle_timeout()),
        };
        let shutdown = self.shutdown_signal.clone();

        tokio::spawn(async move {
            if let Err(e) =
                handle_connection(stream, addr, registry, router, relay, session_config, shutdown)
                    .await
            {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }

    fn graceful_shutdown(&self) {
        let count = self.registry.count();
        if count > 0 {
            info!("Closing {} connected charge point session(s)...", count);
        }
        self.registry.close_all();
    }

    // ── Central system commands ────────────────────────────

    fn session(&self, charge_point_id: &str) -> Result<Arc<Session>, CallFailure> {
        self.registry.get(charge_point_id).ok_or_else(|| {
            CallFailure::SendFailed(format!("charge point {} not connected", charge_point_id))
        })
    }

    /// Ask a charge point to start a transaction for an id tag.
    pub async fn remote_start_transaction(
        &self,
        charge_point_id: &str,
        id_tag: &str,
        connector_id: Option<u32>,
    ) -> Result<RemoteStartStopStatus, CallFailure> {
        info!(
            "[{}] RemoteStartTransaction - IdTag: {}",
            charge_point_id, id_tag
        );
        let response: RemoteStartTransactionResponse = self
            .session(charge_point_id)?
            .call_typed(
                action::REMOTE_START_TRANSACTION,
                &RemoteStartTransactionRequest {
                    id_tag: id_tag.to_string(),
                    connector_id,
                },
            )
            .await?;
        Ok(response.status)
    }

    /// Ask a charge point to stop a running transaction.
    pub async fn remote_stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<RemoteStartStopStatus, CallFailure> {
        info!(
            "[{}] RemoteStopTransaction - Transaction: {}",
            charge_point_id, transaction_id
        );
        let response: RemoteStopTransactionResponse = self
            .session(charge_point_id)?
            .call_typed(
                action::REMOTE_STOP_TRANSACTION,
                &RemoteStopTransactionRequest { transaction_id },
            )
            .await?;
        Ok(response.status)
    }

    /// Reset a charge point
    pub async fn reset(
        &self,
        charge_point_id: &str,
        kind: ResetType,
    ) -> Result<ResetStatus, CallFailure> {
        info!("[{}] Reset - Type: {:?}", charge_point_id, kind);
        let response: ResetResponse = self
            .session(charge_point_id)?
            .call_typed(action::RESET, &ResetRequest { kind })
            .await?;
        Ok(response.status)
    }

    /// Change a connector's availability (connector 0 = whole charge point).
    pub async fn change_availability(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        kind: AvailabilityType,
    ) -> Result<AvailabilityStatus, CallFailure> {
        info!(
            "[{}] ChangeAvailability - Connector: {}, Type: {:?}",
            charge_point_id, connector_id, kind
        );
        let response: ChangeAvailabilityResponse = self
            .session(charge_point_id)?
            .call_typed(
                action::CHANGE_AVAILABILITY,
                &ChangeAvailabilityRequest { connector_id, kind },
            )
            .await?;
        Ok(response.status)
    }

    /// Ask a charge point to send a specific message.
    pub async fn trigger_message(
        &self,
        charge_point_id: &str,
        requested_message: MessageTrigger,
        connector_id: Option<u32>,
    ) -> Result<TriggerMessageStatus, CallFailure> {
        info!(
            "[{}] TriggerMessage - {:?}",
            charge_point_id, requested_message
        );
        let response: TriggerMessageResponse = self
            .session(charge_point_id)?
            .call_typed(
                action::TRIGGER_MESSAGE,
                &TriggerMessageRequest {
                    requested_message,
                    connector_id,
                },
            )
            .await?;
        Ok(response.status)
    }
}

// ── Per-connection plumbing ────────────────────────────────────

/// Inbound frame observer wired into every server session: keeps the
/// registry's activity timestamps fresh and feeds the broadcast relay.
struct ServerTap {
    registry: SharedSessionRegistry,
    relay: Option<Arc<BroadcastRelay>>,
}

impl InboundTap for ServerTap {
    fn on_frame(&self, origin: &str, raw: &str) {
        self.registry.touch(origin);
        if let Some(relay) = &self.relay {
            relay.forward(origin, raw);
        }
    }
}

/// Extract the charge point identity: the final non-empty path segment,
/// so both `/CP001` and `/ocpp/CP001` work.
fn extract_charge_point_id(path: &str) -> Option<String> {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn reject_handshake(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Handle a WebSocket connection from accept to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: SharedSessionRegistry,
    router: Arc<ActionRouter>,
    relay: Option<Arc<BroadcastRelay>>,
    session_config: SessionConfig,
    shutdown: Option<ShutdownSignal>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("New connection from: {}", addr);

    let mut charge_point_id: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            info!("WebSocket handshake from: {}, path: {}", addr, path);

            let requested_protocols = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            let supports_ocpp16 = requested_protocols
                .split(',')
                .map(str::trim)
                .any(|p| p == OCPP_SUBPROTOCOL);

            if !supports_ocpp16 {
                warn!(
                    "Rejecting {}: subprotocol {} not offered (got: {:?})",
                    addr, OCPP_SUBPROTOCOL, requested_protocols
                );
                return Err(reject_handshake("subprotocol ocpp1.6 required"));
            }

            response.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(OCPP_SUBPROTOCOL),
            );

            match extract_charge_point_id(path) {
                Some(id) => {
                    charge_point_id = Some(id);
                    Ok(response)
                }
                None => {
                    warn!("Rejecting {}: no charge point id in path {}", addr, path);
                    Err(reject_handshake("charge point id required in path"))
                }
            }
        },
    )
    .await?;

    // The closure ran to completion, so the id is present
    let charge_point_id = charge_point_id.expect("handshake accepted without charge point id");
    info!("[{}] Connected from {}", charge_point_id, addr);

    let state = Arc::new(ChargePointState::new());
    let (session, driver) = Session::new(&charge_point_id, router, state, session_config);
    registry.register(session.clone());

    let tap = Arc::new(ServerTap {
        registry: registry.clone(),
        relay,
    });

    // Server shutdown closes the session, which ends the driver loop
    if let Some(shutdown) = shutdown {
        let session = session.clone();
        tokio::spawn(async move {
            shutdown.notified().wait().await;
            session.close();
        });
    }

    driver
        .with_tap(tap)
        .run(WsTransport::new(ws_stream))
        .await;

    registry.unregister_if_current(&session);
    info!("[{}] Disconnected", charge_point_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_the_final_path_segment() {
        assert_eq!(extract_charge_point_id("/CP001"), Some("CP001".to_string()));
        assert_eq!(
            extract_charge_point_id("/ocpp/CP001"),
            Some("CP001".to_string())
        );
        assert_eq!(
            extract_charge_point_id("/ocpp/CP001/"),
            Some("CP001".to_string())
        );
        assert_eq!(extract_charge_point_id("/"), None);
        assert_eq!(extract_charge_point_id(""), None);
    }
}
