//! Charge point client
//!
//! Connects outward to a central system with the `ocpp1.6` subprotocol and
//! drives the charge point side of the protocol: BootNotification, the
//! heartbeat loop at the server-assigned interval, status notifications and
//! the transaction lifecycle. Central-system commands arrive through the
//! same session engine; their follow-up work (the StartTransaction after a
//! RemoteStart, the reboot after a hard Reset) is queued by the handlers
//! and performed here, after the command's own reply has gone out.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::charge_point::handlers::{
    charge_point_router, ChargePointCommand, CommandSink, ConfigurationStore,
};
use crate::charge_point::{ChargePointState, ConnectorStatus};
use crate::error::CallFailure;
use crate::protocol::action;
use crate::protocol::messages::{
    AuthorizationStatus, BootNotificationRequest, BootNotificationResponse,
    ChargePointErrorCode, HeartbeatRequest, HeartbeatResponse, MeterValue, MeterValuesRequest,
    MeterValuesResponse, Reason, RegistrationStatus, SampledValue, StartTransactionRequest,
    StartTransactionResponse, StatusNotificationRequest, StatusNotificationResponse,
    StopTransactionRequest, StopTransactionResponse,
};
use crate::session::{Session, SessionConfig};
use crate::shutdown::ShutdownSignal;
use crate::transport::WsTransport;

const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Energy delivered per completed charge cycle in the simulated meter (Wh).
const METER_STEP_WH: i32 = 100;

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("server did not accept subprotocol ocpp1.6")]
    SubprotocolRefused,

    #[error(transparent)]
    Call(#[from] CallFailure),
}

// ── Configuration ──────────────────────────────────────────────

/// Connection and identity settings for one simulated charge point.
#[derive(Debug, Clone)]
pub struct ChargePointConfig {
    /// Central system base URL, e.g. `ws://localhost:9000/ocpp`.
    pub url: String,
    pub charge_point_id: String,
    pub vendor: String,
    pub model: String,
    pub firmware_version: Option<String>,
    /// Id tag used for locally initiated transactions.
    pub id_tag: String,
    pub call_timeout: Duration,
    /// Fallback heartbeat interval until BootNotification assigns one.
    pub heartbeat_interval_secs: u32,
}

impl Default for ChargePointConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/ocpp".to_string(),
            charge_point_id: "CP001".to_string(),
            vendor: "VendorY".to_string(),
            model: "ModelX".to_string(),
            firmware_version: Some("1.0.0".to_string()),
            id_tag: "TAG1".to_string(),
            call_timeout: Duration::from_secs(30),
            heartbeat_interval_secs: 60,
        }
    }
}

// ── ChargePoint ────────────────────────────────────────────────

/// A connected charge point client.
pub struct ChargePoint {
    config: ChargePointConfig,
    session: Arc<Session>,
    state: Arc<ChargePointState>,
    sink: CommandSink,
    commands: mpsc::UnboundedReceiver<ChargePointCommand>,
    driver_handle: JoinHandle<()>,
    /// Simulated energy meter (Wh), advanced per completed cycle.
    meter: AtomicI32,
}

impl ChargePoint {
    /// Connect to the central system and start the session engine.
    pub async fn connect(config: ChargePointConfig) -> Result<Self, ClientError> {
        let url = format!(
            "{}/{}",
            config.url.trim_end_matches('/'),
            config.charge_point_id
        );
        info!("Connecting to {} as {}", url, config.charge_point_id);

        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::Handshake(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(OCPP_SUBPROTOCOL),
        );

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| ClientError::Handshake(e.to_string()))?;

        let negotiated = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok());
        if negotiated != Some(OCPP_SUBPROTOCOL) {
            return Err(ClientError::SubprotocolRefused);
        }
        info!("WebSocket connection established ({})", OCPP_SUBPROTOCOL);

        let state = Arc::new(ChargePointState::new());
        let (sink, commands) = mpsc::unbounded_channel();
        let store = ConfigurationStore::new(config.heartbeat_interval_secs);
        let router = Arc::new(charge_point_router(sink.clone(), store));
        let (session, driver) = Session::new(
            &config.charge_point_id,
            router,
            state.clone(),
            SessionConfig {
                call_timeout: config.call_timeout,
                idle_timeout: None,
            },
        );
        let driver_handle = tokio::spawn(driver.run(WsTransport::new(ws_stream)));

        Ok(Self {
            config,
            session,
            state,
            sink,
            commands,
            driver_handle,
            meter: AtomicI32::new(0),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> &Arc<ChargePointState> {
        &self.state
    }

    /// Queue driver work, e.g. a scripted charge cycle.
    pub fn queue(&self, command: ChargePointCommand) {
        let _ = self.sink.send(command);
    }

    /// A clonable handle for queueing commands from other tasks.
    pub fn command_sink(&self) -> CommandSink {
        self.sink.clone()
    }

    // ── Outbound calls ─────────────────────────────────────

    /// Register with the central system; returns the assigned heartbeat
    /// interval on acceptance.
    pub async fn boot_notification(&self) -> Result<BootNotificationResponse, CallFailure> {
        let response: BootNotificationResponse = self
            .session
            .call_typed(
                action::BOOT_NOTIFICATION,
                &BootNotificationRequest {
                    charge_point_vendor: self.config.vendor.clone(),
                    charge_point_model: self.config.model.clone(),
                    charge_point_serial_number: None,
                    charge_box_serial_number: None,
                    firmware_version: self.config.firmware_version.clone(),
                    iccid: None,
                    imsi: None,
                    meter_type: None,
                    meter_serial_number: None,
                },
            )
            .await?;
        match response.status {
            RegistrationStatus::Accepted => {
                info!(
                    "BootNotification accepted, heartbeat interval: {}s",
                    response.interval
                );
            }
            other => error!("BootNotification not accepted: {:?}", other),
        }
        Ok(response)
    }

    pub async fn heartbeat(&self) -> Result<HeartbeatResponse, CallFailure> {
        let response: HeartbeatResponse = self
            .session
            .call_typed(action::HEARTBEAT, &HeartbeatRequest {})
            .await?;
        info!("Heartbeat response: {}", response.current_time);
        Ok(response)
    }

    /// Report a connector's current status.
    pub async fn send_status_notification(&self, connector_id: u32) -> Result<(), CallFailure> {
        let status = self
            .state
            .snapshot(connector_id)
            .map(|r| r.status)
            .unwrap_or(ConnectorStatus::Available);
        let _: StatusNotificationResponse = self
            .session
            .call_typed(
                action::STATUS_NOTIFICATION,
                &StatusNotificationRequest {
                    connector_id,
                    error_code: ChargePointErrorCode::NoError,
                    status: status.wire(),
                    info: None,
                    timestamp: Some(Utc::now()),
                    vendor_id: None,
                    vendor_error_code: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Report the meter reading for a running transaction.
    pub async fn send_meter_values(
        &self,
        connector_id: u32,
        transaction_id: i32,
    ) -> Result<(), CallFailure> {
        let reading = self.meter.load(Ordering::SeqCst);
        let _: MeterValuesResponse = self
            .session
            .call_typed(
                action::METER_VALUES,
                &MeterValuesRequest {
                    connector_id,
                    transaction_id: Some(transaction_id),
                    meter_value: vec![MeterValue {
                        timestamp: Utc::now(),
                        sampled_value: vec![SampledValue {
                            value: reading.to_string(),
                            context: None,
                            format: None,
                            measurand: Some("Energy.Active.Import.Register".to_string()),
                            phase: None,
                            location: None,
                            unit: Some("Wh".to_string()),
                        }],
                    }],
                },
            )
            .await?;
        Ok(())
    }

    /// Open a transaction: asks the central system, adopts the assigned
    /// transaction id on acceptance and reports the status change.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<Option<i32>, CallFailure> {
        let ready = self
            .state
            .snapshot(connector_id)
            .map(|r| {
                matches!(
                    r.status,
                    ConnectorStatus::Available | ConnectorStatus::Preparing
                )
            })
            .unwrap_or(true);
        if !ready {
            warn!(
                "Cannot start transaction, connector {} not available",
                connector_id
            );
            return Ok(None);
        }

        let meter_start = self.meter.load(Ordering::SeqCst);
        let response: StartTransactionResponse = self
            .session
            .call_typed(
                action::START_TRANSACTION,
                &StartTransactionRequest {
                    connector_id,
                    id_tag: id_tag.to_string(),
                    meter_start,
                    timestamp: Utc::now(),
                    reservation_id: None,
                },
            )
            .await?;

        if response.id_tag_info.status != AuthorizationStatus::Accepted {
            error!(
                "StartTransaction not accepted: {:?}",
                response.id_tag_info.status
            );
            return Ok(None);
        }

        if let Err(e) =
            self.state
                .begin_transaction(connector_id, response.transaction_id, meter_start)
        {
            // Raced with a local state change; the central system's view wins
            warn!("Could not adopt transaction locally: {}", e);
            return Ok(None);
        }
        info!("Transaction started: ID {}", response.transaction_id);
        self.send_status_notification(connector_id).await?;
        Ok(Some(response.transaction_id))
    }

    /// Close a transaction and report the connector returning to idle.
    pub async fn stop_transaction(
        &self,
        transaction_id: i32,
        reason: Reason,
    ) -> Result<(), CallFailure> {
        let meter_stop = self.meter.fetch_add(METER_STEP_WH, Ordering::SeqCst) + METER_STEP_WH;
        let response: StopTransactionResponse = self
            .session
            .call_typed(
                action::STOP_TRANSACTION,
                &StopTransactionRequest {
                    transaction_id,
                    id_tag: Some(self.config.id_tag.clone()),
                    meter_stop,
                    timestamp: Utc::now(),
                    reason: Some(reason),
                    transaction_data: None,
                },
            )
            .await?;

        if let Some(info) = &response.id_tag_info {
            if info.status != AuthorizationStatus::Accepted {
                warn!("StopTransaction answered with {:?}", info.status);
            }
        }

        match self.state.end_transaction(transaction_id) {
            Ok(connector_id) => {
                info!("Transaction {} stopped", transaction_id);
                self.send_status_notification(connector_id).await?;
            }
            Err(e) => warn!("Local stop bookkeeping failed: {}", e),
        }
        Ok(())
    }

    // ── Driver loop ────────────────────────────────────────

    /// Boot, then run the heartbeat loop and serve queued commands until
    /// the session ends or shutdown is requested.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<(), ClientError> {
        let boot = self.boot_notification().await?;
        let mut interval_secs = if boot.status == RegistrationStatus::Accepted {
            boot.interval.max(1)
        } else {
            self.config.heartbeat_interval_secs.max(1)
        };
        self.send_status_notification(1).await?;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(u64::from(interval_secs)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        error!("Heartbeat failed: {}", e);
                        if matches!(e, CallFailure::SessionClosed | CallFailure::ConnectionClosed) {
                            break;
                        }
                    }
                    // Meter values ride the heartbeat cadence while charging
                    for connector_id in self.state.connector_ids() {
                        let open = self
                            .state
                            .snapshot(connector_id)
                            .and_then(|r| r.transaction_id);
                        if let Some(transaction_id) = open {
                            if let Err(e) =
                                self.send_meter_values(connector_id, transaction_id).await
                            {
                                error!("MeterValues failed: {}", e);
                            }
                        }
                    }
                }

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(new_interval) = self.perform(command).await {
                            if new_interval != interval_secs {
                                interval_secs = new_interval;
                                ticker = tokio::time::interval(
                                    Duration::from_secs(u64::from(interval_secs)),
                                );
                                ticker.set_missed_tick_behavior(
                                    tokio::time::MissedTickBehavior::Skip,
                                );
                            }
                        }
                    }
                    None => break,
                },

                _ = self.session.closed_signal().notified().wait() => {
                    info!("Session closed, stopping charge point loop");
                    break;
                }

                _ = shutdown.notified().wait() => {
                    info!("Shutdown requested, stopping charge point loop");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Execute one queued command; returns a new heartbeat interval when a
    /// re-registration assigned one.
    async fn perform(&self, command: ChargePointCommand) -> Option<u32> {
        match command {
            ChargePointCommand::StartCharging {
                connector_id,
                id_tag,
            } => {
                if let Err(e) = self.start_transaction(connector_id, &id_tag).await {
                    error!("StartCharging failed: {}", e);
                }
                None
            }
            ChargePointCommand::StopCharging {
                transaction_id,
                reason,
            } => {
                if let Err(e) = self.stop_transaction(transaction_id, reason).await {
                    error!("StopCharging failed: {}", e);
                }
                None
            }
            ChargePointCommand::SendStatus { connector_id } => {
                if let Err(e) = self.send_status_notification(connector_id).await {
                    error!("StatusNotification failed: {}", e);
                }
                None
            }
            ChargePointCommand::SendHeartbeat => {
                if let Err(e) = self.heartbeat().await {
                    error!("Heartbeat failed: {}", e);
                }
                None
            }
            ChargePointCommand::SendBootNotification => match self.boot_notification().await {
                Ok(boot) if boot.status == RegistrationStatus::Accepted => {
                    Some(boot.interval.max(1))
                }
                Ok(_) => None,
                Err(e) => {
                    error!("BootNotification failed: {}", e);
                    None
                }
            },
            ChargePointCommand::Reboot => {
                // Simulated reboot: connectors were force-cleared by the
                // reset transition; re-register and report fresh status
                info!("Rebooting after hard reset");
                let interval = match self.boot_notification().await {
                    Ok(boot) if boot.status == RegistrationStatus::Accepted => {
                        Some(boot.interval.max(1))
                    }
                    _ => None,
                };
                for connector_id in self.state.connector_ids() {
                    if let Err(e) = self.send_status_notification(connector_id).await {
                        error!("StatusNotification failed: {}", e);
                    }
                }
                interval
            }
        }
    }

    /// Close the session and wait for the connection task to finish.
    pub async fn shutdown(self) {
        self.session.close();
        let _ = self.driver_handle.await;
    }
}
