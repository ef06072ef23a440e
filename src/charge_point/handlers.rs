//! Charge-point-side command handlers
//!
//! The client's answers to central-system commands. Handlers run inside the
//! session's read loop, so they must reply before any follow-up exchange of
//! their own may start (one unanswered Call per direction) — anything that
//! needs an outbound call (StartTransaction after a RemoteStart, a status
//! report after an availability change) is queued as a
//! [`ChargePointCommand`] for the client driver to perform afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{info, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ActionError;
use crate::protocol::action;
use crate::protocol::messages::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse, ChangeConfigurationRequest,
    ChangeConfigurationResponse, ClearCacheRequest, ClearCacheResponse, ClearCacheStatus,
    ConfigurationStatus, GetConfigurationRequest, GetConfigurationResponse,
    GetLocalListVersionRequest, GetLocalListVersionResponse, KeyValue, MessageTrigger, Reason,
    RemoteStartStopStatus, RemoteStartTransactionRequest, RemoteStartTransactionResponse,
    RemoteStopTransactionRequest, RemoteStopTransactionResponse, ResetRequest, ResetResponse,
    ResetStatus, ResetType, SendLocalListRequest, SendLocalListResponse, TriggerMessageRequest,
    TriggerMessageResponse, TriggerMessageStatus, UnlockConnectorRequest,
    UnlockConnectorResponse, UnlockStatus, UpdateStatus,
};
use crate::router::{decode_payload, encode_response, ActionHandler, ActionRouter, SessionContext};

use super::state::ConnectorStatus;

// ── Driver commands ────────────────────────────────────────────

/// Follow-up work a handler queues for the client driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargePointCommand {
    StartCharging { connector_id: u32, id_tag: String },
    StopCharging { transaction_id: i32, reason: Reason },
    SendStatus { connector_id: u32 },
    SendBootNotification,
    SendHeartbeat,
    Reboot,
}

pub type CommandSink = mpsc::UnboundedSender<ChargePointCommand>;

fn enqueue(sink: &CommandSink, command: ChargePointCommand) {
    if sink.send(command).is_err() {
        warn!("Client driver gone, dropping queued command");
    }
}

// ── Configuration store ────────────────────────────────────────

/// In-memory configuration keys reported via GetConfiguration. Not
/// persisted; a restart returns to the defaults.
pub struct ConfigurationStore {
    entries: DashMap<String, String>,
}

impl ConfigurationStore {
    pub fn new(heartbeat_interval: u32) -> Arc<Self> {
        let entries = DashMap::new();
        entries.insert("HeartbeatInterval".to_string(), heartbeat_interval.to_string());
        entries.insert("NumberOfConnectors".to_string(), "1".to_string());
        Arc::new(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn all(&self) -> Vec<KeyValue> {
        self.entries
            .iter()
            .map(|e| KeyValue {
                key: e.key().clone(),
                readonly: false,
                value: Some(e.value().clone()),
            })
            .collect()
    }
}

// ── Handlers ───────────────────────────────────────────────────

struct ChangeAvailabilityHandler {
    sink: CommandSink,
}

#[async_trait]
impl ActionHandler for ChangeAvailabilityHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: ChangeAvailabilityRequest = decode_payload(payload)?;
        let status = ctx.state.change_availability(req.connector_id, req.kind);
        info!(
            "ChangeAvailability for connector {} to {:?}: {:?}",
            req.connector_id, req.kind, status
        );
        enqueue(
            &self.sink,
            ChargePointCommand::SendStatus {
                connector_id: req.connector_id,
            },
        );
        encode_response(&ChangeAvailabilityResponse { status })
    }
}

struct ChangeConfigurationHandler {
    store: Arc<ConfigurationStore>,
}

#[async_trait]
impl ActionHandler for ChangeConfigurationHandler {
    async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: ChangeConfigurationRequest = decode_payload(payload)?;
        info!("ChangeConfiguration: {} = {}", req.key, req.value);
        self.store.set(&req.key, &req.value);
        encode_response(&ChangeConfigurationResponse {
            status: ConfigurationStatus::Accepted,
        })
    }
}

struct ClearCacheHandler;

#[async_trait]
impl ActionHandler for ClearCacheHandler {
    async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let _req: ClearCacheRequest = decode_payload(payload)?;
        info!("ClearCache requested");
        encode_response(&ClearCacheResponse {
            status: ClearCacheStatus::Accepted,
        })
    }
}

struct GetConfigurationHandler {
    store: Arc<ConfigurationStore>,
}

#[async_trait]
impl ActionHandler for GetConfigurationHandler {
    async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: GetConfigurationRequest = decode_payload(payload)?;
        info!("GetConfiguration for keys: {:?}", req.key);

        let (known, unknown) = match req.key {
            None => (self.store.all(), Vec::new()),
            Some(keys) => {
                let mut known = Vec::new();
                let mut unknown = Vec::new();
                for key in keys {
                    match self.store.get(&key) {
                        Some(value) => known.push(KeyValue {
                            key,
                            readonly: false,
                            value: Some(value),
                        }),
                        None => unknown.push(key),
                    }
                }
                (known, unknown)
            }
        };

        encode_response(&GetConfigurationResponse {
            configuration_key: Some(known),
            unknown_key: if unknown.is_empty() {
                None
            } else {
                Some(unknown)
            },
        })
    }
}

struct GetLocalListVersionHandler;

#[async_trait]
impl ActionHandler for GetLocalListVersionHandler {
    async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let _req: GetLocalListVersionRequest = decode_payload(payload)?;
        encode_response(&GetLocalListVersionResponse { list_version: 1 })
    }
}

struct RemoteStartTransactionHandler {
    sink: CommandSink,
}

#[async_trait]
impl ActionHandler for RemoteStartTransactionHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: RemoteStartTransactionRequest = decode_payload(payload)?;
        let connector_id = req.connector_id.unwrap_or(1);
        info!(
            "RemoteStartTransaction for id_tag {} on connector {}",
            req.id_tag, connector_id
        );

        // An untouched connector is Available by construction
        let ready = ctx
            .state
            .snapshot(connector_id)
            .map(|r| {
                matches!(
                    r.status,
                    ConnectorStatus::Available | ConnectorStatus::Preparing
                )
            })
            .unwrap_or(true);

        let status = if ready {
            enqueue(
                &self.sink,
                ChargePointCommand::StartCharging {
                    connector_id,
                    id_tag: req.id_tag,
                },
            );
            RemoteStartStopStatus::Accepted
        } else {
            warn!(
                "RemoteStartTransaction rejected, connector {} not available",
                connector_id
            );
            RemoteStartStopStatus::Rejected
        };

        encode_response(&RemoteStartTransactionResponse { status })
    }
}

struct RemoteStopTransactionHandler {
    sink: CommandSink,
}

#[async_trait]
impl ActionHandler for RemoteStopTransactionHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: RemoteStopTransactionRequest = decode_payload(payload)?;
        info!("RemoteStopTransaction for transaction {}", req.transaction_id);

        let status = if ctx.state.find_transaction(req.transaction_id).is_some() {
            enqueue(
                &self.sink,
                ChargePointCommand::StopCharging {
                    transaction_id: req.transaction_id,
                    reason: Reason::Remote,
                },
            );
            RemoteStartStopStatus::Accepted
        } else {
            warn!(
                "RemoteStopTransaction rejected, no open transaction {}",
                req.transaction_id
            );
            RemoteStartStopStatus::Rejected
        };

        encode_response(&RemoteStopTransactionResponse { status })
    }
}

struct ResetHandler {
    sink: CommandSink,
}

#[async_trait]
impl ActionHandler for ResetHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: ResetRequest = decode_payload(payload)?;
        info!("Received Reset request of type {:?}", req.kind);

        let status = ctx.state.reset(req.kind);
        if status == ResetStatus::Accepted && req.kind == ResetType::Hard {
            enqueue(&self.sink, ChargePointCommand::Reboot);
        }
        encode_response(&ResetResponse { status })
    }
}

struct SendLocalListHandler;

#[async_trait]
impl ActionHandler for SendLocalListHandler {
    async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: SendLocalListRequest = decode_payload(payload)?;
        info!(
            "SendLocalList version {}, type {:?}, {} entries",
            req.list_version,
            req.update_type,
            req.local_authorization_list.map(|l| l.len()).unwrap_or(0)
        );
        encode_response(&SendLocalListResponse {
            status: UpdateStatus::Accepted,
        })
    }
}

struct TriggerMessageHandler {
    sink: CommandSink,
}

#[async_trait]
impl ActionHandler for TriggerMessageHandler {
    async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: TriggerMessageRequest = decode_payload(payload)?;
        info!("TriggerMessage for {:?}", req.requested_message);

        let status = match req.requested_message {
            MessageTrigger::BootNotification => {
                enqueue(&self.sink, ChargePointCommand::SendBootNotification);
                TriggerMessageStatus::Accepted
            }
            MessageTrigger::Heartbeat => {
                enqueue(&self.sink, ChargePointCommand::SendHeartbeat);
                TriggerMessageStatus::Accepted
            }
            MessageTrigger::StatusNotification => {
                enqueue(
                    &self.sink,
                    ChargePointCommand::SendStatus {
                        connector_id: req.connector_id.unwrap_or(1),
                    },
                );
                TriggerMessageStatus::Accepted
            }
            _ => TriggerMessageStatus::NotImplemented,
        };

        encode_response(&TriggerMessageResponse { status })
    }
}

struct UnlockConnectorHandler {
    sink: CommandSink,
}

#[async_trait]
impl ActionHandler for UnlockConnectorHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: UnlockConnectorRequest = decode_payload(payload)?;
        info!("UnlockConnector for {}", req.connector_id);

        let record = ctx.state.snapshot(req.connector_id);
        let status = match record {
            Some(r) if r.status == ConnectorStatus::Faulted => UnlockStatus::UnlockFailed,
            Some(r) => {
                // Unlocking mid-charge stops the transaction first
                if let Some(transaction_id) = r.transaction_id {
                    enqueue(
                        &self.sink,
                        ChargePointCommand::StopCharging {
                            transaction_id,
                            reason: Reason::UnlockCommand,
                        },
                    );
                }
                UnlockStatus::Unlocked
            }
            None => UnlockStatus::Unlocked,
        };

        encode_response(&UnlockConnectorResponse { status })
    }
}

// ── Router assembly ────────────────────────────────────────────

/// Build the charge-point router with every central-system-initiated
/// action registered.
pub fn charge_point_router(sink: CommandSink, store: Arc<ConfigurationStore>) -> ActionRouter {
    let mut router = ActionRouter::new();

    router.register(
        action::CHANGE_AVAILABILITY,
        Arc::new(ChangeAvailabilityHandler { sink: sink.clone() }),
    );
    router.register(
        action::CHANGE_CONFIGURATION,
        Arc::new(ChangeConfigurationHandler {
            store: store.clone(),
        }),
    );
    router.register(action::CLEAR_CACHE, Arc::new(ClearCacheHandler));
    router.register(
        action::GET_CONFIGURATION,
        Arc::new(GetConfigurationHandler { store }),
    );
    router.register(
        action::GET_LOCAL_LIST_VERSION,
        Arc::new(GetLocalListVersionHandler),
    );
    router.register(
        action::REMOTE_START_TRANSACTION,
        Arc::new(RemoteStartTransactionHandler { sink: sink.clone() }),
    );
    router.register(
        action::REMOTE_STOP_TRANSACTION,
        Arc::new(RemoteStopTransactionHandler { sink: sink.clone() }),
    );
    router.register(action::RESET, Arc::new(ResetHandler { sink: sink.clone() }));
    router.register(action::SEND_LOCAL_LIST, Arc::new(SendLocalListHandler));
    router.register(
        action::TRIGGER_MESSAGE,
        Arc::new(TriggerMessageHandler { sink: sink.clone() }),
    );
    router.register(
        action::UNLOCK_CONNECTOR,
        Arc::new(UnlockConnectorHandler { sink }),
    );

    router
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge_point::ChargePointState;
    use serde_json::json;

    fn setup() -> (
        ActionRouter,
        SessionContext,
        mpsc::UnboundedReceiver<ChargePointCommand>,
    ) {
        let (sink, rx) = mpsc::unbounded_channel();
        let router = charge_point_router(sink, ConfigurationStore::new(60));
        let ctx = SessionContext {
            charge_point_id: "CP001".into(),
            state: Arc::new(ChargePointState::new()),
        };
        (router, ctx, rx)
    }

    #[tokio::test]
    async fn remote_start_queues_a_charge_cycle() {
        let (router, ctx, mut rx) = setup();
        let frame = router
            .dispatch(
                &ctx,
                "1".into(),
                action::REMOTE_START_TRANSACTION,
                json!({"idTag": "TAG1"}),
            )
            .await;
        match frame {
            crate::protocol::OcppFrame::CallResult { payload, .. } => {
                assert_eq!(payload["status"], "Accepted")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            ChargePointCommand::StartCharging {
                connector_id: 1,
                id_tag: "TAG1".into()
            }
        );
    }

    #[tokio::test]
    async fn remote_stop_of_unknown_transaction_is_rejected() {
        let (router, ctx, mut rx) = setup();
        let frame = router
            .dispatch(
                &ctx,
                "1".into(),
                action::REMOTE_STOP_TRANSACTION,
                json!({"transactionId": 99}),
            )
            .await;
        match frame {
            crate::protocol::OcppFrame::CallResult { payload, .. } => {
                assert_eq!(payload["status"], "Rejected")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn soft_reset_mid_charge_is_rejected() {
        let (router, ctx, mut rx) = setup();
        ctx.state.begin_transaction(1, 5, 0).unwrap();
        let frame = router
            .dispatch(&ctx, "1".into(), action::RESET, json!({"type": "Soft"}))
            .await;
        match frame {
            crate::protocol::OcppFrame::CallResult { payload, .. } => {
                assert_eq!(payload["status"], "Rejected")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.state.snapshot(1).unwrap().transaction_id, Some(5));
    }

    #[tokio::test]
    async fn hard_reset_queues_a_reboot() {
        let (router, ctx, mut rx) = setup();
        ctx.state.begin_transaction(1, 5, 0).unwrap();
        let frame = router
            .dispatch(&ctx, "1".into(), action::RESET, json!({"type": "Hard"}))
            .await;
        match frame {
            crate::protocol::OcppFrame::CallResult { payload, .. } => {
                assert_eq!(payload["status"], "Accepted")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), ChargePointCommand::Reboot);
        assert_eq!(ctx.state.snapshot(1).unwrap().transaction_id, None);
    }

    #[tokio::test]
    async fn get_configuration_splits_known_and_unknown_keys() {
        let (router, ctx, _rx) = setup();
        let frame = router
            .dispatch(
                &ctx,
                "1".into(),
                action::GET_CONFIGURATION,
                json!({"key": ["HeartbeatInterval", "NoSuchKey"]}),
            )
            .await;
        match frame {
            crate::protocol::OcppFrame::CallResult { payload, .. } => {
                assert_eq!(payload["configurationKey"][0]["key"], "HeartbeatInterval");
                assert_eq!(payload["configurationKey"][0]["value"], "60");
                assert_eq!(payload["unknownKey"][0], "NoSuchKey");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
