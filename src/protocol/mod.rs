//! OCPP-J protocol layer
//!
//! The transport envelope ([`frame`]) is identical across OCPP versions;
//! the action payloads ([`messages`]) and error vocabulary ([`error_code`])
//! are the OCPP 1.6 set this engine ships handlers for.

pub mod error_code;
pub mod frame;
pub mod messages;

pub use error_code::ErrorCode;
pub use frame::{FrameError, OcppFrame};

/// OCPP 1.6 action names as they appear on the wire.
pub mod action {
    // Charge point initiated (CP -> CS)
    pub const AUTHORIZE: &str = "Authorize";
    pub const BOOT_NOTIFICATION: &str = "BootNotification";
    pub const DATA_TRANSFER: &str = "DataTransfer";
    pub const DIAGNOSTICS_STATUS_NOTIFICATION: &str = "DiagnosticsStatusNotification";
    pub const FIRMWARE_STATUS_NOTIFICATION: &str = "FirmwareStatusNotification";
    pub const HEARTBEAT: &str = "Heartbeat";
    pub const METER_VALUES: &str = "MeterValues";
    pub const START_TRANSACTION: &str = "StartTransaction";
    pub const STATUS_NOTIFICATION: &str = "StatusNotification";
    pub const STOP_TRANSACTION: &str = "StopTransaction";

    // Central system initiated (CS -> CP)
    pub const CHANGE_AVAILABILITY: &str = "ChangeAvailability";
    pub const CHANGE_CONFIGURATION: &str = "ChangeConfiguration";
    pub const CLEAR_CACHE: &str = "ClearCache";
    pub const GET_CONFIGURATION: &str = "GetConfiguration";
    pub const GET_LOCAL_LIST_VERSION: &str = "GetLocalListVersion";
    pub const REMOTE_START_TRANSACTION: &str = "RemoteStartTransaction";
    pub const REMOTE_STOP_TRANSACTION: &str = "RemoteStopTransaction";
    pub const RESET: &str = "Reset";
    pub const SEND_LOCAL_LIST: &str = "SendLocalList";
    pub const TRIGGER_MESSAGE: &str = "TriggerMessage";
    pub const UNLOCK_CONNECTOR: &str = "UnlockConnector";
}
