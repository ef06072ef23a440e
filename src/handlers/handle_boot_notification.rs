//! BootNotification handler

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{
    BootNotificationRequest, BootNotificationResponse, RegistrationStatus,
};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

pub struct BootNotificationHandler {
    /// Heartbeat interval in seconds handed to the charge point.
    heartbeat_interval: u32,
}

impl BootNotificationHandler {
    pub fn new(heartbeat_interval: u32) -> Self {
        Self { heartbeat_interval }
    }
}

#[async_trait]
impl ActionHandler for BootNotificationHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: BootNotificationRequest = decode_payload(payload)?;

        info!(
            "[{}] BootNotification - Vendor: {}, Model: {}, Firmware: {}",
            ctx.charge_point_id,
            req.charge_point_vendor,
            req.charge_point_model,
            req.firmware_version.as_deref().unwrap_or("unknown")
        );

        encode_response(&BootNotificationResponse {
            current_time: Utc::now(),
            interval: self.heartbeat_interval,
            status: RegistrationStatus::Accepted,
        })
    }
}
