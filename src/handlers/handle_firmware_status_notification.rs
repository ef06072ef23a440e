//! FirmwareStatusNotification handler

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

pub struct FirmwareStatusNotificationHandler;

#[async_trait]
impl ActionHandler for FirmwareStatusNotificationHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: FirmwareStatusNotificationRequest = decode_payload(payload)?;
        info!(
            "[{}] FirmwareStatusNotification - Status: {:?}",
            ctx.charge_point_id, req.status
        );
        encode_response(&FirmwareStatusNotificationResponse {})
    }
}
