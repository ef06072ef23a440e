//! DiagnosticsStatusNotification handler

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

pub struct DiagnosticsStatusNotificationHandler;

#[async_trait]
impl ActionHandler for DiagnosticsStatusNotificationHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: DiagnosticsStatusNotificationRequest = decode_payload(payload)?;
        info!(
            "[{}] DiagnosticsStatusNotification - Status: {:?}",
            ctx.charge_point_id, req.status
        );
        encode_response(&DiagnosticsStatusNotificationResponse {})
    }
}
