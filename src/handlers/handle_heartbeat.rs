//! Heartbeat handler

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{HeartbeatRequest, HeartbeatResponse};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

pub struct HeartbeatHandler;

#[async_trait]
impl ActionHandler for HeartbeatHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let _req: HeartbeatRequest = decode_payload(payload)?;
        info!("[{}] Heartbeat", ctx.charge_point_id);

        encode_response(&HeartbeatResponse {
            current_time: Utc::now(),
        })
    }
}
