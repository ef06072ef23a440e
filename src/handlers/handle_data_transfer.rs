//! DataTransfer handler

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{DataTransferRequest, DataTransferResponse, DataTransferStatus};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

/// Vendor-specific payloads pass through unexamined; a deployment with
/// actual vendor logic registers its own handler for this action.
pub struct DataTransferHandler;

#[async_trait]
impl ActionHandler for DataTransferHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: DataTransferRequest = decode_payload(payload)?;

        info!(
            "[{}] DataTransfer - Vendor: {}, MessageId: {:?}",
            ctx.charge_point_id, req.vendor_id, req.message_id
        );

        encode_response(&DataTransferResponse {
            status: DataTransferStatus::Accepted,
            data: None,
        })
    }
}
