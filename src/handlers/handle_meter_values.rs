//! MeterValues handler

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{MeterValuesRequest, MeterValuesResponse};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

pub struct MeterValuesHandler;

#[async_trait]
impl ActionHandler for MeterValuesHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: MeterValuesRequest = decode_payload(payload)?;

        let samples: usize = req.meter_value.iter().map(|mv| mv.sampled_value.len()).sum();
        info!(
            "[{}] MeterValues - Connector: {}, Transaction: {:?}, {} sample(s)",
            ctx.charge_point_id, req.connector_id, req.transaction_id, samples
        );

        encode_response(&MeterValuesResponse {})
    }
}
