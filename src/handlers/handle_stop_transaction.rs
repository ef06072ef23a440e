//! StopTransaction handler

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{
    AuthorizationStatus, IdTagInfo, StopTransactionRequest, StopTransactionResponse,
};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

use super::AuthorizationPolicy;

pub struct StopTransactionHandler {
    policy: Arc<dyn AuthorizationPolicy>,
}

impl StopTransactionHandler {
    pub fn new(policy: Arc<dyn AuthorizationPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ActionHandler for StopTransactionHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: StopTransactionRequest = decode_payload(payload)?;

        info!(
            "[{}] StopTransaction - Transaction: {}, MeterStop: {}, Reason: {:?}",
            ctx.charge_point_id, req.transaction_id, req.meter_stop, req.reason
        );

        let auth = match &req.id_tag {
            Some(tag) => self.policy.authorize(tag).await,
            None => AuthorizationStatus::Accepted,
        };

        match ctx.state.end_transaction(req.transaction_id) {
            Ok(connector_id) => {
                info!(
                    "[{}] Transaction {} stopped on connector {}",
                    ctx.charge_point_id, req.transaction_id, connector_id
                );
                encode_response(&StopTransactionResponse {
                    id_tag_info: Some(IdTagInfo::with_status(auth)),
                })
            }
            Err(e) => {
                warn!(
                    "[{}] StopTransaction rejected: {}",
                    ctx.charge_point_id, e
                );
                encode_response(&StopTransactionResponse {
                    id_tag_info: Some(IdTagInfo::with_status(AuthorizationStatus::Invalid)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge_point::{ChargePointState, ConnectorStatus};
    use crate::handlers::AcceptAll;
    use serde_json::json;

    fn ctx_with_open_transaction() -> SessionContext {
        let state = Arc::new(ChargePointState::new());
        state.begin_transaction(1, 42, 100).unwrap();
        SessionContext {
            charge_point_id: "CP001".into(),
            state,
        }
    }

    fn stop_req(transaction_id: i32) -> Value {
        json!({
            "transactionId": transaction_id,
            "meterStop": 250,
            "timestamp": "2025-01-01T01:00:00Z"
        })
    }

    #[tokio::test]
    async fn matching_stop_closes_the_transaction() {
        let handler = StopTransactionHandler::new(Arc::new(AcceptAll));
        let ctx = ctx_with_open_transaction();
        let result = handler.handle(&ctx, stop_req(42)).await.unwrap();

        assert_eq!(result["idTagInfo"]["status"], "Accepted");
        let record = ctx.state.snapshot(1).unwrap();
        assert_eq!(record.status, ConnectorStatus::Available);
        assert_eq!(record.transaction_id, None);
    }

    #[tokio::test]
    async fn mismatched_stop_is_rejected_and_charging_continues() {
        let handler = StopTransactionHandler::new(Arc::new(AcceptAll));
        let ctx = ctx_with_open_transaction();
        let result = handler.handle(&ctx, stop_req(99)).await.unwrap();

        assert_eq!(result["idTagInfo"]["status"], "Invalid");
        let record = ctx.state.snapshot(1).unwrap();
        assert_eq!(record.status, ConnectorStatus::Charging);
        assert_eq!(record.transaction_id, Some(42));
    }
}
