//! StartTransaction handler

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;

use crate::charge_point::{TransactionIdAllocator, TransitionRejected};
use crate::error::ActionError;
use crate::protocol::messages::{
    AuthorizationStatus, IdTagInfo, StartTransactionRequest, StartTransactionResponse,
};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

use super::AuthorizationPolicy;

pub struct StartTransactionHandler {
    policy: Arc<dyn AuthorizationPolicy>,
    transactions: Arc<TransactionIdAllocator>,
}

impl StartTransactionHandler {
    pub fn new(
        policy: Arc<dyn AuthorizationPolicy>,
        transactions: Arc<TransactionIdAllocator>,
    ) -> Self {
        Self {
            policy,
            transactions,
        }
    }
}

#[async_trait]
impl ActionHandler for StartTransactionHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: StartTransactionRequest = decode_payload(payload)?;

        info!(
            "[{}] StartTransaction - Connector: {}, IdTag: {}, MeterStart: {}",
            ctx.charge_point_id, req.connector_id, req.id_tag, req.meter_start
        );

        let auth = self.policy.authorize(&req.id_tag).await;
        if auth != AuthorizationStatus::Accepted {
            warn!(
                "[{}] StartTransaction denied for id tag {}: {:?}",
                ctx.charge_point_id, req.id_tag, auth
            );
            return encode_response(&StartTransactionResponse {
                transaction_id: 0,
                id_tag_info: IdTagInfo::with_status(auth),
            });
        }

        let transaction_id = self.transactions.next_id();
        match ctx
            .state
            .begin_transaction(req.connector_id, transaction_id, req.meter_start)
        {
            Ok(()) => {
                info!(
                    "[{}] Transaction {} started on connector {}",
                    ctx.charge_point_id, transaction_id, req.connector_id
                );
                encode_response(&StartTransactionResponse {
                    transaction_id,
                    id_tag_info: IdTagInfo::accepted(),
                })
            }
            Err(TransitionRejected::TransactionInProgress {
                transaction_id: existing,
                ..
            }) => {
                warn!(
                    "[{}] StartTransaction rejected: connector {} already runs transaction {}",
                    ctx.charge_point_id, req.connector_id, existing
                );
                encode_response(&StartTransactionResponse {
                    transaction_id: existing,
                    id_tag_info: IdTagInfo::with_status(AuthorizationStatus::ConcurrentTx),
                })
            }
            Err(e) => {
                warn!(
                    "[{}] StartTransaction rejected on connector {}: {}",
                    ctx.charge_point_id, req.connector_id, e
                );
                encode_response(&StartTransactionResponse {
                    transaction_id: 0,
                    id_tag_info: IdTagInfo::with_status(AuthorizationStatus::Blocked),
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

    fn handler() -> StartTransactionHandler {
        StartTransactionHandler::new(Arc::new(AcceptAll), Arc::new(TransactionIdAllocator::new()))
    }

    fn ctx() -> SessionContext {
        SessionContext {
            charge_point_id: "CP001".into(),
            state: Arc::new(ChargePointState::new()),
        }
    }

    fn start_req() -> Value {
        json!({
            "connectorId": 1,
            "idTag": "TAG1",
            "meterStart": 0,
            "timestamp": "2025-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn start_assigns_fresh_transaction_id() {
        let handler = handler();
        let ctx = ctx();
        let result = handler.handle(&ctx, start_req()).await.unwrap();
        assert_eq!(result["transactionId"], 1);
        assert_eq!(result["idTagInfo"]["status"], "Accepted");
        assert_eq!(
            ctx.state.snapshot(1).unwrap().status,
            ConnectorStatus::Charging
        );
    }

    #[tokio::test]
    async fn double_start_answers_concurrent_tx_and_keeps_the_first_id() {
        let handler = handler();
        let ctx = ctx();
        let first = handler.handle(&ctx, start_req()).await.unwrap();
        let second = handler.handle(&ctx, start_req()).await.unwrap();

        assert_eq!(second["idTagInfo"]["status"], "ConcurrentTx");
        assert_eq!(second["transactionId"], first["transactionId"]);
        assert_eq!(
            ctx.state.snapshot(1).unwrap().transaction_id,
            Some(first["transactionId"].as_i64().unwrap() as i32)
        );
    }

    #[tokio::test]
    async fn each_accepted_start_gets_its_own_id() {
        let handler = handler();
        let ctx = ctx();
        let a = handler.handle(&ctx, start_req()).await.unwrap();
        let mut req = start_req();
        req["connectorId"] = json!(2);
        let b = handler.handle(&ctx, req).await.unwrap();
        assert_ne!(a["transactionId"], b["transactionId"]);
    }
}
