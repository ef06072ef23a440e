//! StatusNotification handler

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{StatusNotificationRequest, StatusNotificationResponse};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

pub struct StatusNotificationHandler;

#[async_trait]
impl ActionHandler for StatusNotificationHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: StatusNotificationRequest = decode_payload(payload)?;

        info!(
            "[{}] StatusNotification - Connector: {}, Status: {:?}, Error: {:?}",
            ctx.charge_point_id, req.connector_id, req.status, req.error_code
        );

        // The response carries no status field, so a report the machine
        // refuses (e.g. Available while a transaction is open) is logged
        // and dropped rather than answered with an error.
        if let Err(e) = ctx.state.report_status(req.connector_id, req.status.into()) {
            warn!(
                "[{}] Ignoring status report for connector {}: {}",
                ctx.charge_point_id, req.connector_id, e
            );
        }

        encode_response(&StatusNotificationResponse {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge_point::{ChargePointState, ConnectorStatus};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn status_report_updates_the_connector() {
        let handler = StatusNotificationHandler;
        let ctx = SessionContext {
            charge_point_id: "CP001".into(),
            state: Arc::new(ChargePointState::new()),
        };
        handler
            .handle(
                &ctx,
                json!({"connectorId": 1, "errorCode": "NoError", "status": "Preparing"}),
            )
            .await
            .unwrap();
        assert_eq!(
            ctx.state.snapshot(1).unwrap().status,
            ConnectorStatus::Preparing
        );
    }

    #[tokio::test]
    async fn available_report_clears_a_fault() {
        let handler = StatusNotificationHandler;
        let state = Arc::new(ChargePointState::new());
        state.with_connector(1, |c| c.set_faulted());
        let ctx = SessionContext {
            charge_point_id: "CP001".into(),
            state,
        };
        handler
            .handle(
                &ctx,
                json!({"connectorId": 1, "errorCode": "NoError", "status": "Available"}),
            )
            .await
            .unwrap();
        assert_eq!(
            ctx.state.snapshot(1).unwrap().status,
            ConnectorStatus::Available
        );
    }
}
