//! Authorize handler

use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use serde_json::Value;

use crate::error::ActionError;
use crate::protocol::messages::{AuthorizeRequest, AuthorizeResponse, IdTagInfo};
use crate::router::{decode_payload, encode_response, ActionHandler, SessionContext};

use super::AuthorizationPolicy;

pub struct AuthorizeHandler {
    policy: Arc<dyn AuthorizationPolicy>,
}

impl AuthorizeHandler {
    pub fn new(policy: Arc<dyn AuthorizationPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ActionHandler for AuthorizeHandler {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
        let req: AuthorizeRequest = decode_payload(payload)?;

        let status = self.policy.authorize(&req.id_tag).await;
        info!(
            "[{}] Authorize - IdTag: {}, status: {:?}",
            ctx.charge_point_id, req.id_tag, status
        );

        encode_response(&AuthorizeResponse {
            id_tag_info: IdTagInfo::with_status(status),
        })
    }
}
