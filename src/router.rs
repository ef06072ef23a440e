//! Action routing
//!
//! Maps action names to handler capabilities, registered once at startup.
//! Dispatch turns an inbound Call into exactly one CallResult or CallError
//! frame; handler failures are contained here and never take the session
//! down.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::charge_point::ChargePointState;
use crate::error::ActionError;
use crate::protocol::OcppFrame;

// ── SessionContext ─────────────────────────────────────────────

/// What a handler may see of the session it runs in: the peer's identity
/// and the connector state machine. All state mutation goes through the
/// machine's transitions.
#[derive(Clone)]
pub struct SessionContext {
    pub charge_point_id: String,
    pub state: Arc<ChargePointState>,
}

// ── ActionHandler ──────────────────────────────────────────────

/// A registered capability for one action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &SessionContext, payload: Value) -> Result<Value, ActionError>;
}

/// Decode an inbound payload against the action's declared shape.
pub fn decode_payload<T: DeserializeOwned>(payload: Value) -> Result<T, ActionError> {
    serde_json::from_value(payload).map_err(|e| ActionError::FormationViolation(e.to_string()))
}

/// Encode a handler's typed response payload.
pub fn encode_response<T: Serialize>(response: &T) -> Result<Value, ActionError> {
    serde_json::to_value(response).map_err(|e| ActionError::Internal(e.to_string()))
}

// ── ActionRouter ───────────────────────────────────────────────

/// Startup-registered mapping from action name to handler.
#[derive(Default)]
pub struct ActionRouter {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRouter {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an action. Last registration wins.
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let action = action.into();
        debug!(action = action.as_str(), "Registered action handler");
        self.handlers.insert(action, handler);
    }

    /// Actions this router can dispatch.
    pub fn actions(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Dispatch an inbound Call and produce the reply frame.
    ///
    /// A handler failure (including a payload that does not match the
    /// action's shape) becomes a CallError; it never propagates further.
    pub async fn dispatch(
        &self,
        ctx: &SessionContext,
        unique_id: String,
        action: &str,
        payload: Value,
    ) -> OcppFrame {
        let handler = match self.handlers.get(action) {
            Some(handler) => handler,
            None => {
                warn!(
                    charge_point_id = ctx.charge_point_id.as_str(),
                    action, "No handler registered for action"
                );
                let err = ActionError::NotImplemented(action.to_string());
                return OcppFrame::error_response(unique_id, err.error_code(), err.to_string());
            }
        };

        match handler.handle(ctx, payload).await {
            Ok(result) => OcppFrame::CallResult {
                unique_id,
                payload: result,
            },
            Err(err) => {
                warn!(
                    charge_point_id = ctx.charge_point_id.as_str(),
                    action,
                    error = %err,
                    "Action handler failed"
                );
                OcppFrame::error_response(unique_id, err.error_code(), err.to_string())
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(&self, _ctx: &SessionContext, payload: Value) -> Result<Value, ActionError> {
            Ok(payload)
        }
    }

    struct Exploding;

    #[async_trait]
    impl ActionHandler for Exploding {
        async fn handle(&self, _ctx: &SessionContext, _payload: Value) -> Result<Value, ActionError> {
            Err(ActionError::Internal("meter read failed".into()))
        }
    }

    fn ctx() -> SessionContext {
        SessionContext {
            charge_point_id: "CP001".into(),
            state: Arc::new(ChargePointState::new()),
        }
    }

    #[tokio::test]
    async fn dispatch_to_registered_handler() {
        let mut router = ActionRouter::new();
        router.register("Echo", Arc::new(Echo));

        let frame = router
            .dispatch(&ctx(), "1".into(), "Echo", json!({"a": 1}))
            .await;
        assert_eq!(
            frame,
            OcppFrame::CallResult {
                unique_id: "1".into(),
                payload: json!({"a": 1}),
            }
        );
    }

    #[tokio::test]
    async fn unknown_action_yields_not_implemented() {
        let router = ActionRouter::new();
        let frame = router
            .dispatch(&ctx(), "1".into(), "NoSuchAction", json!({}))
            .await;
        match frame {
            OcppFrame::CallError { error_code, .. } => assert_eq!(error_code, "NotImplemented"),
            other => panic!("expected CallError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_failure_is_contained_as_internal_error() {
        let mut router = ActionRouter::new();
        router.register("Boom", Arc::new(Exploding));

        let frame = router.dispatch(&ctx(), "1".into(), "Boom", json!({})).await;
        match frame {
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(error_code, "InternalError");
                assert!(error_description.contains("meter read failed"));
            }
            other => panic!("expected CallError, got {other:?}"),
        }
    }
}
