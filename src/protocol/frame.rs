//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) transport envelope:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Array length and the first-element tag fully determine the variant;
//! anything else is malformed. Payload contents are never inspected here —
//! schema validation against the action catalog happens at dispatch time.

use serde_json::Value;
use thiserror::Error;

use super::error_code::ErrorCode;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

const CALL_ARITY: usize = 4;
const CALL_RESULT_ARITY: usize = 3;
const CALL_ERROR_ARITY: usize = 5;

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame (version-agnostic transport envelope).
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult {
        unique_id: String,
        payload: Value,
    },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FrameError::MalformedFrame(e.to_string()))?;

        let arr = match value {
            Value::Array(arr) => arr,
            other => {
                return Err(FrameError::MalformedFrame(format!(
                    "expected a JSON array, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let msg_type = arr
            .first()
            .and_then(|v| v.as_u64())
            .ok_or(FrameError::UnknownMessageTypeId(None))?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(arr),
            other => Err(FrameError::UnknownMessageTypeId(Some(other))),
        }
    }

    fn parse_call(arr: Vec<Value>) -> Result<Self, FrameError> {
        check_arity(MSG_TYPE_CALL, CALL_ARITY, arr.len())?;

        let unique_id = parse_unique_id(&arr[1])?;
        let action = arr[2]
            .as_str()
            .ok_or_else(|| FrameError::MalformedFrame("action must be a string".into()))?
            .to_string();
        let payload = arr[3].clone();

        Ok(Self::Call {
            unique_id,
            action,
            payload,
        })
    }

    fn parse_call_result(arr: Vec<Value>) -> Result<Self, FrameError> {
        check_arity(MSG_TYPE_CALL_RESULT, CALL_RESULT_ARITY, arr.len())?;

        let unique_id = parse_unique_id(&arr[1])?;
        let payload = arr[2].clone();

        Ok(Self::CallResult { unique_id, payload })
    }

    fn parse_call_error(arr: Vec<Value>) -> Result<Self, FrameError> {
        check_arity(MSG_TYPE_CALL_ERROR, CALL_ERROR_ARITY, arr.len())?;

        let unique_id = parse_unique_id(&arr[1])?;
        let error_code = arr[2]
            .as_str()
            .ok_or_else(|| FrameError::MalformedFrame("errorCode must be a string".into()))?
            .to_string();
        let error_description = arr[3]
            .as_str()
            .ok_or_else(|| {
                FrameError::MalformedFrame("errorDescription must be a string".into())
            })?
            .to_string();
        let error_details = arr[4].clone();

        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        })
    }

    /// Best-effort recovery of the unique id from a frame that failed to
    /// parse, so a `CallError` reply can still be addressed to it.
    pub fn recover_unique_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        let id = value.as_array()?.get(1)?.as_str()?;
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to a JSON string.
    pub fn serialize(&self) -> String {
        let arr: Value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        // serde_json::to_string on a Value never fails
        serde_json::to_string(&arr).unwrap()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Create a `CallError` response for a given unique ID.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.as_str().to_string(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    /// Returns `true` if this is a `Call` frame.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Returns `true` if this is a `CallResult` frame.
    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    /// Returns `true` if this is a `CallError` frame.
    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

fn check_arity(msg_type: u64, expected: usize, got: usize) -> Result<(), FrameError> {
    if got != expected {
        return Err(FrameError::ArityMismatch {
            msg_type,
            expected,
            got,
        });
    }
    Ok(())
}

fn parse_unique_id(value: &Value) -> Result<String, FrameError> {
    match value.as_str() {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(FrameError::InvalidUniqueId),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
///
/// All of these are protocol-fatal for the connection: the peer is not
/// speaking OCPP-J and the link should be closed (after an addressed
/// `FormationViolation` reply when a unique id could be recovered).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown message type id: {}", .0.map(|t| t.to_string()).unwrap_or_else(|| "not an integer".into()))]
    UnknownMessageTypeId(Option<u64>),

    #[error("message type {msg_type} requires {expected} elements, got {got}")]
    ArityMismatch {
        msg_type: u64,
        expected: usize,
        got: usize,
    },

    #[error("uniqueId must be a non-empty string")]
    InvalidUniqueId,
}
