//! Uniform response envelope and body normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminated result of one logical API call.
///
/// Exactly one of `data`/`error` is meaningful, per the `success` flag.
/// Callers never see a raw transport error; every failure mode arrives as
/// `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// Decide whether a parsed 2xx body is already an envelope.
///
/// A body that is an object carrying a `success` key passes through
/// unchanged, including `success: false` bodies; anything else is wrapped
/// as a success payload. `detect_envelope = false` skips the shape check
/// and always wraps.
pub(crate) fn normalize(value: Value, detect_envelope: bool) -> ApiResponse<Value> {
    if detect_envelope
        && let Value::Object(fields) = &value
        && fields.contains_key("success")
        && let Ok(envelope) = serde_json::from_value::<ApiResponse<Value>>(value.clone())
    {
        return envelope;
    }
    ApiResponse::ok(value)
}

/// Best-effort extraction of a human-readable message from a failure body.
///
/// Backends answer with `detail` (FastAPI style), `error`, or `message`;
/// absent or malformed bodies yield `None` and the classifier's generic
/// message applies instead.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    for key in ["detail", "error", "message"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    None
}
