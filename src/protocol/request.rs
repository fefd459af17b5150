//! Request and Response message types.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Call;

// ============================================================================
// Request
// ============================================================================

/// A call from a client.
///
/// Params are kept raw until [`Request::call`] so a malformed call can
/// still be answered under its id.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "method": "speculation.mayLaunchUrl",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id echoed in the response.
    pub id: RequestId,

    /// Method in `module.methodName` format.
    pub method: String,

    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(call: &Call) -> Self {
        Self::with_id(RequestId::generate(), call)
    }

    /// Creates a request with a specific id.
    #[must_use]
    pub fn with_id(id: RequestId, call: &Call) -> Self {
        let (method, params) = match serde_json::to_value(call) {
            Ok(Value::Object(mut map)) => (
                map.remove("method")
                    .and_then(|m| m.as_str().map(str::to_owned))
                    .unwrap_or_default(),
                map.remove("params").unwrap_or(Value::Null),
            ),
            _ => (String::new(), Value::Null),
        };
        Self { id, method, params }
    }

    /// Decodes the typed call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an unknown method or params that do
    /// not fit it.
    pub fn call(&self) -> Result<Call> {
        let params = match &self.params {
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(json!({ "method": self.method, "params": params }))
            .map_err(|e| Error::protocol(format!("{}: {e}", self.method)))
    }
}

// ============================================================================
// Response
// ============================================================================

/// The answer to a [`Request`].
///
/// # Format
///
/// Success:
/// ```json
/// { "id": "uuid", "type": "success", "result": true }
/// ```
///
/// Error:
/// ```json
/// { "id": "uuid", "type": "error", "error": "invalid params", "message": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Response type.
    #[serde(rename = "type")]
    pub response_type: ResponseType,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error code (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error message (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            response_type: ResponseType::Success,
            result: Some(result),
            error: None,
            message: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn error(id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            response_type: ResponseType::Error,
            result: None,
            error: Some(code.into()),
            message: Some(message.into()),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response_type == ResponseType::Success
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Extracts the result value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the response was an error.
    pub fn into_result(self) -> Result<Value> {
        match self.response_type {
            ResponseType::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseType::Error => {
                let code = self.error.unwrap_or_else(|| "unknown error".to_string());
                let message = self.message.unwrap_or_else(|| code.clone());
                Err(Error::protocol(message))
            }
        }
    }

    /// Gets a boolean result.
    ///
    /// Returns false for errors and non-boolean results.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> bool {
        self.result
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }

    /// Gets a u64 value from an object result.
    ///
    /// Returns 0 if key not found or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.result
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }
}

// ============================================================================
// ResponseType
// ============================================================================

/// Response type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::{SessionToken, Uid};

    #[test]
    fn test_request_carries_method_and_params() {
        let call = Call::Warmup { flags: 3 };
        let request = Request::new(&call);
        let json = serde_json::to_string(&request).expect("serialize");

        assert!(json.contains("connection.warmup"));
        assert!(json.contains("\"flags\":3"));
        assert_eq!(request.call().expect("call"), call);
    }

    #[test]
    fn test_unknown_method_is_protocol_error() {
        let json_str = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "method": "browser.explode",
            "params": {}
        }"#;

        let request: Request = serde_json::from_str(json_str).expect("parse");
        let err = request.call().expect_err("unknown method");
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_malformed_params_keep_id() {
        let json_str = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "method": "message.post",
            "params": { "session": "not a number" }
        }"#;

        let request: Request = serde_json::from_str(json_str).expect("parse");
        assert!(request.call().is_err());
        assert_eq!(request.id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_missing_params_default_to_empty() {
        let json_str = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "method": "session.new"
        }"#;

        let request: Request = serde_json::from_str(json_str).expect("parse");
        assert_eq!(request.call().expect("call"), Call::NewSession {});
    }

    #[test]
    fn test_hello_request() {
        let call = Call::Hello {
            uid: Uid::new(10_001),
            package: "com.example.app".to_string(),
        };
        let request = Request::with_id(RequestId::handshake(), &call);
        assert!(request.id.is_handshake());
        assert_eq!(request.call().expect("call"), call);
    }

    #[test]
    fn test_success_response_serialization() {
        let response = Response::success(RequestId::handshake(), json!(true));
        let json = serde_json::to_string(&response).expect("serialize");

        assert!(json.contains("\"type\":\"success\""));
        assert!(!json.contains("error"));
        assert!(response.as_bool());
    }

    #[test]
    fn test_error_response_into_result() {
        let response = Response::error(RequestId::generate(), "invalid params", "bad session");
        assert!(response.is_error());
        assert!(!response.as_bool());

        let err = response.into_result().expect_err("error response");
        assert!(err.to_string().contains("bad session"));
    }

    #[test]
    fn test_response_get_u64() {
        let token = SessionToken::next();
        let response = Response::success(RequestId::generate(), json!({ "session": token }));
        assert_eq!(response.get_u64("session"), token.as_u64());
        assert_eq!(response.get_u64("missing"), 0);
    }
}
