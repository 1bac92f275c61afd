//! Core JSON-RPC 2.0 protocol types
//!
//! Request, response and error objects as exchanged over the framed
//! transports, plus the mapping from [`CloudwrightError`] to error objects.

use serde::{Deserialize, Serialize};

use crate::CloudwrightError;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Request ID (string or number); absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 Error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Standard JSON-RPC 2.0 error codes plus the server's application codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const TRANSPORT_ERROR: i32 = -32001;
    pub const REQUEST_NOT_FOUND: i32 = -32003;
    pub const CONFIGURATION_ERROR: i32 = -32014;
    pub const INSUFFICIENT_CONTEXT: i32 = -32020;
    pub const INVALID_STATE: i32 = -32021;
    pub const UNKNOWN_RESOURCE: i32 = -32022;
    pub const OVERLOADED: i32 = -32023;
    pub const STORE_UNAVAILABLE: i32 = -32024;
    pub const UNAUTHORIZED: i32 = -32025;
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Check if this is a notification (no response expected)
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate the request structure
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        if self.jsonrpc != "2.0" {
            return Err(JsonRpcError::custom(
                error_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version".to_string(),
                None,
            ));
        }

        if self.method.is_empty() {
            return Err(JsonRpcError::custom(
                error_codes::INVALID_REQUEST,
                "Method name cannot be empty".to_string(),
                None,
            ));
        }

        if self.method.starts_with("rpc.") {
            return Err(JsonRpcError::custom(
                error_codes::INVALID_REQUEST,
                "Method names starting with 'rpc.' are reserved".to_string(),
                None,
            ));
        }

        if let Some(params) = &self.params {
            if !(params.is_object() || params.is_array() || params.is_null()) {
                return Err(JsonRpcError::custom(
                    error_codes::INVALID_REQUEST,
                    "params must be an object or array".to_string(),
                    None,
                ));
            }
        }

        Ok(())
    }
}

impl JsonRpcResponse {
    pub fn success(result: serde_json::Value, id: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcError, id: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::error(
            JsonRpcError::custom(
                error_codes::PARSE_ERROR,
                "Parse error".to_string(),
                Some(serde_json::json!({ "detail": detail.into() })),
            ),
            None,
        )
    }

    pub fn method_not_found(method: &str, id: Option<serde_json::Value>) -> Self {
        Self::error(
            JsonRpcError::custom(
                error_codes::METHOD_NOT_FOUND,
                "Method not found".to_string(),
                Some(serde_json::json!({ "method": method })),
            ),
            id,
        )
    }

    /// Unwrap into the result value, turning an error object into `Err`
    pub fn into_result(self) -> Result<serde_json::Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }
}

impl JsonRpcError {
    /// Create a custom application error
    pub fn custom(code: i32, message: String, data: Option<serde_json::Value>) -> Self {
        Self { code, message, data }
    }

    /// Stable error kind carried in `data.kind`, if present
    pub fn kind(&self) -> Option<&str> {
        self.data.as_ref()?.get("kind")?.as_str()
    }
}

impl From<CloudwrightError> for JsonRpcError {
    fn from(error: CloudwrightError) -> Self {
        let mut data = serde_json::json!({ "kind": error.kind() });
        if let Some(request_id) = error.request_id() {
            data["request_id"] = serde_json::Value::String(request_id.to_string());
        }

        JsonRpcError {
            code: error.error_code(),
            message: error.user_message(),
            data: Some(data),
        }
    }
}
