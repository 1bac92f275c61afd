//! Cloudwright Provisioning Server
//!
//! Turns a natural-language conversation into a validated, provisioned set of
//! cloud resources. The request lifecycle orchestrator sits at the core and is
//! reachable over JSON-RPC (stdio or Unix socket) and HTTP.

use anyhow::Result;

pub mod analysis;
pub mod auth;
pub mod backend;
pub mod catalog;
pub mod cli;
pub mod client;
pub mod config;
pub mod handlers;
pub mod http;
pub mod jsonrpc;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod store;

/// Application-wide error types with context preservation
#[derive(Debug, thiserror::Error)]
pub enum CloudwrightError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Insufficient context: {message}")]
    InsufficientContext {
        message: String,
        request_id: Option<String>,
    },

    #[error("Invalid state for request {request_id}: {message}")]
    InvalidState { request_id: String, message: String },

    #[error("Unknown resource '{resource}' for request {request_id}")]
    UnknownResource { request_id: String, resource: String },

    #[error("Invalid transition for request {request_id}: {message}")]
    InvalidTransition { request_id: String, message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Overloaded: {message}")]
    Overloaded { message: String },

    #[error("Request store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl CloudwrightError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn insufficient_context(message: impl Into<String>) -> Self {
        Self::InsufficientContext {
            message: message.into(),
            request_id: None,
        }
    }

    /// Attach the request the caller should continue the conversation on
    pub fn for_request(self, id: impl Into<String>) -> Self {
        match self {
            Self::InsufficientContext { message, .. } => Self::InsufficientContext {
                message,
                request_id: Some(id.into()),
            },
            other => other,
        }
    }

    /// Create an invalid state error for a request
    pub fn invalid_state(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidState {
            request_id: request_id.into(),
            message: message.into(),
        }
    }

    pub fn unknown_resource(request_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::UnknownResource {
            request_id: request_id.into(),
            resource: resource.into(),
        }
    }

    pub fn invalid_transition(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            request_id: request_id.into(),
            message: message.into(),
        }
    }

    /// Create an invalid request error (payload validation, dependency cycles)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an admission-control rejection
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::Overloaded {
            message: message.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Get error code for JSON-RPC responses
    pub fn error_code(&self) -> i32 {
        match self {
            CloudwrightError::Configuration { .. } => -32014,
            CloudwrightError::RequestNotFound(_) => -32003,
            CloudwrightError::InsufficientContext { .. } => -32020,
            CloudwrightError::InvalidState { .. } => -32021,
            CloudwrightError::UnknownResource { .. } => -32022,
            CloudwrightError::InvalidTransition { .. } => -32021,
            CloudwrightError::InvalidRequest { .. } => -32602,
            CloudwrightError::Overloaded { .. } => -32023,
            CloudwrightError::StoreUnavailable { .. } => -32024,
            CloudwrightError::Unauthorized { .. } => -32025,
            CloudwrightError::Transport { .. } => -32001,
            CloudwrightError::Internal(_) => -32603,
            CloudwrightError::Io { .. } => -32603,
            CloudwrightError::Serialization { .. } => -32700,
        }
    }

    /// Get the HTTP status code used by the HTTP transport
    pub fn http_status(&self) -> u16 {
        match self {
            CloudwrightError::RequestNotFound(_) => 404,
            CloudwrightError::InsufficientContext { .. } => 422,
            CloudwrightError::InvalidState { .. } => 409,
            CloudwrightError::InvalidTransition { .. } => 409,
            CloudwrightError::UnknownResource { .. } => 400,
            CloudwrightError::InvalidRequest { .. } => 400,
            CloudwrightError::Serialization { .. } => 400,
            CloudwrightError::Overloaded { .. } => 429,
            CloudwrightError::Unauthorized { .. } => 401,
            CloudwrightError::StoreUnavailable { .. } => 503,
            CloudwrightError::Configuration { .. }
            | CloudwrightError::Transport { .. }
            | CloudwrightError::Internal(_)
            | CloudwrightError::Io { .. } => 500,
        }
    }

    /// Stable machine-readable name, shared by both transports
    pub fn kind(&self) -> &'static str {
        match self {
            CloudwrightError::Configuration { .. } => "CONFIGURATION",
            CloudwrightError::RequestNotFound(_) => "NOT_FOUND",
            CloudwrightError::InsufficientContext { .. } => "INSUFFICIENT_CONTEXT",
            CloudwrightError::InvalidState { .. } => "INVALID_STATE",
            CloudwrightError::UnknownResource { .. } => "UNKNOWN_RESOURCE",
            CloudwrightError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CloudwrightError::InvalidRequest { .. } => "INVALID_REQUEST",
            CloudwrightError::Overloaded { .. } => "OVERLOADED",
            CloudwrightError::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            CloudwrightError::Unauthorized { .. } => "UNAUTHORIZED",
            CloudwrightError::Transport { .. } => "TRANSPORT",
            CloudwrightError::Internal(_) => "INTERNAL",
            CloudwrightError::Io { .. } => "IO",
            CloudwrightError::Serialization { .. } => "SERIALIZATION",
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            CloudwrightError::Configuration { message } => {
                format!("Configuration issue: {}", message)
            }
            CloudwrightError::RequestNotFound(id) => {
                format!("Request not found: {}", id)
            }
            CloudwrightError::InsufficientContext { message, .. } => {
                format!("Not enough information to recommend resources yet: {}", message)
            }
            CloudwrightError::InvalidState { request_id, message } => {
                format!("Request {} cannot accept this operation: {}", request_id, message)
            }
            CloudwrightError::UnknownResource { request_id, resource } => {
                format!(
                    "Resource '{}' was never recommended for request {}",
                    resource, request_id
                )
            }
            CloudwrightError::InvalidTransition { request_id, message } => {
                format!("Request {} rejected a state change: {}", request_id, message)
            }
            CloudwrightError::InvalidRequest { message } => {
                format!("Invalid request: {}", message)
            }
            CloudwrightError::Overloaded { message } => {
                format!("Server is busy, retry later: {}", message)
            }
            CloudwrightError::StoreUnavailable { message } => {
                format!("Request storage unavailable: {}", message)
            }
            CloudwrightError::Unauthorized { message } => {
                format!("Unauthorized: {}", message)
            }
            CloudwrightError::Transport { message } => {
                format!("Communication error: {}", message)
            }
            CloudwrightError::Internal(message) => {
                format!("Internal error: {}", message)
            }
            CloudwrightError::Io { source } => {
                format!("File system error: {}", source)
            }
            CloudwrightError::Serialization { source } => {
                format!("Data format error: {}", source)
            }
        }
    }

    /// The request id the error refers to, when there is one
    pub fn request_id(&self) -> Option<&str> {
        match self {
            CloudwrightError::RequestNotFound(id) => Some(id),
            CloudwrightError::InsufficientContext { request_id, .. } => request_id.as_deref(),
            CloudwrightError::InvalidState { request_id, .. }
            | CloudwrightError::UnknownResource { request_id, .. }
            | CloudwrightError::InvalidTransition { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// Convenience type alias for Results
pub type CloudwrightResult<T> = Result<T, CloudwrightError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    fn with_store_context(self, request_id: &str) -> CloudwrightResult<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_store_context(self, request_id: &str) -> CloudwrightResult<T> {
        self.map_err(|e| {
            CloudwrightError::store_unavailable(format!(
                "request {}: {}",
                request_id,
                e.into()
            ))
        })
    }
}
