// Request handlers shared by the JSON-RPC and HTTP transports.
// Each handler validates its payload and delegates to the orchestrator.

use validator::{Validate, ValidationError, ValidationErrors};

use crate::store::is_valid_request_id;
use crate::{CloudwrightError, CloudwrightResult};

pub mod analyze;
pub mod catalog;
pub mod lifecycle;
pub mod provision;
pub mod status;

pub use analyze::*;
pub use catalog::*;
pub use lifecycle::*;
pub use provision::*;
pub use status::*;

/// Run derive-based validation, flattening failures into one `InvalidRequest`
pub fn validate_request<T: Validate>(request: &T) -> CloudwrightResult<()> {
    request.validate().map_err(|errors| {
        tracing::debug!("Request validation failed: {:?}", errors);
        CloudwrightError::invalid_request(format!(
            "Request validation failed: {}",
            describe(&errors).join(", ")
        ))
    })
}

fn describe(errors: &ValidationErrors) -> Vec<String> {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            let field = match field.to_string() {
                f if f == "__all__" => "request".to_string(),
                f => f,
            };
            errors.iter().map(move |error| {
                format!(
                    "Field '{}': {}",
                    field,
                    error
                        .message
                        .as_ref()
                        .map(|m| m.as_ref())
                        .unwrap_or(error.code.as_ref())
                )
            })
        })
        .collect();
    messages.sort();
    messages
}

pub(crate) fn validate_request_id(id: &str) -> Result<(), ValidationError> {
    if !is_valid_request_id(id) {
        let mut error = ValidationError::new("invalid_request_id");
        error.message = Some("must be 1-128 characters of [A-Za-z0-9_-]".into());
        return Err(error);
    }
    Ok(())
}

/// Payload of the operations that only name a request
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Validate)]
pub struct RequestIdParams {
    #[validate(custom(function = "validate_request_id"))]
    pub request_id: String,
}

impl RequestIdParams {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}
