//! JSON-RPC method definitions, constants, and registration helpers

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use super::protocol::{error_codes, JsonRpcError};
use super::server::MethodRegistry;
use crate::auth::{Authenticator, CallerIdentity};
use crate::handlers::{
    AnalyzeHandler, AnalyzeRequirementsRequest, CatalogHandler, ConfirmProvisioningRequest,
    LifecycleHandler, ProvisionHandler, RequestIdParams, StatusHandler,
};
use crate::orchestrator::Orchestrator;
use crate::CloudwrightResult;

pub const ANALYZE: &str = "cloudwright/analyze";
pub const PROVISION: &str = "cloudwright/provision";
pub const STATUS: &str = "cloudwright/status";
pub const CANCEL: &str = "cloudwright/cancel";
pub const RETRY: &str = "cloudwright/retry";
pub const TEARDOWN: &str = "cloudwright/teardown";
pub const DELETE: &str = "cloudwright/delete";
pub const RESOURCE_TYPES: &str = "cloudwright/resource_types";
pub const COMPUTE_SHAPES: &str = "cloudwright/compute_shapes";

/// All supported JSON-RPC methods
pub const ALL_METHODS: &[&str] = &[
    ANALYZE,
    PROVISION,
    STATUS,
    CANCEL,
    RETRY,
    TEARDOWN,
    DELETE,
    RESOURCE_TYPES,
    COMPUTE_SHAPES,
];

/// Parameter field carrying the caller's bearer credential
pub const CREDENTIAL_FIELD: &str = "credential";

#[derive(Debug, Deserialize)]
struct NoParams {}

/// Register every operation with the registry.
///
/// Methods accept the handler request types directly, plus an optional
/// `credential`. `confirmed_resources` takes recommendation objects from an
/// analysis or their bare names:
/// ```json
/// { "request_id": "...", "confirmed_resources": ["WebServer"], "credential": "..." }
/// ```
pub async fn register_cloudwright_methods(
    registry: &MethodRegistry,
    orchestrator: Orchestrator,
    authenticator: Arc<dyn Authenticator>,
) {
    let analyze = Arc::new(AnalyzeHandler::new(orchestrator.clone()));
    let provision = Arc::new(ProvisionHandler::new(orchestrator.clone()));
    let status = Arc::new(StatusHandler::new(orchestrator.clone()));
    let lifecycle = Arc::new(LifecycleHandler::new(orchestrator.clone()));
    let catalog = Arc::new(CatalogHandler::new(orchestrator));

    register(registry, ANALYZE, authenticator.clone(), {
        let handler = analyze.clone();
        move |caller, request: AnalyzeRequirementsRequest| {
            let handler = handler.clone();
            async move { handler.handle(&caller, request).await }
        }
    })
    .await;

    register(registry, PROVISION, authenticator.clone(), {
        let handler = provision.clone();
        move |caller, request: ConfirmProvisioningRequest| {
            let handler = handler.clone();
            async move { handler.handle(&caller, request).await }
        }
    })
    .await;

    register(registry, STATUS, authenticator.clone(), {
        let handler = status.clone();
        move |caller, request: RequestIdParams| {
            let handler = handler.clone();
            async move { handler.handle(&caller, request).await }
        }
    })
    .await;

    register(registry, CANCEL, authenticator.clone(), {
        let handler = lifecycle.clone();
        move |caller, request: RequestIdParams| {
            let handler = handler.clone();
            async move { handler.cancel(&caller, request).await }
        }
    })
    .await;

    register(registry, RETRY, authenticator.clone(), {
        let handler = provision.clone();
        move |caller, request: RequestIdParams| {
            let handler = handler.clone();
            async move { handler.retry(&caller, request).await }
        }
    })
    .await;

    register(registry, TEARDOWN, authenticator.clone(), {
        let handler = lifecycle.clone();
        move |caller, request: RequestIdParams| {
            let handler = handler.clone();
            async move { handler.teardown(&caller, request).await }
        }
    })
    .await;

    register(registry, DELETE, authenticator.clone(), {
        let handler = lifecycle.clone();
        move |caller, request: RequestIdParams| {
            let handler = handler.clone();
            async move { handler.delete(&caller, request).await }
        }
    })
    .await;

    register(registry, RESOURCE_TYPES, authenticator.clone(), {
        let handler = catalog.clone();
        move |_caller, _: NoParams| {
            let handler = handler.clone();
            async move { Ok(handler.resource_types()) }
        }
    })
    .await;

    register(registry, COMPUTE_SHAPES, authenticator, {
        let handler = catalog;
        move |_caller, _: NoParams| {
            let handler = handler.clone();
            async move { Ok(handler.compute_shapes()) }
        }
    })
    .await;

    tracing::info!("Registered {} JSON-RPC methods", ALL_METHODS.len());
}

/// Wrap a typed handler: authenticate, parse params, call, serialize
async fn register<Req, Resp, F, Fut>(
    registry: &MethodRegistry,
    method: &'static str,
    authenticator: Arc<dyn Authenticator>,
    call: F,
) where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(CallerIdentity, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CloudwrightResult<Resp>> + Send + 'static,
{
    let call = Arc::new(call);
    registry
        .register_method(method, move |params| {
            let authenticator = authenticator.clone();
            let call = call.clone();
            async move {
                let params = match params {
                    None | Some(serde_json::Value::Null) => serde_json::json!({}),
                    Some(value) => value,
                };

                let credential = params.get(CREDENTIAL_FIELD).and_then(|v| v.as_str());
                let caller = authenticator
                    .authenticate(credential)
                    .map_err(JsonRpcError::from)?;

                let request: Req = serde_json::from_value(params.clone())
                    .map_err(|e| create_parse_error::<Req>(&e, &params))?;

                let response = call(caller, request).await.map_err(JsonRpcError::from)?;

                serde_json::to_value(response).map_err(|e| {
                    JsonRpcError::custom(
                        error_codes::INTERNAL_ERROR,
                        format!("Failed to serialize response: {}", e),
                        None,
                    )
                })
            }
        })
        .await;
}

fn create_parse_error<T>(error: &serde_json::Error, params: &serde_json::Value) -> JsonRpcError {
    let type_name = std::any::type_name::<T>()
        .rsplit("::")
        .next()
        .unwrap_or("Request");

    let received_fields: Vec<&str> = match params {
        serde_json::Value::Object(map) => map
            .keys()
            .map(|s| s.as_str())
            .filter(|k| *k != CREDENTIAL_FIELD)
            .collect(),
        _ => vec![],
    };

    let hint = if received_fields.is_empty() {
        "No parameters provided".to_string()
    } else {
        format!("Received fields: {}", received_fields.join(", "))
    };

    JsonRpcError::custom(
        error_codes::INVALID_PARAMS,
        format!("Invalid {}: {}. {}", type_name, error, hint),
        Some(serde_json::json!({
            "kind": "INVALID_REQUEST",
            "parse_error": error.to_string(),
        })),
    )
}
