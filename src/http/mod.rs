//! HTTP/JSON transport
//!
//! Thin axum routes over the same handlers the JSON-RPC methods use. The
//! caller is authenticated from `Authorization: Bearer <token>` before any
//! handler runs.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod error;

pub use error::{ApiError, ApiResult};

use crate::auth::{Authenticator, CallerIdentity};
use crate::handlers::{
    AnalyzeHandler, AnalyzeRequirementsRequest, CatalogHandler, ComputeShapesResponse,
    ConfirmProvisioningRequest, LifecycleHandler, ProvisionHandler, RequestIdParams,
    ResourceTypesResponse, StatusHandler,
};
use crate::orchestrator::{
    AnalysisResult, DeleteResult, Orchestrator, ProvisionAccepted, StatusReport, TeardownReport,
};

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    authenticator: Arc<dyn Authenticator>,
    analyze: Arc<AnalyzeHandler>,
    provision: Arc<ProvisionHandler>,
    status: Arc<StatusHandler>,
    lifecycle: Arc<LifecycleHandler>,
    catalog: Arc<CatalogHandler>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            analyze: Arc::new(AnalyzeHandler::new(orchestrator.clone())),
            provision: Arc::new(ProvisionHandler::new(orchestrator.clone())),
            status: Arc::new(StatusHandler::new(orchestrator.clone())),
            lifecycle: Arc::new(LifecycleHandler::new(orchestrator.clone())),
            catalog: Arc::new(CatalogHandler::new(orchestrator.clone())),
            orchestrator,
            authenticator,
        }
    }

    fn caller(&self, headers: &HeaderMap) -> ApiResult<CallerIdentity> {
        let credential = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        Ok(self.authenticator.authenticate(credential)?)
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/provision", post(provision))
        .route("/api/status/:request_id", get(status))
        .route("/api/cancel/:request_id", post(cancel))
        .route("/api/retry/:request_id", post(retry))
        .route("/api/teardown/:request_id", post(teardown))
        .route("/api/requests/:request_id", delete(remove))
        .route("/api/resource-types", get(resource_types))
        .route("/api/compute-shapes", get(compute_shapes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router until `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;
    tracing::info!("HTTP API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    in_flight: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        in_flight: state.orchestrator.in_flight(),
    })
}

async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequirementsRequest>, JsonRejection>,
) -> ApiResult<Json<AnalysisResult>> {
    let caller = state.caller(&headers)?;
    let Json(request) = payload?;
    Ok(Json(state.analyze.handle(&caller, request).await?))
}

async fn provision(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConfirmProvisioningRequest>, JsonRejection>,
) -> ApiResult<Json<ProvisionAccepted>> {
    let caller = state.caller(&headers)?;
    let Json(request) = payload?;
    Ok(Json(state.provision.handle(&caller, request).await?))
}

async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    let caller = state.caller(&headers)?;
    Ok(Json(
        state
            .status
            .handle(&caller, RequestIdParams::new(request_id))
            .await?,
    ))
}

async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<StatusReport>> {
    let caller = state.caller(&headers)?;
    Ok(Json(
        state
            .lifecycle
            .cancel(&caller, RequestIdParams::new(request_id))
            .await?,
    ))
}

async fn retry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<ProvisionAccepted>> {
    let caller = state.caller(&headers)?;
    Ok(Json(
        state
            .provision
            .retry(&caller, RequestIdParams::new(request_id))
            .await?,
    ))
}

async fn teardown(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<TeardownReport>> {
    let caller = state.caller(&headers)?;
    Ok(Json(
        state
            .lifecycle
            .teardown(&caller, RequestIdParams::new(request_id))
            .await?,
    ))
}

async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<DeleteResult>> {
    let caller = state.caller(&headers)?;
    Ok(Json(
        state
            .lifecycle
            .delete(&caller, RequestIdParams::new(request_id))
            .await?,
    ))
}

async fn resource_types(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ResourceTypesResponse>> {
    state.caller(&headers)?;
    Ok(Json(state.catalog.resource_types()))
}

async fn compute_shapes(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ComputeShapesResponse>> {
    state.caller(&headers)?;
    Ok(Json(state.catalog.compute_shapes()))
}
