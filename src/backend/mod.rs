//! Provisioning backend boundary.
//!
//! The orchestrator only sees this trait: start a provision, poll it, tear it
//! down. A simulated implementation ships for the default server and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::ResourceType;
use crate::models::{ResourceRecommendation, ResourceStatus};

pub mod simulated;

pub use simulated::{ScriptedOutcome, SimulatedBackend};

/// Failures reported by the provider API
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Throttling, timeouts, 5xx; worth retrying
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown provider id: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Reference to an in-flight provision, returned once the backend acknowledges it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningHandle {
    pub provider_id: String,
    pub name: String,
    pub resource_type: ResourceType,
}

/// What the backend currently reports for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceObservation {
    pub status: ResourceStatus,
    pub error_detail: Option<String>,
    pub details: Option<serde_json::Value>,
    pub access_info: Option<serde_json::Value>,
}

impl ResourceObservation {
    pub fn pending() -> Self {
        Self {
            status: ResourceStatus::Pending,
            error_detail: None,
            details: None,
            access_info: None,
        }
    }
}

#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Start provisioning; returns as soon as the backend acknowledges the request
    async fn provision(
        &self,
        recommendation: &ResourceRecommendation,
    ) -> Result<ProvisioningHandle, BackendError>;

    async fn poll(&self, handle: &ProvisioningHandle) -> Result<ResourceObservation, BackendError>;

    /// Best-effort removal of a provisioned resource
    async fn teardown(&self, provider_id: &str) -> Result<(), BackendError>;
}
