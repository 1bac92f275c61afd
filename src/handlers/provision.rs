use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::{validate_request, validate_request_id};
use crate::auth::CallerIdentity;
use crate::models::ConfirmedResource;
use crate::orchestrator::{Orchestrator, ProvisionAccepted};
use crate::CloudwrightResult;

/// Request type for the confirm_and_provision operation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConfirmProvisioningRequest {
    #[validate(custom(function = "validate_request_id"))]
    pub request_id: String,
    /// Recommendations to provision, as echoed objects or bare names
    #[validate(length(min = 1, max = 100, message = "Must confirm 1-100 resources"))]
    pub confirmed_resources: Vec<ConfirmedResource>,
}

/// Starts background provisioning and returns once it has been accepted
pub struct ProvisionHandler {
    orchestrator: Orchestrator,
}

impl ProvisionHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(
        &self,
        caller: &CallerIdentity,
        request: ConfirmProvisioningRequest,
    ) -> CloudwrightResult<ProvisionAccepted> {
        validate_request(&request)?;
        info!(
            request_id = %request.request_id,
            confirmed = request.confirmed_resources.len(),
            "Processing confirm_and_provision request"
        );

        self.orchestrator
            .confirm_and_provision(caller, &request.request_id, request.confirmed_resources)
            .await
    }

    /// Re-provision the failed resources of a failed request
    pub async fn retry(
        &self,
        caller: &CallerIdentity,
        request: super::RequestIdParams,
    ) -> CloudwrightResult<ProvisionAccepted> {
        validate_request(&request)?;
        self.orchestrator
            .retry_provisioning(caller, &request.request_id)
            .await
    }
}
