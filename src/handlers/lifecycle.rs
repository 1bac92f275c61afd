// Administrative request lifecycle operations: cancel, teardown, delete.

use tracing::info;

use super::{validate_request, RequestIdParams};
use crate::auth::CallerIdentity;
use crate::orchestrator::{DeleteResult, Orchestrator, StatusReport, TeardownReport};
use crate::CloudwrightResult;

pub struct LifecycleHandler {
    orchestrator: Orchestrator,
}

impl LifecycleHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn cancel(
        &self,
        caller: &CallerIdentity,
        request: RequestIdParams,
    ) -> CloudwrightResult<StatusReport> {
        validate_request(&request)?;
        info!(request_id = %request.request_id, "Cancel requested");
        self.orchestrator
            .cancel_request(caller, &request.request_id)
            .await
    }

    pub async fn teardown(
        &self,
        caller: &CallerIdentity,
        request: RequestIdParams,
    ) -> CloudwrightResult<TeardownReport> {
        validate_request(&request)?;
        info!(request_id = %request.request_id, "Teardown requested");
        self.orchestrator
            .teardown_request(caller, &request.request_id)
            .await
    }

    pub async fn delete(
        &self,
        caller: &CallerIdentity,
        request: RequestIdParams,
    ) -> CloudwrightResult<DeleteResult> {
        validate_request(&request)?;
        info!(request_id = %request.request_id, "Delete requested");
        self.orchestrator
            .delete_request(caller, &request.request_id)
            .await
    }
}
