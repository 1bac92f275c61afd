use super::{validate_request, RequestIdParams};
use crate::auth::CallerIdentity;
use crate::orchestrator::{Orchestrator, StatusReport};
use crate::CloudwrightResult;

/// Read-only status lookups; never waits on provisioning
pub struct StatusHandler {
    orchestrator: Orchestrator,
}

impl StatusHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(
        &self,
        caller: &CallerIdentity,
        request: RequestIdParams,
    ) -> CloudwrightResult<StatusReport> {
        validate_request(&request)?;
        self.orchestrator
            .get_status(caller, &request.request_id)
            .await
    }
}
