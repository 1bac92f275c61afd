//! Request lifecycle orchestrator.
//!
//! Owns the state machine: analysis, confirmation, background provisioning,
//! status reads, and the administrative operations around them. Every public
//! operation takes the caller's identity explicitly; requests owned by someone
//! else are reported as not found.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::analysis::{check_recommendations, RequirementsAnalyzer, RuleBasedAnalyzer};
use crate::auth::CallerIdentity;
use crate::backend::{BackendError, ProvisioningBackend, SimulatedBackend};
use crate::catalog::{Catalog, ComputeShape, ResourceTypeInfo};
use crate::config::settings::{OrchestratorConfig, ServerConfig};
use crate::log_event;
use crate::models::{
    fingerprint, ConfirmedResource, ConversationMessage, Failure, FailureReason,
    ProvisionedResource, Request, RequestState, ResourceRecommendation, ResourceStatus,
    SubmissionPhase, UserPreferences,
};
use crate::store::{FileJournal, RequestStore};
use crate::{CloudwrightError, CloudwrightResult};

mod driver;
pub mod plan;

/// Error detail for resources whose submission was cut short by a restart
pub const INTERRUPTED_DETAIL: &str = "interrupted: server restarted before the backend acknowledged";
/// Error detail for resources still pending when the request deadline passed
pub const TIMED_OUT_DETAIL: &str = "timed out";

#[derive(Debug, Clone)]
pub struct AnalyzeInput {
    pub request_id: Option<String>,
    pub conversation: Vec<ConversationMessage>,
    pub preferences: Option<UserPreferences>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub request_id: String,
    pub state: RequestState,
    pub recommendations: Vec<ResourceRecommendation>,
    pub total_estimated_monthly_cost: f64,
    pub region: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionAccepted {
    pub request_id: String,
    pub accepted: bool,
    pub attempt: u32,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub request_id: String,
    pub status: RequestState,
    pub progress: u8,
    pub resources: Vec<ProvisionedResource>,
    pub recommendations: Vec<ResourceRecommendation>,
    pub total_estimated_monthly_cost: f64,
    pub region: Option<String>,
    pub failure: Option<Failure>,
    pub provisioning_attempt: u32,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    pub message: String,
}

impl StatusReport {
    fn from_request(request: &Request) -> Self {
        let message = match request.state {
            RequestState::Created => "Waiting for more conversation context".to_string(),
            RequestState::Analyzing => "Analyzing requirements".to_string(),
            RequestState::AwaitingConfirmation => format!(
                "{} recommendations awaiting confirmation",
                request.recommendations.len()
            ),
            RequestState::Provisioning => format!(
                "Provisioning {} resources ({}% complete)",
                request.provisioned_resources.len(),
                request.progress
            ),
            RequestState::Completed => "All resources provisioned successfully".to_string(),
            RequestState::Failed => request
                .failure
                .as_ref()
                .map(|f| f.detail.clone())
                .unwrap_or_else(|| "Provisioning failed".to_string()),
        };

        Self {
            request_id: request.id.clone(),
            status: request.state,
            progress: request.progress,
            resources: request.provisioned_resources.clone(),
            recommendations: request.recommendations.clone(),
            total_estimated_monthly_cost: request.total_estimated_cost(),
            region: request.region.clone(),
            failure: request.failure.clone(),
            provisioning_attempt: request.provisioning_attempt,
            created_at: request.created_at,
            updated_at: request.updated_at,
            finished_at: request.finished_at,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeardownFailure {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownReport {
    pub request_id: String,
    pub torn_down: Vec<String>,
    pub failures: Vec<TeardownFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub request_id: String,
    pub deleted: bool,
}

enum Claim {
    Reuse(Request),
    Analyze(String),
    /// Another caller is analyzing this request; look again once it settles
    Wait(String),
}

struct DriverTask {
    attempt: u32,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<RequestStore>,
    analyzer: Arc<dyn RequirementsAnalyzer>,
    backend: Arc<dyn ProvisioningBackend>,
    catalog: Arc<Catalog>,
    config: Arc<OrchestratorConfig>,
    admission: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<String, DriverTask>>>,
    /// Serializes the lookup-or-create step of analysis
    analyze_gate: Arc<Mutex<()>>,
    /// Signalled whenever an analysis leaves `Analyzing`
    analysis_settled: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<RequestStore>,
        analyzer: Arc<dyn RequirementsAnalyzer>,
        backend: Arc<dyn ProvisioningBackend>,
        catalog: Arc<Catalog>,
    ) -> Self {
        let permits = config.max_concurrent_requests.max(1);
        Self {
            store,
            analyzer,
            backend,
            catalog,
            config: Arc::new(config),
            admission: Arc::new(Semaphore::new(permits)),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            analyze_gate: Arc::new(Mutex::new(())),
            analysis_settled: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire the default components (rule-based analyzer, simulated backend,
    /// optional file journal) from server configuration.
    pub async fn from_config(config: &ServerConfig) -> CloudwrightResult<Self> {
        let catalog = Arc::new(Catalog::new(config.pricing.clone()));
        let analyzer = Arc::new(RuleBasedAnalyzer::new(
            catalog.clone(),
            config.analysis.clone(),
        )?);
        let backend = Arc::new(SimulatedBackend::new(config.backend.clone()));

        let store = match &config.store.journal_dir {
            Some(dir) => {
                let journal = FileJournal::open(dir).await?;
                info!(journal_dir = %dir, "Request journal enabled");
                Arc::new(RequestStore::with_journal(Arc::new(journal)))
            }
            None => Arc::new(RequestStore::new()),
        };

        Ok(Self::new(
            config.orchestrator.clone(),
            store,
            analyzer,
            backend,
            catalog,
        ))
    }

    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn ProvisioningBackend> {
        &self.backend
    }

    /// Requests currently holding an admission permit
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent_requests
            .max(1)
            .saturating_sub(self.admission.available_permits())
    }

    #[instrument(skip(self, caller, input), fields(principal = %caller.principal))]
    pub async fn analyze_requirements(
        &self,
        caller: &CallerIdentity,
        input: AnalyzeInput,
    ) -> CloudwrightResult<AnalysisResult> {
        if input.conversation.is_empty() {
            return Err(CloudwrightError::invalid_request(
                "conversation_context must contain at least one message",
            ));
        }
        let fp = fingerprint(&input.conversation);

        let request_id = loop {
            // Registered before the lookup so a completion between the lookup
            // and the wait is not missed.
            let settled = self.analysis_settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let gate = self.analyze_gate.lock().await;
            match self.claim_for_analysis(caller, &input, &fp).await? {
                Claim::Reuse(request) => {
                    debug!(request_id = %request.id, "Identical context; returning stored recommendations");
                    return Ok(Self::analysis_result(
                        &request,
                        "Returning existing recommendations for an identical conversation".to_string(),
                    ));
                }
                Claim::Analyze(id) => break id,
                Claim::Wait(id) => {
                    drop(gate);
                    debug!(request_id = %id, "Waiting for the analysis already in progress");
                    settled.await;
                }
            }
        };

        self.run_analysis(&request_id).await
    }

    async fn claim_for_analysis(
        &self,
        caller: &CallerIdentity,
        input: &AnalyzeInput,
        fp: &str,
    ) -> CloudwrightResult<Claim> {
        let existing = match &input.request_id {
            Some(id) => match self.store.get(id).await {
                Ok(request) => Some(self.owned(caller, request)?),
                Err(CloudwrightError::RequestNotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => self.store.find_by_fingerprint(&caller.principal, fp).await,
        };

        let Some(existing) = existing else {
            let id = input
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let request = Request::new(
                id.clone(),
                caller.principal.clone(),
                input.conversation.clone(),
                input.preferences.clone().unwrap_or_default(),
            );
            self.store.create(request).await?;
            log_event!(request = id, info, "Request created");
            self.begin_analysis(&id, input, fp).await?;
            return Ok(Claim::Analyze(id));
        };

        let same_preferences = input
            .preferences
            .as_ref()
            .map(|p| *p == existing.preferences)
            .unwrap_or(true);

        match existing.state {
            RequestState::AwaitingConfirmation
                if existing.context_fingerprint == fp && same_preferences =>
            {
                Ok(Claim::Reuse(existing))
            }
            RequestState::Created | RequestState::AwaitingConfirmation => {
                self.begin_analysis(&existing.id, input, fp).await?;
                Ok(Claim::Analyze(existing.id))
            }
            RequestState::Analyzing => Ok(Claim::Wait(existing.id)),
            state => Err(CloudwrightError::invalid_state(
                &existing.id,
                format!("request is {}; its recommendations can no longer change", state),
            )),
        }
    }

    async fn begin_analysis(
        &self,
        id: &str,
        input: &AnalyzeInput,
        fp: &str,
    ) -> CloudwrightResult<Request> {
        let conversation = input.conversation.clone();
        let preferences = input.preferences.clone();
        let fp = fp.to_string();

        self.store
            .update(id, move |r| {
                if !matches!(
                    r.state,
                    RequestState::Created | RequestState::AwaitingConfirmation
                ) {
                    return Err(CloudwrightError::invalid_state(
                        &r.id,
                        format!("request is {}", r.state),
                    ));
                }
                r.conversation_context = conversation;
                r.context_fingerprint = fp;
                if let Some(preferences) = preferences {
                    r.preferences = preferences;
                }
                r.recommendations.clear();
                r.region = None;
                r.state = RequestState::Analyzing;
                Ok(())
            })
            .await
    }

    async fn run_analysis(&self, id: &str) -> CloudwrightResult<AnalysisResult> {
        let result = self.analyze_and_record(id).await;
        self.analysis_settled.notify_waiters();
        result
    }

    async fn analyze_and_record(&self, id: &str) -> CloudwrightResult<AnalysisResult> {
        let request = self.store.get(id).await?;
        let outcome = self
            .analyzer
            .analyze(&request.conversation_context, &request.preferences)
            .await
            .and_then(|outcome| {
                check_recommendations(&outcome.recommendations)?;
                Ok(outcome)
            });

        match outcome {
            Ok(outcome) => {
                let recommendations = outcome.recommendations;
                let region = outcome.region;
                let updated = self
                    .store
                    .update(id, move |r| {
                        if r.state != RequestState::Analyzing {
                            return Err(CloudwrightError::invalid_state(
                                &r.id,
                                format!("request is {}", r.state),
                            ));
                        }
                        r.recommendations = recommendations;
                        r.region = Some(region);
                        r.state = RequestState::AwaitingConfirmation;
                        Ok(())
                    })
                    .await?;

                log_event!(
                    request = id,
                    info,
                    recommendations = updated.recommendations.len(),
                    total_cost = updated.total_estimated_cost(),
                    "Analysis complete"
                );

                let mut message = format!(
                    "Resource analysis completed successfully with {} recommendations",
                    updated.recommendations.len()
                );
                for note in &outcome.notes {
                    message.push_str(". ");
                    message.push_str(note);
                }
                Ok(Self::analysis_result(&updated, message))
            }
            Err(err) => {
                let revert = self
                    .store
                    .update(id, |r| {
                        if r.state == RequestState::Analyzing {
                            r.state = RequestState::Created;
                        }
                        Ok(())
                    })
                    .await;
                if let Err(e) = revert {
                    warn!(request_id = %id, error = %e, "Could not return request to created");
                }
                log_event!(request = id, info, error = %err, "Analysis did not produce recommendations");
                Err(err.for_request(id))
            }
        }
    }

    fn analysis_result(request: &Request, message: String) -> AnalysisResult {
        AnalysisResult {
            request_id: request.id.clone(),
            state: request.state,
            recommendations: request.recommendations.clone(),
            total_estimated_monthly_cost: request.total_estimated_cost(),
            region: request.region.clone(),
            message,
        }
    }

    #[instrument(skip(self, caller, confirmed), fields(principal = %caller.principal))]
    pub async fn confirm_and_provision<I>(
        &self,
        caller: &CallerIdentity,
        request_id: &str,
        confirmed: I,
    ) -> CloudwrightResult<ProvisionAccepted>
    where
        I: IntoIterator,
        I::Item: Into<ConfirmedResource>,
    {
        let confirmed: Vec<ConfirmedResource> = confirmed.into_iter().map(Into::into).collect();
        let request = self.owned(caller, self.store.get(request_id).await?)?;
        if request.state != RequestState::AwaitingConfirmation {
            return Err(CloudwrightError::invalid_state(
                request_id,
                format!(
                    "request is {}; only requests awaiting confirmation can be provisioned",
                    request.state
                ),
            ));
        }

        if confirmed.is_empty() {
            return Err(CloudwrightError::invalid_request(
                "confirmed_resources must name at least one recommendation",
            ));
        }
        let mut seen = HashSet::new();
        for entry in &confirmed {
            let known = request
                .recommendation(entry.name())
                .map(|rec| entry.matches(rec))
                .unwrap_or(false);
            if !known {
                return Err(CloudwrightError::unknown_resource(request_id, entry.name()));
            }
            seen.insert(entry.name().to_string());
        }

        let selected: Vec<&ResourceRecommendation> = request
            .recommendations
            .iter()
            .filter(|r| seen.contains(&r.name))
            .collect();
        let layers = plan::dependency_layers(&selected)?;
        debug!(request_id = %request_id, ?layers, "Submission plan");

        let permit = self.try_admit()?;

        let updated = self
            .store
            .update(request_id, move |r| {
                if r.state != RequestState::AwaitingConfirmation {
                    return Err(CloudwrightError::invalid_state(
                        &r.id,
                        format!("request is {}", r.state),
                    ));
                }
                let resources: Vec<ProvisionedResource> = r
                    .recommendations
                    .iter()
                    .filter(|rec| seen.contains(&rec.name))
                    .map(ProvisionedResource::pending)
                    .collect();
                r.provisioned_resources = resources;
                r.state = RequestState::Provisioning;
                r.provisioning_attempt += 1;
                r.progress = 0;
                r.failure = None;
                r.provisioning_started_at = Some(Utc::now());
                r.finished_at = None;
                Ok(())
            })
            .await?;

        log_event!(
            request = request_id,
            info,
            attempt = updated.provisioning_attempt,
            resources = updated.provisioned_resources.len(),
            "Provisioning accepted"
        );
        self.spawn_driver(&updated.id, updated.provisioning_attempt, Some(permit))
            .await;

        Ok(ProvisionAccepted {
            request_id: updated.id.clone(),
            accepted: true,
            attempt: updated.provisioning_attempt,
            resources: updated
                .provisioned_resources
                .iter()
                .map(|r| r.name.clone())
                .collect(),
        })
    }

    /// Pure store read; never waits on the backend
    pub async fn get_status(
        &self,
        caller: &CallerIdentity,
        request_id: &str,
    ) -> CloudwrightResult<StatusReport> {
        let request = self.owned(caller, self.store.get(request_id).await?)?;
        Ok(StatusReport::from_request(&request))
    }

    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub async fn cancel_request(
        &self,
        caller: &CallerIdentity,
        request_id: &str,
    ) -> CloudwrightResult<StatusReport> {
        self.owned(caller, self.store.get(request_id).await?)?;
        let updated = self
            .store
            .update(request_id, |r| {
                if r.state != RequestState::AwaitingConfirmation {
                    return Err(CloudwrightError::invalid_state(
                        &r.id,
                        format!(
                            "request is {}; only requests awaiting confirmation can be cancelled",
                            r.state
                        ),
                    ));
                }
                r.state = RequestState::Failed;
                r.failure = Some(Failure {
                    reason: FailureReason::Cancelled,
                    detail: "Cancelled by caller before provisioning".to_string(),
                });
                r.finished_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        log_event!(request = request_id, info, "Request cancelled");
        Ok(StatusReport::from_request(&updated))
    }

    /// Re-provision the resources of a failed request that ended in Error, or
    /// that were removed after a timeout
    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub async fn retry_provisioning(
        &self,
        caller: &CallerIdentity,
        request_id: &str,
    ) -> CloudwrightResult<ProvisionAccepted> {
        let request = self.owned(caller, self.store.get(request_id).await?)?;
        Self::check_retryable(&request)?;

        let permit = self.try_admit()?;

        let updated = self
            .store
            .update(request_id, |r| {
                Self::check_retryable(r)?;
                for resource in r
                    .provisioned_resources
                    .iter_mut()
                    .filter(|res| res.needs_retry())
                {
                    resource.reset_for_retry();
                }
                r.state = RequestState::Provisioning;
                r.provisioning_attempt += 1;
                r.failure = None;
                r.finished_at = None;
                r.provisioning_started_at = Some(Utc::now());
                r.progress = r.computed_progress();
                Ok(())
            })
            .await?;

        let retried: Vec<String> = updated
            .provisioned_resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Pending)
            .map(|r| r.name.clone())
            .collect();
        log_event!(
            request = request_id,
            info,
            attempt = updated.provisioning_attempt,
            retried = retried.len(),
            "Retrying failed resources"
        );
        self.spawn_driver(&updated.id, updated.provisioning_attempt, Some(permit))
            .await;

        Ok(ProvisionAccepted {
            request_id: updated.id.clone(),
            accepted: true,
            attempt: updated.provisioning_attempt,
            resources: retried,
        })
    }

    fn check_retryable(request: &Request) -> CloudwrightResult<()> {
        if request.state != RequestState::Failed {
            return Err(CloudwrightError::invalid_state(
                &request.id,
                format!("request is {}; only failed requests can be retried", request.state),
            ));
        }
        let retryable = request
            .failure
            .as_ref()
            .map(|f| f.reason.is_retryable())
            .unwrap_or(false);
        if !retryable {
            return Err(CloudwrightError::invalid_state(
                &request.id,
                "cancelled requests cannot be retried",
            ));
        }
        if request.torn_down_at.is_some() {
            return Err(CloudwrightError::invalid_state(
                &request.id,
                "request has been torn down",
            ));
        }
        if !request.provisioned_resources.iter().any(|r| r.needs_retry()) {
            return Err(CloudwrightError::invalid_state(
                &request.id,
                "no failed resources to retry",
            ));
        }
        Ok(())
    }

    /// Best-effort removal of everything a failed request created
    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub async fn teardown_request(
        &self,
        caller: &CallerIdentity,
        request_id: &str,
    ) -> CloudwrightResult<TeardownReport> {
        let request = self.owned(caller, self.store.get(request_id).await?)?;
        if request.state != RequestState::Failed {
            return Err(CloudwrightError::invalid_state(
                request_id,
                format!("request is {}; only failed requests can be torn down", request.state),
            ));
        }

        let targets: Vec<(String, String)> = request
            .provisioned_resources
            .iter()
            .filter(|r| r.status != ResourceStatus::Terminated)
            .filter_map(|r| r.provider_id.clone().map(|id| (r.name.clone(), id)))
            .collect();

        let results = futures::future::join_all(targets.iter().map(|(name, provider_id)| {
            let backend = self.backend.clone();
            async move { (name.clone(), backend.teardown(provider_id).await) }
        }))
        .await;

        let mut torn_down = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) | Err(BackendError::NotFound(_)) => torn_down.push(name),
                Err(e) => {
                    log_event!(request = request_id, resource = name, warn, error = %e, "Teardown failed");
                    failures.push(TeardownFailure {
                        name,
                        detail: e.to_string(),
                    });
                }
            }
        }

        let attempt = request.provisioning_attempt;
        let terminated = torn_down.clone();
        self.store
            .update(request_id, move |r| {
                if r.state != RequestState::Failed || r.provisioning_attempt != attempt {
                    return Err(CloudwrightError::invalid_state(
                        &r.id,
                        "request changed while tearing down",
                    ));
                }
                let now = Utc::now();
                for name in &terminated {
                    if let Some(resource) = r.resource_mut(name) {
                        resource.status = ResourceStatus::Terminated;
                        resource.updated_at = now;
                    }
                }
                if !terminated.is_empty() {
                    r.torn_down_at = Some(now);
                }
                Ok(())
            })
            .await?;

        log_event!(
            request = request_id,
            info,
            torn_down = torn_down.len(),
            failures = failures.len(),
            "Teardown finished"
        );
        Ok(TeardownReport {
            request_id: request_id.to_string(),
            torn_down,
            failures,
        })
    }

    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub async fn delete_request(
        &self,
        caller: &CallerIdentity,
        request_id: &str,
    ) -> CloudwrightResult<DeleteResult> {
        let principal = caller.principal.clone();
        self.store
            .delete_if(request_id, move |r| {
                if r.owner != principal {
                    return Err(CloudwrightError::RequestNotFound(r.id.clone()));
                }
                if r.state == RequestState::Provisioning {
                    return Err(CloudwrightError::invalid_state(
                        &r.id,
                        "request is provisioning; wait for it to finish before deleting",
                    ));
                }
                Ok(())
            })
            .await?;

        if let Some(task) = self.tasks.lock().await.remove(request_id) {
            task.token.cancel();
        }
        log_event!(request = request_id, info, "Request deleted");

        Ok(DeleteResult {
            request_id: request_id.to_string(),
            deleted: true,
        })
    }

    pub fn resource_types(&self) -> Vec<ResourceTypeInfo> {
        self.catalog.resource_types()
    }

    pub fn compute_shapes(&self) -> Vec<ComputeShape> {
        self.catalog.compute_shapes()
    }

    /// Reload journaled requests and resume any that were provisioning.
    ///
    /// Resources caught between submission and acknowledgement are marked
    /// interrupted; acknowledged ones resume polling.
    pub async fn recover(&self) -> CloudwrightResult<usize> {
        let restored = self.store.restore_from_journal().await?;
        let mut resumed = 0;

        for request in restored {
            match request.state {
                RequestState::Analyzing => {
                    self.store
                        .update(&request.id, |r| {
                            r.state = RequestState::Created;
                            Ok(())
                        })
                        .await?;
                    log_event!(request = request.id, info, "Interrupted analysis returned to created");
                }
                RequestState::Provisioning => {
                    let updated = self
                        .store
                        .update(&request.id, |r| {
                            for resource in r.provisioned_resources.iter_mut().filter(|res| {
                                res.status == ResourceStatus::Pending
                                    && res.submission == SubmissionPhase::Submitting
                            }) {
                                resource.submission = SubmissionPhase::NotSubmitted;
                                resource.mark_error(INTERRUPTED_DETAIL);
                            }
                            r.refresh_progress();
                            Ok(())
                        })
                        .await?;

                    let permit = self.admission.clone().try_acquire_owned().ok();
                    if permit.is_none() {
                        warn!(request_id = %updated.id, "Resuming above the admission limit");
                    }
                    log_event!(
                        request = updated.id,
                        info,
                        attempt = updated.provisioning_attempt,
                        "Resuming provisioning after restart"
                    );
                    self.spawn_driver(&updated.id, updated.provisioning_attempt, permit)
                        .await;
                    resumed += 1;
                }
                _ => {}
            }
        }

        Ok(resumed)
    }

    /// Evict terminal requests older than the retention window
    pub async fn sweep_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.request_retention())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - retention;
        let mut evicted = 0;

        for request in self.store.snapshot().await {
            if !request.state.is_terminal() {
                continue;
            }
            let finished = request.finished_at.unwrap_or(request.updated_at);
            if finished > cutoff {
                continue;
            }
            // Re-checked under the entry lock: a retry may have started since the snapshot.
            let expired = self
                .store
                .delete_if(&request.id, |r| {
                    let finished = r.finished_at.unwrap_or(r.updated_at);
                    if r.state.is_terminal() && finished <= cutoff {
                        Ok(())
                    } else {
                        Err(CloudwrightError::invalid_state(&r.id, "no longer expired"))
                    }
                })
                .await;
            match expired {
                Ok(_) => evicted += 1,
                Err(CloudwrightError::RequestNotFound(_))
                | Err(CloudwrightError::InvalidState { .. }) => {}
                Err(e) => warn!(request_id = %request.id, error = %e, "Retention eviction failed"),
            }
        }

        if evicted > 0 {
            info!(evicted, "Evicted expired requests");
        }
        evicted
    }

    pub fn spawn_retention_sweeper(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let interval = self.config.retention_sweep_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = orchestrator.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        orchestrator.sweep_expired().await;
                    }
                }
            }
            debug!("Retention sweeper stopped");
        })
    }

    /// Stop background drivers and the sweeper. In-flight requests stay
    /// `Provisioning` and resume on the next `recover`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn owned(&self, caller: &CallerIdentity, request: Request) -> CloudwrightResult<Request> {
        if request.owner == caller.principal {
            Ok(request)
        } else {
            Err(CloudwrightError::RequestNotFound(request.id))
        }
    }

    fn try_admit(&self) -> CloudwrightResult<OwnedSemaphorePermit> {
        self.admission.clone().try_acquire_owned().map_err(|_| {
            CloudwrightError::overloaded(format!(
                "{} requests are already provisioning",
                self.config.max_concurrent_requests
            ))
        })
    }

    async fn spawn_driver(&self, request_id: &str, attempt: u32, permit: Option<OwnedSemaphorePermit>) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.tasks.lock().await.insert(
            request_id.to_string(),
            DriverTask {
                attempt,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let driver = driver::Driver::new(self.clone(), request_id.to_string(), attempt, token, permit);
        tokio::spawn(driver.run());
    }

    async fn driver_finished(&self, request_id: &str, attempt: u32) {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(request_id).map(|t| t.attempt == attempt).unwrap_or(false) {
            tasks.remove(request_id);
        }
    }
}
