//! Background task that carries one provisioning attempt to a terminal state.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{Orchestrator, INTERRUPTED_DETAIL, TIMED_OUT_DETAIL};
use crate::backend::{BackendError, ProvisioningHandle};
use crate::log_event;
use crate::models::{
    Failure, FailureReason, ProvisionedResource, Request, RequestState, ResourceRecommendation,
    ResourceStatus, SubmissionPhase,
};
use crate::{CloudwrightError, CloudwrightResult};

/// Rejects writes from a driver whose attempt has been superseded
fn guard(request: &Request, attempt: u32) -> CloudwrightResult<()> {
    if request.state != RequestState::Provisioning || request.provisioning_attempt != attempt {
        return Err(CloudwrightError::invalid_transition(
            &request.id,
            format!(
                "stale write from attempt {} (request is {} at attempt {})",
                attempt, request.state, request.provisioning_attempt
            ),
        ));
    }
    Ok(())
}

pub(super) struct Driver {
    orchestrator: Orchestrator,
    request_id: String,
    attempt: u32,
    token: CancellationToken,
    /// Set once a terminal state has been claimed
    settled: AtomicBool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Driver {
    pub(super) fn new(
        orchestrator: Orchestrator,
        request_id: String,
        attempt: u32,
        token: CancellationToken,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            orchestrator,
            request_id,
            attempt,
            token,
            settled: AtomicBool::new(false),
            _permit: permit,
        }
    }

    pub(super) async fn run(self) {
        let result = tokio::select! {
            _ = self.token.cancelled() => {
                debug!(request_id = %self.request_id, attempt = self.attempt, "Driver cancelled");
                Ok(())
            }
            result = self.drive() => result,
        };

        match result {
            Ok(()) => {}
            Err(CloudwrightError::InvalidTransition { message, .. }) => {
                debug!(request_id = %self.request_id, %message, "Driver superseded");
            }
            Err(CloudwrightError::RequestNotFound(_)) => {
                debug!(request_id = %self.request_id, "Request deleted under driver");
            }
            Err(e) => {
                error!(request_id = %self.request_id, error = %e, "Provisioning driver failed");
                if let Err(abort_err) = self.abort(&e.to_string()).await {
                    warn!(request_id = %self.request_id, error = %abort_err, "Could not record driver failure");
                }
            }
        }

        self.orchestrator
            .driver_finished(&self.request_id, self.attempt)
            .await;
    }

    async fn drive(&self) -> CloudwrightResult<()> {
        let request = self.current().await?;
        let deadline = self.deadline(&request);

        let confirmed: HashSet<String> = request
            .provisioned_resources
            .iter()
            .map(|r| r.name.clone())
            .collect();
        let dependencies: HashMap<String, Vec<String>> = request
            .provisioned_resources
            .iter()
            .map(|r| {
                let deps = request
                    .recommendation(&r.name)
                    .map(|rec| {
                        rec.depends_on
                            .iter()
                            .filter(|d| confirmed.contains(*d))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                (r.name.clone(), deps)
            })
            .collect();

        let mut started: HashSet<String> = HashSet::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            let request = self.current().await?;
            if in_flight.is_empty() && request.all_resources_terminal() {
                return self.finish().await;
            }

            let waiting: Vec<&ProvisionedResource> = request
                .provisioned_resources
                .iter()
                .filter(|r| r.status == ResourceStatus::Pending && !started.contains(&r.name))
                .collect();

            let blocked: Vec<(String, String)> = waiting
                .iter()
                .filter_map(|r| {
                    dependencies[&r.name]
                        .iter()
                        .find(|dep| {
                            request
                                .resource(dep)
                                .map(|d| {
                                    matches!(
                                        d.status,
                                        ResourceStatus::Error | ResourceStatus::Terminated
                                    )
                                })
                                .unwrap_or(false)
                        })
                        .map(|dep| (r.name.clone(), dep.clone()))
                })
                .collect();
            if !blocked.is_empty() {
                self.update(move |r| {
                    for (name, dep) in &blocked {
                        if let Some(resource) = r.resource_mut(name) {
                            resource.mark_error(format!("dependency {} failed", dep));
                        }
                    }
                    Ok(())
                })
                .await?;
                continue;
            }

            for resource in waiting {
                let ready = dependencies[&resource.name].iter().all(|dep| {
                    request
                        .resource(dep)
                        .map(|d| d.status == ResourceStatus::Active)
                        .unwrap_or(true)
                });
                if !ready {
                    continue;
                }
                let Some(recommendation) = request.recommendation(&resource.name).cloned() else {
                    continue;
                };
                started.insert(resource.name.clone());
                in_flight.push(self.track(resource.clone(), recommendation).boxed());
            }

            if in_flight.is_empty() {
                // Nothing running and nothing startable; the remainder can never be satisfied.
                self.update(|r| {
                    for resource in r
                        .provisioned_resources
                        .iter_mut()
                        .filter(|res| res.status == ResourceStatus::Pending)
                    {
                        resource.mark_error("unresolvable dependencies");
                    }
                    Ok(())
                })
                .await?;
                continue;
            }

            let timed_out = tokio::select! {
                settled = in_flight.next() => {
                    if let Some(Err(e)) = settled {
                        return Err(e);
                    }
                    false
                }
                _ = tokio::time::sleep_until(deadline) => true,
            };

            if timed_out {
                drop(in_flight);
                return self.fail_timeout().await;
            }
        }
    }

    /// Submit, poll and resubmit one resource until it settles
    async fn track(
        &self,
        resource: ProvisionedResource,
        recommendation: ResourceRecommendation,
    ) -> CloudwrightResult<()> {
        let name = resource.name.clone();
        let config = self.orchestrator.config();
        let max_attempts = config.max_resource_attempts.max(1);
        let poll_interval = config.poll_interval(resource.resource_type.as_str());
        let mut backoff = self.backoff();
        let mut attempts = resource.attempts;

        let mut handle = match (&resource.provider_id, resource.submission) {
            (Some(provider_id), SubmissionPhase::Acknowledged) => Some(ProvisioningHandle {
                provider_id: provider_id.clone(),
                name: name.clone(),
                resource_type: resource.resource_type,
            }),
            _ => None,
        };

        loop {
            let current = match handle.take() {
                Some(current) => current,
                None => {
                    if attempts >= max_attempts {
                        let detail = resource
                            .error_detail
                            .clone()
                            .unwrap_or_else(|| "submission attempts exhausted".to_string());
                        self.update_resource(&name, move |res| res.mark_error(detail))
                            .await?;
                        return Ok(());
                    }

                    attempts += 1;
                    let attempt_number = attempts;
                    self.update_resource(&name, move |res| {
                        res.submission = SubmissionPhase::Submitting;
                        res.attempts = attempt_number;
                    })
                    .await?;
                    log_event!(request = self.request_id, resource = name, info, attempt = attempts, "Submitting resource");

                    match self.orchestrator.backend().provision(&recommendation).await {
                        Ok(acknowledged) => {
                            let provider_id = acknowledged.provider_id.clone();
                            self.update_resource(&name, move |res| {
                                res.provider_id = Some(provider_id);
                                res.submission = SubmissionPhase::Acknowledged;
                            })
                            .await?;
                            backoff.reset();
                            acknowledged
                        }
                        Err(err) if err.is_transient() && attempts < max_attempts => {
                            let delay = next_delay(&mut backoff, config.backoff_cap());
                            log_event!(request = self.request_id, resource = name, warn, error = %err, ?delay, "Transient submission failure");
                            let detail = err.to_string();
                            self.update_resource(&name, move |res| {
                                res.submission = SubmissionPhase::NotSubmitted;
                                res.error_detail = Some(detail);
                            })
                            .await?;
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        Err(err) => {
                            log_event!(request = self.request_id, resource = name, warn, error = %err, "Submission rejected");
                            let detail = err.to_string();
                            self.update_resource(&name, move |res| {
                                res.submission = SubmissionPhase::NotSubmitted;
                                res.mark_error(detail);
                            })
                            .await?;
                            return Ok(());
                        }
                    }
                }
            };

            tokio::time::sleep(poll_interval).await;

            match self.orchestrator.backend().poll(&current).await {
                Ok(observation) => match observation.status {
                    ResourceStatus::Pending => {
                        backoff.reset();
                        handle = Some(current);
                    }
                    ResourceStatus::Active => {
                        self.update_resource(&name, move |res| {
                            res.status = ResourceStatus::Active;
                            res.error_detail = None;
                            res.details = observation.details;
                            res.access_info = observation.access_info;
                        })
                        .await?;
                        log_event!(request = self.request_id, resource = name, info, provider_id = %current.provider_id, "Resource active");
                        return Ok(());
                    }
                    ResourceStatus::Error | ResourceStatus::Terminated => {
                        let detail = observation
                            .error_detail
                            .unwrap_or_else(|| format!("backend reported {}", observation.status));

                        if attempts < max_attempts {
                            let delay = next_delay(&mut backoff, config.backoff_cap());
                            log_event!(request = self.request_id, resource = name, warn, %detail, "Resource failed; resubmitting");
                            self.update_resource(&name, move |res| {
                                res.provider_id = None;
                                res.submission = SubmissionPhase::NotSubmitted;
                                res.error_detail = Some(detail);
                            })
                            .await?;
                            tokio::time::sleep(delay).await;
                        } else {
                            log_event!(request = self.request_id, resource = name, warn, %detail, "Resource failed");
                            self.update_resource(&name, move |res| res.mark_error(detail))
                                .await?;
                            return Ok(());
                        }
                    }
                },
                Err(err) if err.is_transient() => {
                    let delay = next_delay(&mut backoff, config.backoff_cap());
                    debug!(request_id = %self.request_id, resource = %name, error = %err, "Transient poll failure");
                    tokio::time::sleep(delay).await;
                    handle = Some(current);
                }
                Err(err) => {
                    let detail = format!("poll failed: {}", err);
                    self.update_resource(&name, move |res| res.mark_error(detail))
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    async fn finish(&self) -> CloudwrightResult<()> {
        if self.claim_settlement().is_err() {
            return Ok(());
        }

        let attempt = self.attempt;
        let updated = self
            .orchestrator
            .store()
            .update(&self.request_id, move |r| {
                guard(r, attempt)?;
                if !r.all_resources_terminal() {
                    return Err(CloudwrightError::Internal(
                        "finish called with unsettled resources".to_string(),
                    ));
                }

                let failed: Vec<String> = r
                    .provisioned_resources
                    .iter()
                    .filter(|res| res.status != ResourceStatus::Active)
                    .map(|res| res.name.clone())
                    .collect();

                if failed.is_empty() {
                    r.state = RequestState::Completed;
                    r.progress = 100;
                } else {
                    let interrupted = r
                        .provisioned_resources
                        .iter()
                        .filter(|res| res.status != ResourceStatus::Active)
                        .any(|res| {
                            res.error_detail
                                .as_deref()
                                .map(|d| d == INTERRUPTED_DETAIL)
                                .unwrap_or(false)
                        });
                    r.failure = Some(Failure {
                        reason: if interrupted {
                            FailureReason::Interrupted
                        } else {
                            FailureReason::ResourceErrors
                        },
                        detail: format!(
                            "{} of {} resources failed: {}",
                            failed.len(),
                            r.provisioned_resources.len(),
                            failed.join(", ")
                        ),
                    });
                    r.state = RequestState::Failed;
                    r.refresh_progress();
                }
                r.finished_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        log_event!(
            request = self.request_id,
            info,
            state = %updated.state,
            attempt = self.attempt,
            "Provisioning finished"
        );
        Ok(())
    }

    async fn fail_timeout(&self) -> CloudwrightResult<()> {
        if self.claim_settlement().is_err() {
            return Ok(());
        }

        let attempt = self.attempt;
        let timeout_secs = self.orchestrator.config().provisioning_timeout_secs;
        let updated = self
            .orchestrator
            .store()
            .update(&self.request_id, move |r| {
                guard(r, attempt)?;
                for resource in r
                    .provisioned_resources
                    .iter_mut()
                    .filter(|res| res.status == ResourceStatus::Pending)
                {
                    resource.mark_error(TIMED_OUT_DETAIL);
                }
                r.failure = Some(Failure {
                    reason: FailureReason::Timeout,
                    detail: format!("provisioning did not finish within {}s", timeout_secs),
                });
                r.state = RequestState::Failed;
                r.refresh_progress();
                r.finished_at = Some(Utc::now());
                Ok(())
            })
            .await?;

        log_event!(request = self.request_id, warn, attempt = self.attempt, "Provisioning timed out");

        let abandoned: Vec<(String, String)> = updated
            .provisioned_resources
            .iter()
            .filter(|r| {
                r.status == ResourceStatus::Error
                    && r.error_detail.as_deref() == Some(TIMED_OUT_DETAIL)
            })
            .filter_map(|r| r.provider_id.clone().map(|id| (r.name.clone(), id)))
            .collect();
        if abandoned.is_empty() {
            return Ok(());
        }

        let backend = self.orchestrator.backend().clone();
        let results = futures::future::join_all(abandoned.iter().map(|(name, provider_id)| {
            let backend = backend.clone();
            async move { (name.clone(), backend.teardown(provider_id).await) }
        }))
        .await;

        let mut removed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) | Err(BackendError::NotFound(_)) => removed.push(name),
                Err(e) => {
                    log_event!(request = self.request_id, resource = name, warn, error = %e, "Teardown of timed-out resource failed");
                }
            }
        }
        if removed.is_empty() {
            return Ok(());
        }

        let count = removed.len();
        let result = self
            .orchestrator
            .store()
            .update(&self.request_id, move |r| {
                if r.state != RequestState::Failed || r.provisioning_attempt != attempt {
                    return Err(CloudwrightError::invalid_state(
                        &r.id,
                        "request changed while tearing down timed-out resources",
                    ));
                }
                let now = Utc::now();
                for name in &removed {
                    if let Some(resource) = r.resource_mut(name) {
                        if resource.status == ResourceStatus::Error {
                            resource.status = ResourceStatus::Terminated;
                            resource.updated_at = now;
                        }
                    }
                }
                Ok(())
            })
            .await;
        match result {
            Ok(_) => {
                log_event!(request = self.request_id, info, terminated = count, "Timed-out resources torn down");
            }
            Err(e) => debug!(request_id = %self.request_id, error = %e, "Skipped recording timeout teardown"),
        }
        Ok(())
    }

    /// Record an unexpected driver failure so the request does not stay provisioning
    async fn abort(&self, detail: &str) -> CloudwrightResult<()> {
        if self.claim_settlement().is_err() {
            return Ok(());
        }

        let attempt = self.attempt;
        let detail = detail.to_string();
        self.orchestrator
            .store()
            .update(&self.request_id, move |r| {
                guard(r, attempt)?;
                for resource in r
                    .provisioned_resources
                    .iter_mut()
                    .filter(|res| res.status == ResourceStatus::Pending)
                {
                    resource.mark_error(detail.clone());
                }
                r.failure = Some(Failure {
                    reason: FailureReason::ResourceErrors,
                    detail,
                });
                r.state = RequestState::Failed;
                r.refresh_progress();
                r.finished_at = Some(Utc::now());
                Ok(())
            })
            .await
            .map(|_| ())
    }

    fn claim_settlement(&self) -> Result<bool, bool> {
        self.settled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
    }

    async fn current(&self) -> CloudwrightResult<Request> {
        let request = self.orchestrator.store().get(&self.request_id).await?;
        guard(&request, self.attempt)?;
        Ok(request)
    }

    fn deadline(&self, request: &Request) -> Instant {
        let timeout = self.orchestrator.config().provisioning_timeout();
        let elapsed = request
            .provisioning_started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .unwrap_or_default();
        Instant::now() + timeout.saturating_sub(elapsed)
    }

    fn backoff(&self) -> ExponentialBackoff {
        let config = self.orchestrator.config();
        let initial = config.backoff_initial();
        ExponentialBackoff {
            initial_interval: initial,
            current_interval: initial,
            max_interval: config.backoff_cap(),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    async fn update<F>(&self, mutator: F) -> CloudwrightResult<()>
    where
        F: FnOnce(&mut Request) -> CloudwrightResult<()> + Send,
    {
        let attempt = self.attempt;
        self.orchestrator
            .store()
            .update(&self.request_id, move |r| {
                guard(r, attempt)?;
                mutator(r)?;
                r.refresh_progress();
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn update_resource<F>(&self, name: &str, mutator: F) -> CloudwrightResult<()>
    where
        F: FnOnce(&mut ProvisionedResource) + Send,
    {
        let name = name.to_string();
        self.update(move |r| {
            let resource = r.resource_mut(&name).ok_or_else(|| {
                CloudwrightError::Internal(format!("resource {} is not tracked", name))
            })?;
            mutator(resource);
            resource.updated_at = Utc::now();
            Ok(())
        })
        .await
    }
}

fn next_delay(backoff: &mut ExponentialBackoff, cap: Duration) -> Duration {
    backoff.next_backoff().unwrap_or(cap)
}
