use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BackendError, ProvisioningBackend, ProvisioningHandle, ResourceObservation};
use crate::catalog::ResourceType;
use crate::config::settings::BackendConfig;
use crate::models::{ResourceRecommendation, ResourceStatus};

/// Scripted behaviour for the next provision call of a named resource
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Provision and become Active after the configured number of polls
    Succeed,
    /// Reject the provision call itself
    Reject(BackendError),
    /// Acknowledge, then report Error on the first poll
    FailAfterSubmit(String),
    /// Acknowledge, then fail this many polls with `Unavailable` before behaving normally
    FlakyPolls(u32),
    /// Acknowledge and stay Pending forever
    Hang,
}

#[derive(Debug)]
struct SimResource {
    handle: ProvisioningHandle,
    outcome: ScriptedOutcome,
    polls: u32,
    region: String,
    terminated: bool,
}

/// In-process stand-in for the cloud provider
pub struct SimulatedBackend {
    config: BackendConfig,
    counter: AtomicU64,
    resources: Mutex<HashMap<String, SimResource>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    provision_calls: Mutex<HashMap<String, u32>>,
    teardowns: Mutex<Vec<String>>,
}

impl SimulatedBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            counter: AtomicU64::new(0),
            resources: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            provision_calls: Mutex::new(HashMap::new()),
            teardowns: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for successive provision calls of `name`
    pub async fn script(&self, name: &str, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.scripts
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub async fn provision_calls(&self, name: &str) -> u32 {
        self.provision_calls
            .lock()
            .await
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub async fn torn_down(&self) -> Vec<String> {
        self.teardowns.lock().await.clone()
    }

    fn next_ocid(&self, resource_type: ResourceType, name: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!(
            "ocid1.{}.oc1..{}{:06}",
            ocid_segment(resource_type),
            name.to_lowercase(),
            n
        )
    }

    fn readiness_polls(&self, resource_type: ResourceType) -> u32 {
        match resource_type {
            ResourceType::Database | ResourceType::Kubernetes => self.config.readiness_polls + 1,
            _ => self.config.readiness_polls,
        }
    }

    fn active_observation(&self, resource: &SimResource) -> ResourceObservation {
        let ocid = &resource.handle.provider_id;
        let (details, access_info) = match resource.handle.resource_type {
            ResourceType::Compute => (
                json!({"compartment_id": self.config.compartment_id, "region": resource.region, "lifecycle_state": "RUNNING"}),
                json!({"public_ip": "203.0.113.10", "ssh_user": "opc"}),
            ),
            ResourceType::Network => (
                json!({"compartment_id": self.config.compartment_id, "region": resource.region, "lifecycle_state": "AVAILABLE"}),
                json!({"subnet_id": format!("{}-subnet", ocid)}),
            ),
            ResourceType::LoadBalancer => (
                json!({"region": resource.region, "lifecycle_state": "ACTIVE"}),
                json!({"ip_address": "203.0.113.20"}),
            ),
            ResourceType::Database => (
                json!({"region": resource.region, "lifecycle_state": "AVAILABLE"}),
                json!({"connection_string": format!("{}.adb.{}.oraclecloud.com:1522", resource.handle.name.to_lowercase(), resource.region)}),
            ),
            ResourceType::Storage => (
                json!({"region": resource.region, "lifecycle_state": "AVAILABLE"}),
                json!({"volume_id": ocid}),
            ),
            ResourceType::Kubernetes => (
                json!({"region": resource.region, "lifecycle_state": "ACTIVE"}),
                json!({"endpoint": "https://203.0.113.30:6443"}),
            ),
        };
        ResourceObservation {
            status: ResourceStatus::Active,
            error_detail: None,
            details: Some(details),
            access_info: Some(access_info),
        }
    }
}

fn ocid_segment(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Compute => "instance",
        ResourceType::Network => "vcn",
        ResourceType::Storage => "volume",
        ResourceType::Database => "autonomousdatabase",
        ResourceType::LoadBalancer => "loadbalancer",
        ResourceType::Kubernetes => "cluster",
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(BackendConfig::default())
    }
}

#[async_trait]
impl ProvisioningBackend for SimulatedBackend {
    async fn provision(
        &self,
        recommendation: &ResourceRecommendation,
    ) -> Result<ProvisioningHandle, BackendError> {
        *self
            .provision_calls
            .lock()
            .await
            .entry(recommendation.name.clone())
            .or_insert(0) += 1;

        let outcome = self
            .scripts
            .lock()
            .await
            .get_mut(&recommendation.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(ScriptedOutcome::Succeed);

        if let ScriptedOutcome::Reject(err) = &outcome {
            debug!(resource = %recommendation.name, error = %err, "Simulated provision rejected");
            return Err(err.clone());
        }

        let handle = ProvisioningHandle {
            provider_id: self.next_ocid(recommendation.resource_type, &recommendation.name),
            name: recommendation.name.clone(),
            resource_type: recommendation.resource_type,
        };
        let region = recommendation
            .configuration
            .get("region")
            .and_then(|v| v.as_str())
            .unwrap_or("us-ashburn-1")
            .to_string();

        info!(resource = %handle.name, provider_id = %handle.provider_id, "Simulated provision accepted");
        self.resources.lock().await.insert(
            handle.provider_id.clone(),
            SimResource {
                handle: handle.clone(),
                outcome,
                polls: 0,
                region,
                terminated: false,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &ProvisioningHandle) -> Result<ResourceObservation, BackendError> {
        let mut resources = self.resources.lock().await;
        let resource = resources
            .get_mut(&handle.provider_id)
            .ok_or_else(|| BackendError::NotFound(handle.provider_id.clone()))?;

        if resource.terminated {
            return Ok(ResourceObservation {
                status: ResourceStatus::Terminated,
                ..ResourceObservation::pending()
            });
        }

        resource.polls += 1;
        match resource.outcome.clone() {
            ScriptedOutcome::FailAfterSubmit(detail) => Ok(ResourceObservation {
                status: ResourceStatus::Error,
                error_detail: Some(detail),
                ..ResourceObservation::pending()
            }),
            ScriptedOutcome::Hang => Ok(ResourceObservation::pending()),
            ScriptedOutcome::FlakyPolls(n) if resource.polls <= n => Err(BackendError::Unavailable(
                format!("simulated throttling on poll {}", resource.polls),
            )),
            ScriptedOutcome::FlakyPolls(n) => {
                if resource.polls - n >= self.readiness_polls(handle.resource_type) {
                    Ok(self.active_observation(resource))
                } else {
                    Ok(ResourceObservation::pending())
                }
            }
            _ => {
                if resource.polls >= self.readiness_polls(handle.resource_type) {
                    Ok(self.active_observation(resource))
                } else {
                    Ok(ResourceObservation::pending())
                }
            }
        }
    }

    async fn teardown(&self, provider_id: &str) -> Result<(), BackendError> {
        let mut resources = self.resources.lock().await;
        let resource = resources
            .get_mut(provider_id)
            .ok_or_else(|| BackendError::NotFound(provider_id.to_string()))?;
        resource.terminated = true;
        self.teardowns.lock().await.push(provider_id.to_string());
        info!(provider_id = %provider_id, "Simulated teardown");
        Ok(())
    }
}
