use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use super::resource::{ProvisionedResource, ResourceRecommendation, ResourceStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Created,
    Analyzing,
    AwaitingConfirmation,
    Provisioning,
    Completed,
    Failed,
}

impl RequestState {
    pub fn all() -> &'static [RequestState] {
        &[
            RequestState::Created,
            RequestState::Analyzing,
            RequestState::AwaitingConfirmation,
            RequestState::Provisioning,
            RequestState::Completed,
            RequestState::Failed,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, Created)
                | (Created, Analyzing)
                | (Analyzing, AwaitingConfirmation)
                | (Analyzing, Created)
                | (AwaitingConfirmation, Analyzing)
                | (AwaitingConfirmation, Provisioning)
                | (AwaitingConfirmation, Failed)
                | (Provisioning, Provisioning)
                | (Provisioning, Completed)
                | (Provisioning, Failed)
                | (Failed, Failed)
                | (Failed, Provisioning)
        )
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Created => write!(f, "created"),
            RequestState::Analyzing => write!(f, "analyzing"),
            RequestState::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            RequestState::Provisioning => write!(f, "provisioning"),
            RequestState::Completed => write!(f, "completed"),
            RequestState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    ResourceErrors,
    Cancelled,
    Interrupted,
}

impl FailureReason {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureReason::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Failure {
    pub reason: FailureReason,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostPreference {
    #[default]
    Balanced,
    CostOptimized,
    Performance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserPreferences {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub cost_preference: Option<CostPreference>,
    /// Monthly budget in USD
    #[serde(default)]
    pub budget: Option<f64>,
}

/// One end-to-end provisioning conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: String,
    pub owner: String,
    pub state: RequestState,
    pub conversation_context: Vec<ConversationMessage>,
    pub context_fingerprint: String,
    #[serde(default)]
    pub preferences: UserPreferences,
    /// Region chosen by the last analysis
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<ResourceRecommendation>,
    #[serde(default)]
    pub provisioned_resources: Vec<ProvisionedResource>,
    pub progress: u8,
    #[serde(default)]
    pub provisioning_attempt: u32,
    #[serde(default)]
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub provisioning_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once a teardown removed resources; such requests are never retried
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torn_down_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        conversation: Vec<ConversationMessage>,
        preferences: UserPreferences,
    ) -> Self {
        let now = Utc::now();
        let context_fingerprint = fingerprint(&conversation);
        Self {
            id: id.into(),
            owner: owner.into(),
            state: RequestState::Created,
            conversation_context: conversation,
            context_fingerprint,
            preferences,
            region: None,
            recommendations: Vec::new(),
            provisioned_resources: Vec::new(),
            progress: 0,
            provisioning_attempt: 0,
            failure: None,
            created_at: now,
            updated_at: now,
            provisioning_started_at: None,
            finished_at: None,
            torn_down_at: None,
        }
    }

    pub fn recommendation(&self, name: &str) -> Option<&ResourceRecommendation> {
        self.recommendations.iter().find(|r| r.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&ProvisionedResource> {
        self.provisioned_resources.iter().find(|r| r.name == name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut ProvisionedResource> {
        self.provisioned_resources.iter_mut().find(|r| r.name == name)
    }

    pub fn total_estimated_cost(&self) -> f64 {
        self.recommendations
            .iter()
            .map(|r| r.estimated_monthly_cost)
            .sum()
    }

    pub fn all_resources_terminal(&self) -> bool {
        self.provisioned_resources
            .iter()
            .all(|r| r.status.is_terminal())
    }

    /// Share of resources that reached a terminal status, as a percentage
    pub fn computed_progress(&self) -> u8 {
        let total = self.provisioned_resources.len();
        if total == 0 {
            return 0;
        }
        let terminal = self
            .provisioned_resources
            .iter()
            .filter(|r| r.status.is_terminal())
            .count();
        ((terminal * 100) / total) as u8
    }

    /// Raise progress to the computed value, never lowering it
    pub fn refresh_progress(&mut self) {
        self.progress = self.progress.max(self.computed_progress());
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// SHA-256 over the (role, content) pairs of a conversation; timestamps are excluded
pub fn fingerprint(conversation: &[ConversationMessage]) -> String {
    let mut hasher = Sha256::new();
    for message in conversation {
        hasher.update((message.role.len() as u64).to_le_bytes());
        hasher.update(message.role.as_bytes());
        hasher.update((message.content.len() as u64).to_le_bytes());
        hasher.update(message.content.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Check a candidate write against the lifecycle rules, returning the violation if any
pub fn validate_transition(before: &Request, after: &Request) -> Result<(), String> {
    use RequestState::*;

    if before.id != after.id || before.owner != after.owner {
        return Err("request identity is immutable".to_string());
    }

    if !before.state.can_transition_to(after.state) {
        return Err(format!("{} -> {} is not a lifecycle edge", before.state, after.state));
    }

    if after.provisioning_attempt < before.provisioning_attempt {
        return Err("provisioning attempt cannot go backwards".to_string());
    }
    let entering_provisioning = after.state == Provisioning && before.state != Provisioning;
    if entering_provisioning {
        if after.provisioning_attempt != before.provisioning_attempt + 1 {
            return Err("each provisioning attempt must be numbered once".to_string());
        }
    } else if after.provisioning_attempt != before.provisioning_attempt {
        return Err("provisioning attempt only advances when provisioning starts".to_string());
    }

    let recommendations_open = matches!(before.state, Created | Analyzing)
        || (before.state == AwaitingConfirmation && after.state == Analyzing);
    if !recommendations_open && before.recommendations != after.recommendations {
        return Err("recommendations are frozen until a new analysis".to_string());
    }

    match (before.state, after.state) {
        (Created, Analyzing) if after.conversation_context.is_empty() => {
            return Err("cannot analyze an empty conversation".to_string());
        }
        (Analyzing, AwaitingConfirmation) if after.recommendations.is_empty() => {
            return Err("awaiting confirmation requires recommendations".to_string());
        }
        (AwaitingConfirmation, Failed) => {
            let cancelled = after
                .failure
                .as_ref()
                .map(|f| f.reason == FailureReason::Cancelled)
                .unwrap_or(false);
            if !cancelled {
                return Err("an unconfirmed request can only fail by cancellation".to_string());
            }
        }
        (Failed, Provisioning) => {
            let retryable = before
                .failure
                .as_ref()
                .map(|f| f.reason.is_retryable())
                .unwrap_or(false);
            if !retryable {
                return Err("cancelled requests cannot be retried".to_string());
            }
        }
        (Provisioning, Provisioning) if after.progress < before.progress => {
            return Err(format!(
                "progress cannot decrease ({} -> {})",
                before.progress, after.progress
            ));
        }
        _ => {}
    }

    if after.state == Completed {
        if after.progress != 100 {
            return Err("completed requests report 100% progress".to_string());
        }
        if after
            .provisioned_resources
            .iter()
            .any(|r| r.status != ResourceStatus::Active)
        {
            return Err("completed requires every resource to be active".to_string());
        }
    }

    if after.progress > 100 {
        return Err("progress is a percentage".to_string());
    }

    let mut seen = HashSet::new();
    for resource in &after.provisioned_resources {
        if after.recommendation(&resource.name).is_none() {
            return Err(format!(
                "resource {} has no matching recommendation",
                resource.name
            ));
        }
        if !seen.insert(resource.name.as_str()) {
            return Err(format!("resource {} tracked twice", resource.name));
        }
    }

    Ok(())
}
