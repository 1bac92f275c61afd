use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ResourceType;

/// A proposed cloud resource with its estimated cost
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecommendation {
    pub resource_type: ResourceType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// USD per month, never negative
    #[serde(default)]
    pub estimated_monthly_cost: f64,
    #[serde(default)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
    /// Sibling recommendations that must be Active before this one is submitted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceRecommendation {
    pub fn new(
        resource_type: ResourceType,
        name: impl Into<String>,
        description: impl Into<String>,
        estimated_monthly_cost: f64,
    ) -> Self {
        Self {
            resource_type,
            name: name.into(),
            description: description.into(),
            estimated_monthly_cost: estimated_monthly_cost.max(0.0),
            configuration: serde_json::Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.configuration.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }
}

/// One entry of a provisioning confirmation.
///
/// Clients may echo the recommendation objects from an analysis back verbatim
/// or send just their names. Either way the stored recommendation is what gets
/// provisioned; an echoed object only has to agree on `name` and `resource_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConfirmedResource {
    Name(String),
    Recommendation(ResourceRecommendation),
}

impl ConfirmedResource {
    pub fn name(&self) -> &str {
        match self {
            ConfirmedResource::Name(name) => name,
            ConfirmedResource::Recommendation(rec) => &rec.name,
        }
    }

    /// Whether this entry refers to the stored `recommendation`
    pub fn matches(&self, recommendation: &ResourceRecommendation) -> bool {
        match self {
            ConfirmedResource::Name(name) => *name == recommendation.name,
            ConfirmedResource::Recommendation(rec) => {
                rec.name == recommendation.name && rec.resource_type == recommendation.resource_type
            }
        }
    }
}

impl From<String> for ConfirmedResource {
    fn from(name: String) -> Self {
        ConfirmedResource::Name(name)
    }
}

impl From<&str> for ConfirmedResource {
    fn from(name: &str) -> Self {
        ConfirmedResource::Name(name.to_string())
    }
}

impl From<ResourceRecommendation> for ConfirmedResource {
    fn from(recommendation: ResourceRecommendation) -> Self {
        ConfirmedResource::Recommendation(recommendation)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Active,
    Error,
    Terminated,
}

impl ResourceStatus {
    /// No further backend activity is expected for the current attempt
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResourceStatus::Pending)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::Active => write!(f, "active"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Where a resource stands with respect to the backend's provision call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    #[default]
    NotSubmitted,
    /// The provision call was issued but not yet acknowledged
    Submitting,
    Acknowledged,
}

/// Backend-acknowledged counterpart of a confirmed recommendation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionedResource {
    pub name: String,
    pub resource_type: ResourceType,
    pub provider_id: Option<String>,
    pub status: ResourceStatus,
    pub error_detail: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub submission: SubmissionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_info: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl ProvisionedResource {
    pub fn pending(recommendation: &ResourceRecommendation) -> Self {
        Self {
            name: recommendation.name.clone(),
            resource_type: recommendation.resource_type,
            provider_id: None,
            status: ResourceStatus::Pending,
            error_detail: None,
            attempts: 0,
            submission: SubmissionPhase::NotSubmitted,
            details: None,
            access_info: None,
            updated_at: Utc::now(),
        }
    }

    pub fn mark_error(&mut self, detail: impl Into<String>) {
        self.status = ResourceStatus::Error;
        self.error_detail = Some(detail.into());
        self.updated_at = Utc::now();
    }

    /// Put an errored resource back in line for another attempt
    /// Failed in the last attempt, either still in Error or already cleaned up
    pub fn needs_retry(&self) -> bool {
        matches!(self.status, ResourceStatus::Error | ResourceStatus::Terminated)
    }

    pub fn reset_for_retry(&mut self) {
        self.status = ResourceStatus::Pending;
        self.error_detail = None;
        self.provider_id = None;
        self.submission = SubmissionPhase::NotSubmitted;
        self.attempts = 0;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_cost_is_clamped() {
        let rec = ResourceRecommendation::new(ResourceType::Network, "Vcn", "network", -4.0);
        assert_eq!(rec.estimated_monthly_cost, 0.0);
    }

    #[test]
    fn test_pending_resource_from_recommendation() {
        let rec = ResourceRecommendation::new(ResourceType::Compute, "WebServer", "vm", 50.0)
            .with_config("ocpus", 1)
            .depends_on("WebsiteVCN");
        let resource = ProvisionedResource::pending(&rec);

        assert_eq!(resource.name, "WebServer");
        assert_eq!(resource.status, ResourceStatus::Pending);
        assert_eq!(resource.submission, SubmissionPhase::NotSubmitted);
        assert!(!resource.status.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ResourceStatus::Terminated).unwrap(),
            "\"terminated\""
        );
        assert_eq!(
            serde_json::to_string(&SubmissionPhase::NotSubmitted).unwrap(),
            "\"not_submitted\""
        );
    }

    #[test]
    fn test_confirmation_accepts_names_and_echoed_objects() {
        let entries: Vec<ConfirmedResource> = serde_json::from_value(serde_json::json!([
            "WebServer",
            {
                "resource_type": "database",
                "name": "WebsiteDB",
                "description": "Managed database",
                "estimated_monthly_cost": 180.0,
                "configuration": {"engine": "postgres"}
            },
            {"resource_type": "storage", "name": "WebsiteStorage"}
        ]))
        .unwrap();

        assert_eq!(entries[0], ConfirmedResource::Name("WebServer".to_string()));
        assert_eq!(entries[1].name(), "WebsiteDB");
        assert_eq!(entries[2].name(), "WebsiteStorage");

        let db = ResourceRecommendation::new(ResourceType::Database, "WebsiteDB", "", 180.0);
        assert!(entries[1].matches(&db));
        let mislabeled = ResourceRecommendation::new(ResourceType::Compute, "WebsiteDB", "", 0.0);
        assert!(!entries[1].matches(&mislabeled));
        assert!(!entries[0].matches(&db));
    }
}
