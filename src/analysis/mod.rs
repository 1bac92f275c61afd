//! Recommendation engine: turns a conversation into resource recommendations.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{ConversationMessage, ResourceRecommendation, UserPreferences};
use crate::{CloudwrightError, CloudwrightResult};

pub mod rules;

pub use rules::RuleBasedAnalyzer;

/// Result of one analysis pass
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub recommendations: Vec<ResourceRecommendation>,
    pub region: String,
    /// Human-readable remarks, e.g. budget overruns
    pub notes: Vec<String>,
}

/// Pluggable requirements analyzer.
///
/// Implementations must be deterministic for a given conversation and
/// preferences, and fail with `InsufficientContext` when the conversation
/// carries no usable signal.
#[async_trait]
pub trait RequirementsAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        conversation: &[ConversationMessage],
        preferences: &UserPreferences,
    ) -> CloudwrightResult<AnalysisOutcome>;
}

/// Check the engine contract: non-empty, unique names, non-negative costs,
/// and dependencies that name siblings.
pub fn check_recommendations(recommendations: &[ResourceRecommendation]) -> CloudwrightResult<()> {
    if recommendations.is_empty() {
        return Err(CloudwrightError::insufficient_context(
            "the analyzer produced no recommendations",
        ));
    }

    let mut names = HashSet::new();
    for rec in recommendations {
        if !names.insert(rec.name.as_str()) {
            return Err(CloudwrightError::Internal(format!(
                "analyzer produced duplicate resource name {}",
                rec.name
            )));
        }
        if rec.estimated_monthly_cost.is_nan() || rec.estimated_monthly_cost < 0.0 {
            return Err(CloudwrightError::Internal(format!(
                "analyzer produced an invalid cost for {}",
                rec.name
            )));
        }
    }

    for rec in recommendations {
        for dep in &rec.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(CloudwrightError::Internal(format!(
                    "{} depends on unknown resource {}",
                    rec.name, dep
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceType;

    #[test]
    fn test_duplicate_names_rejected() {
        let recs = vec![
            ResourceRecommendation::new(ResourceType::Compute, "A", "", 1.0),
            ResourceRecommendation::new(ResourceType::Network, "A", "", 0.0),
        ];
        assert!(matches!(
            check_recommendations(&recs),
            Err(CloudwrightError::Internal(_))
        ));
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let recs = vec![ResourceRecommendation::new(ResourceType::Compute, "A", "", 1.0).depends_on("B")];
        assert!(check_recommendations(&recs).is_err());
    }

    #[test]
    fn test_empty_set_is_insufficient_context() {
        assert!(matches!(
            check_recommendations(&[]),
            Err(CloudwrightError::InsufficientContext { .. })
        ));
    }
}
