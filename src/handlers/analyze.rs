use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use super::{validate_request, validate_request_id};
use crate::auth::CallerIdentity;
use crate::models::{ConversationMessage, UserPreferences};
use crate::orchestrator::{AnalysisResult, AnalyzeInput, Orchestrator};
use crate::CloudwrightResult;

/// Request type for the analyze_requirements operation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_preferences"))]
pub struct AnalyzeRequirementsRequest {
    /// Continue an existing request instead of matching by conversation
    #[serde(default)]
    #[validate(custom(function = "validate_request_id"))]
    pub request_id: Option<String>,
    #[validate(length(min = 1, max = 500, message = "Must provide 1-500 messages"))]
    #[validate(custom(function = "validate_conversation"))]
    pub conversation_context: Vec<ConversationMessage>,
    #[serde(default)]
    pub user_preferences: Option<UserPreferences>,
}

fn validate_conversation(messages: &Vec<ConversationMessage>) -> Result<(), ValidationError> {
    if messages
        .iter()
        .any(|m| m.role.trim().is_empty() || m.content.trim().is_empty())
    {
        let mut error = ValidationError::new("empty_message");
        error.message = Some("every message needs a role and content".into());
        return Err(error);
    }
    Ok(())
}

fn validate_preferences(request: &AnalyzeRequirementsRequest) -> Result<(), ValidationError> {
    let Some(preferences) = &request.user_preferences else {
        return Ok(());
    };
    if let Some(budget) = preferences.budget {
        if budget.is_nan() || budget < 0.0 {
            let mut error = ValidationError::new("invalid_budget");
            error.message = Some("budget must be a non-negative amount".into());
            return Err(error);
        }
    }
    if let Some(region) = &preferences.region {
        if region.trim().is_empty() {
            let mut error = ValidationError::new("invalid_region");
            error.message = Some("region cannot be blank".into());
            return Err(error);
        }
    }
    Ok(())
}

pub struct AnalyzeHandler {
    orchestrator: Orchestrator,
}

impl AnalyzeHandler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(
        &self,
        caller: &CallerIdentity,
        request: AnalyzeRequirementsRequest,
    ) -> CloudwrightResult<AnalysisResult> {
        validate_request(&request)?;
        info!(
            messages = request.conversation_context.len(),
            continuing = request.request_id.is_some(),
            "Processing analyze_requirements request"
        );

        self.orchestrator
            .analyze_requirements(
                caller,
                AnalyzeInput {
                    request_id: request.request_id,
                    conversation: request.conversation_context,
                    preferences: request.user_preferences,
                },
            )
            .await
    }
}
