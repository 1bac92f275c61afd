// Public exports for data models

pub mod request;
pub mod resource;

pub use request::{
    fingerprint, validate_transition, ConversationMessage, CostPreference, Failure,
    FailureReason, Request, RequestState, UserPreferences,
};
pub use resource::{
    ConfirmedResource, ProvisionedResource, ResourceRecommendation, ResourceStatus, SubmissionPhase,
};
