//! Caller authentication.
//!
//! Transports turn a bearer credential into a [`CallerIdentity`] before calling
//! the orchestrator; nothing downstream reads credentials from ambient state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::settings::AuthConfig;
use crate::{CloudwrightError, CloudwrightResult};

pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub principal: String,
}

impl CallerIdentity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_PRINCIPAL)
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal == ANONYMOUS_PRINCIPAL
    }
}

pub trait Authenticator: Send + Sync {
    /// Validate an optional bearer credential
    fn authenticate(&self, credential: Option<&str>) -> CloudwrightResult<CallerIdentity>;
}

/// Authenticates against a fixed token table from configuration
pub struct StaticTokenAuthenticator {
    /// SHA-256 of token -> principal
    principals: HashMap<String, String>,
    allow_anonymous: bool,
}

fn digest(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl StaticTokenAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let principals = config
            .tokens
            .iter()
            .map(|entry| (digest(&entry.token), entry.principal.clone()))
            .collect();
        Self {
            principals,
            allow_anonymous: config.allow_anonymous,
        }
    }

    /// Strip an optional `Bearer ` scheme prefix
    pub fn bearer_token(header: &str) -> &str {
        let trimmed = header.trim();
        match trimmed.split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => trimmed,
        }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, credential: Option<&str>) -> CloudwrightResult<CallerIdentity> {
        let token = credential
            .map(Self::bearer_token)
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => self
                .principals
                .get(&digest(token))
                .map(|principal| CallerIdentity::new(principal.clone()))
                .ok_or_else(|| CloudwrightError::unauthorized("invalid credential")),
            None if self.allow_anonymous => Ok(CallerIdentity::anonymous()),
            None => Err(CloudwrightError::unauthorized("missing credential")),
        }
    }
}
