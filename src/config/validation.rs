//! Configuration validation for the Cloudwright server

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, info, warn};

use crate::catalog::ResourceType;
use crate::config::settings::{
    AuthConfig, OrchestratorConfig, PricingConfig, ServerConfig, ServerSection,
};

/// Collects configuration warnings and errors
pub struct ConfigurationValidator {
    /// Whether to perform strict validation (fails on warnings)
    strict_mode: bool,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConfigurationValidator {
    pub fn new(strict_mode: bool) -> Self {
        Self {
            strict_mode,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Validate complete configuration
    pub fn validate_settings(&mut self, config: &ServerConfig) -> Result<()> {
        info!("Starting configuration validation");

        self.validate_server_section(&config.server);
        self.validate_orchestrator_config(&config.orchestrator);
        self.validate_pricing_config(&config.pricing);
        self.validate_auth_config(&config.auth);

        if config.analysis.default_region.trim().is_empty() {
            self.errors.push("analysis.default_region must not be empty".to_string());
        }

        if let Some(dir) = &config.store.journal_dir {
            if let Some(parent) = Path::new(dir).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    self.warnings.push(format!(
                        "Journal directory parent does not exist yet: {:?}",
                        parent
                    ));
                }
            }
        }

        self.print_validation_summary();

        if !self.errors.is_empty() {
            return Err(anyhow::anyhow!(
                "Configuration validation failed with {} errors",
                self.errors.len()
            ));
        }

        if self.strict_mode && !self.warnings.is_empty() {
            return Err(anyhow::anyhow!(
                "Configuration validation failed in strict mode with {} warnings",
                self.warnings.len()
            ));
        }

        info!("Configuration validation passed");
        Ok(())
    }

    fn validate_server_section(&mut self, server: &ServerSection) {
        match server.transport.as_str() {
            "stdio" => {}
            "socket" => match &server.socket_path {
                None => self
                    .errors
                    .push("Socket transport requires socket_path to be set".to_string()),
                Some(path) => {
                    if let Some(parent) = Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() && !parent.exists() {
                            self.errors.push(format!(
                                "Socket path parent directory does not exist: {:?}",
                                parent
                            ));
                        }
                    }
                }
            },
            "http" => {
                if server.http_addr.parse::<std::net::SocketAddr>().is_err() {
                    self.errors
                        .push(format!("Invalid http_addr: {}", server.http_addr));
                }
            }
            other => {
                self.errors.push(format!(
                    "Invalid transport type: {}. Must be 'stdio', 'socket' or 'http'",
                    other
                ));
            }
        }

        match server.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                self.warnings.push(format!(
                    "Non-standard log level: {}. Recommended: trace, debug, info, warn, error",
                    other
                ));
            }
        }
    }

    fn validate_orchestrator_config(&mut self, orchestrator: &OrchestratorConfig) {
        if orchestrator.max_concurrent_requests == 0 {
            self.errors
                .push("max_concurrent_requests must be greater than 0".to_string());
        } else if orchestrator.max_concurrent_requests > 200 {
            self.warnings.push(format!(
                "max_concurrent_requests is very high ({}). Backend quotas may be exhausted",
                orchestrator.max_concurrent_requests
            ));
        }

        if orchestrator.max_resource_attempts == 0 {
            self.errors
                .push("max_resource_attempts must be at least 1".to_string());
        }

        if orchestrator.provisioning_timeout_secs == 0 {
            self.errors
                .push("provisioning_timeout_secs must be greater than 0".to_string());
        } else if orchestrator.provisioning_timeout_secs < 60 {
            self.warnings.push(
                "provisioning_timeout_secs is very short (< 60s). Databases rarely come up that fast"
                    .to_string(),
            );
        }

        if orchestrator.backoff_cap_ms < orchestrator.backoff_initial_ms {
            self.errors
                .push("backoff_cap_ms must not be lower than backoff_initial_ms".to_string());
        }

        if orchestrator.default_poll_interval_ms == 0 {
            self.errors
                .push("default_poll_interval_ms must be greater than 0".to_string());
        }

        let known: HashSet<&str> = ResourceType::all().iter().map(|t| t.as_str()).collect();
        for (name, interval) in &orchestrator.poll_intervals_ms {
            if !known.contains(name.as_str()) {
                self.warnings
                    .push(format!("Poll interval set for unknown resource type: {}", name));
            }
            if *interval == 0 {
                self.errors
                    .push(format!("Poll interval for {} must be greater than 0", name));
            }
        }

        if orchestrator.retention_sweep_interval_secs == 0 {
            self.errors
                .push("retention_sweep_interval_secs must be greater than 0".to_string());
        }
    }

    fn validate_pricing_config(&mut self, pricing: &PricingConfig) {
        let prices = [
            ("compute_ocpu_month", pricing.compute_ocpu_month),
            ("load_balancer_base_month", pricing.load_balancer_base_month),
            ("load_balancer_mbps_hour", pricing.load_balancer_mbps_hour),
            ("hours_per_month", pricing.hours_per_month),
            ("database_ocpu_month", pricing.database_ocpu_month),
            ("storage_gb_month", pricing.storage_gb_month),
            ("bucket_default_gb", pricing.bucket_default_gb),
        ];
        for (name, value) in prices {
            if !value.is_finite() || value < 0.0 {
                self.errors
                    .push(format!("pricing.{} must be a non-negative number", name));
            }
        }
    }

    fn validate_auth_config(&mut self, auth: &AuthConfig) {
        let mut seen = HashSet::new();
        for entry in &auth.tokens {
            if entry.token.len() < 16 {
                self.warnings.push(format!(
                    "Token for principal '{}' is short (< 16 chars)",
                    entry.principal
                ));
            }
            if entry.principal.trim().is_empty() {
                self.errors.push("Token entries need a principal".to_string());
            }
            if !seen.insert(entry.token.as_str()) {
                self.errors.push("Duplicate auth token configured".to_string());
            }
        }

        if auth.tokens.is_empty() && !auth.allow_anonymous {
            self.errors.push(
                "No auth tokens configured and anonymous access disabled; no caller can connect"
                    .to_string(),
            );
        }

        if auth.allow_anonymous {
            self.warnings.push(
                "Anonymous access is enabled. Configure auth tokens for shared deployments"
                    .to_string(),
            );
        }
    }

    fn print_validation_summary(&self) {
        if !self.warnings.is_empty() {
            warn!("Configuration warnings ({}):", self.warnings.len());
            for (i, warning) in self.warnings.iter().enumerate() {
                warn!("  {}: {}", i + 1, warning);
            }
        }

        if !self.errors.is_empty() {
            error!("Configuration errors ({}):", self.errors.len());
            for (i, error) in self.errors.iter().enumerate() {
                error!("  {}: {}", i + 1, error);
            }
        }

        info!(
            "Configuration validation completed with {} warnings and {} errors",
            self.warnings.len(),
            self.errors.len()
        );
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Quick validation function for use in main application
pub fn validate_configuration(config: &ServerConfig, strict: bool) -> Result<()> {
    let mut validator = ConfigurationValidator::new(strict);
    validator.validate_settings(config)
}
