use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::models::CostPreference;

/// Server-wide configuration loaded from config.toml, inline JSON or environment variables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub orchestrator: OrchestratorConfig,
    pub analysis: AnalysisConfig,
    pub pricing: PricingConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// One of "stdio", "socket", "http"
    pub transport: String,
    pub socket_path: Option<String>,
    pub http_addr: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_requests: usize,
    pub provisioning_timeout_secs: u64,
    pub request_retention_secs: u64,
    pub retention_sweep_interval_secs: u64,
    pub max_resource_attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_cap_ms: u64,
    pub default_poll_interval_ms: u64,
    /// Poll interval overrides keyed by resource type name ("compute", "database", ...)
    pub poll_intervals_ms: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub default_region: String,
    pub default_cost_preference: CostPreference,
}

/// Monthly price table in USD
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub compute_ocpu_month: f64,
    pub load_balancer_base_month: f64,
    pub load_balancer_mbps_hour: f64,
    pub hours_per_month: f64,
    pub database_ocpu_month: f64,
    pub storage_gb_month: f64,
    pub bucket_default_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: Vec<TokenEntry>,
    /// Accept calls without a credential as the "anonymous" principal
    pub allow_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenEntry {
    pub token: String,
    pub principal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub journal_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub compartment_id: String,
    /// Polls before a simulated resource turns Active
    pub readiness_polls: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            socket_path: Some("/tmp/cloudwright.sock".to_string()),
            http_addr: "127.0.0.1:8000".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            provisioning_timeout_secs: 1800,
            request_retention_secs: 86_400,
            retention_sweep_interval_secs: 300,
            max_resource_attempts: 3,
            backoff_initial_ms: 500,
            backoff_cap_ms: 30_000,
            default_poll_interval_ms: 2_000,
            poll_intervals_ms: HashMap::from([
                ("database".to_string(), 10_000),
                ("load_balancer".to_string(), 5_000),
            ]),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_region: "us-ashburn-1".to_string(),
            default_cost_preference: CostPreference::Balanced,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            compute_ocpu_month: 50.0,
            load_balancer_base_month: 10.0,
            load_balancer_mbps_hour: 0.0017,
            hours_per_month: 730.0,
            database_ocpu_month: 900.0,
            storage_gb_month: 0.0255,
            bucket_default_gb: 100.0,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            allow_anonymous: true,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            compartment_id: "ocid1.compartment.oc1..cloudwright".to_string(),
            readiness_polls: 2,
        }
    }
}

impl OrchestratorConfig {
    pub fn provisioning_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning_timeout_secs)
    }

    pub fn request_retention(&self) -> Duration {
        Duration::from_secs(self.request_retention_secs)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    /// Poll interval for a resource type, falling back to the default
    pub fn poll_interval(&self, resource_type: &str) -> Duration {
        let ms = self
            .poll_intervals_ms
            .get(resource_type)
            .copied()
            .unwrap_or(self.default_poll_interval_ms);
        Duration::from_millis(ms)
    }
}

/// A named layer that contributed to the resolved configuration
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub name: String,
    pub priority: u8,
}

/// Configuration resolved from every layer, highest priority first
#[derive(Debug, Clone)]
pub struct ConfigurationHierarchy {
    pub resolved: ServerConfig,
    pub sources: Vec<ConfigSource>,
}

impl ConfigurationHierarchy {
    /// Default user config location: `<config_dir>/cloudwright/config.toml`
    pub fn default_user_config_path() -> Result<PathBuf> {
        if let Ok(custom_path) = std::env::var("CLOUDWRIGHT_CONFIG_PATH") {
            return Ok(PathBuf::from(custom_path));
        }
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("No configuration directory for this platform"))?;
        Ok(dir.join("cloudwright").join("config.toml"))
    }

    /// Resolve inline JSON > config file > defaults
    pub fn load_with_precedence(
        inline: Option<&ServerConfig>,
        config_file: Option<PathBuf>,
    ) -> Result<Self> {
        let mut sources = Vec::new();

        let resolved = if let Some(config) = inline {
            sources.push(ConfigSource {
                name: "inline JSON".to_string(),
                priority: 1,
            });
            config.clone()
        } else if let Some(path) = config_file {
            sources.push(ConfigSource {
                name: format!("file {}", path.display()),
                priority: 2,
            });
            ServerConfig::from_file(&path)?
        } else {
            sources.push(ConfigSource {
                name: "defaults".to_string(),
                priority: 3,
            });
            ServerConfig::default()
        };

        Ok(Self { resolved, sources })
    }

    /// Apply `CLOUDWRIGHT_*` environment overrides on top of the resolved layers
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("CLOUDWRIGHT_"))
            .collect();
        let applied = self.resolved.apply_overrides(&vars)?;
        if applied > 0 {
            self.sources.insert(
                0,
                ConfigSource {
                    name: format!("environment ({} overrides)", applied),
                    priority: 0,
                },
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        super::validation::validate_configuration(&self.resolved, false)
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from a `CLOUDWRIGHT_*` variable map, returning how many were applied
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<usize> {
        let mut applied = 0;
        for (key, value) in vars {
            let known = match key.as_str() {
                "CLOUDWRIGHT_TRANSPORT" => {
                    self.server.transport = value.clone();
                    true
                }
                "CLOUDWRIGHT_SOCKET_PATH" => {
                    self.server.socket_path = Some(value.clone());
                    true
                }
                "CLOUDWRIGHT_HTTP_ADDR" => {
                    self.server.http_addr = value.clone();
                    true
                }
                "CLOUDWRIGHT_LOG_LEVEL" => {
                    self.server.log_level = value.clone();
                    true
                }
                "CLOUDWRIGHT_MAX_CONCURRENT_REQUESTS" => {
                    self.orchestrator.max_concurrent_requests = parse_var(key, value)?;
                    true
                }
                "CLOUDWRIGHT_PROVISIONING_TIMEOUT_SECS" => {
                    self.orchestrator.provisioning_timeout_secs = parse_var(key, value)?;
                    true
                }
                "CLOUDWRIGHT_REQUEST_RETENTION_SECS" => {
                    self.orchestrator.request_retention_secs = parse_var(key, value)?;
                    true
                }
                "CLOUDWRIGHT_MAX_RESOURCE_ATTEMPTS" => {
                    self.orchestrator.max_resource_attempts = parse_var(key, value)?;
                    true
                }
                "CLOUDWRIGHT_DEFAULT_REGION" => {
                    self.analysis.default_region = value.clone();
                    true
                }
                "CLOUDWRIGHT_JOURNAL_DIR" => {
                    self.store.journal_dir = Some(value.clone());
                    true
                }
                _ => false,
            };
            if known {
                applied += 1;
            }
        }
        Ok(applied)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let config = ServerConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.orchestrator.max_resource_attempts, 3);
        assert_eq!(parsed.pricing.compute_ocpu_month, 50.0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[orchestrator]\nmax_concurrent_requests = 2\n[analysis]\ndefault_region = \"eu-frankfurt-1\"\n",
        )
        .unwrap();

        let hierarchy = ConfigurationHierarchy::load_with_precedence(None, Some(path)).unwrap();
        assert_eq!(hierarchy.resolved.orchestrator.max_concurrent_requests, 2);
        assert_eq!(hierarchy.resolved.analysis.default_region, "eu-frankfurt-1");
        assert_eq!(hierarchy.resolved.orchestrator.provisioning_timeout_secs, 1800);
        assert_eq!(hierarchy.sources[0].priority, 2);
    }

    #[test]
    fn test_inline_config_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[orchestrator]\nmax_concurrent_requests = 2\n").unwrap();

        let mut inline = ServerConfig::default();
        inline.orchestrator.max_concurrent_requests = 7;

        let hierarchy =
            ConfigurationHierarchy::load_with_precedence(Some(&inline), Some(path)).unwrap();
        assert_eq!(hierarchy.resolved.orchestrator.max_concurrent_requests, 7);
    }

    #[test]
    fn test_overrides_from_variables() {
        let mut config = ServerConfig::default();
        let vars = HashMap::from([
            ("CLOUDWRIGHT_MAX_CONCURRENT_REQUESTS".to_string(), "4".to_string()),
            ("CLOUDWRIGHT_TRANSPORT".to_string(), "http".to_string()),
            ("CLOUDWRIGHT_UNRELATED".to_string(), "x".to_string()),
        ]);

        let applied = config.apply_overrides(&vars).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(config.orchestrator.max_concurrent_requests, 4);
        assert_eq!(config.server.transport, "http");
    }

    #[test]
    fn test_bad_override_value_is_rejected() {
        let mut config = ServerConfig::default();
        let vars = HashMap::from([(
            "CLOUDWRIGHT_MAX_RESOURCE_ATTEMPTS".to_string(),
            "many".to_string(),
        )]);
        assert!(config.apply_overrides(&vars).is_err());
    }

    #[test]
    fn test_poll_interval_per_type() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval("database"), Duration::from_secs(10));
        assert_eq!(config.poll_interval("compute"), Duration::from_secs(2));
    }
}
