//! CLI utility functions.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::config::settings::{ConfigurationHierarchy, ServerConfig};
use crate::handlers::AnalyzeRequirementsRequest;
use crate::models::ConversationMessage;

/// Load request parameters from file or inline JSON
pub fn load_request_params(
    params_file: Option<PathBuf>,
    params_json: Option<String>,
    command_name: &str,
) -> Result<serde_json::Value> {
    match (params_file, params_json) {
        (Some(path), None) => {
            if !path.exists() {
                anyhow::bail!("Parameters file not found: {}", path.display());
            }
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse JSON from {}: {}", path.display(), e))
        }
        (None, Some(json_str)) => serde_json::from_str(&json_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse inline JSON: {}", e)),
        (None, None) => {
            anyhow::bail!(
                "No parameters provided for {}. Use --params-file or --params-json.",
                command_name
            );
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("Cannot use both --params-file and --params-json");
        }
    }
}

/// Build an analyze payload from `--message` turns or a JSON payload
pub fn build_analyze_request(
    request_id: Option<String>,
    messages: Vec<String>,
    params_file: Option<PathBuf>,
    params_json: Option<String>,
) -> Result<AnalyzeRequirementsRequest> {
    let mut request = if messages.is_empty() {
        let params = load_request_params(params_file, params_json, "analyze")?;
        serde_json::from_value::<AnalyzeRequirementsRequest>(params)
            .map_err(|e| anyhow::anyhow!("Invalid analyze payload: {}", e))?
    } else {
        AnalyzeRequirementsRequest {
            request_id: None,
            conversation_context: messages
                .into_iter()
                .map(|content| ConversationMessage::new("user", content))
                .collect(),
            user_preferences: None,
        }
    };

    if request_id.is_some() {
        request.request_id = request_id;
    }
    Ok(request)
}

/// Load server configuration with hierarchy (CLI > file > defaults)
pub fn load_server_config(
    config_path: Option<PathBuf>,
    config_json: Option<String>,
) -> Result<ServerConfig> {
    let cli_override = match config_json {
        Some(json_str) => {
            info!("Using inline JSON configuration");
            Some(
                serde_json::from_str::<ServerConfig>(&json_str)
                    .map_err(|e| anyhow::anyhow!("Failed to parse config JSON: {}", e))?,
            )
        }
        None => None,
    };

    let user_config_path = if let Some(path) = config_path {
        info!("Using custom config file: {}", path.display());
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        Some(path)
    } else {
        match ConfigurationHierarchy::default_user_config_path() {
            Ok(path) if path.exists() => {
                info!("Using default config file: {}", path.display());
                Some(path)
            }
            Ok(path) => {
                info!("No config file found at {}, using defaults", path.display());
                None
            }
            Err(e) => {
                info!("Could not determine default config path: {}, using defaults", e);
                None
            }
        }
    };

    let mut hierarchy =
        ConfigurationHierarchy::load_with_precedence(cli_override.as_ref(), user_config_path)?;
    hierarchy.apply_env_overrides()?;

    for source in &hierarchy.sources {
        info!("Config source [priority {}]: {}", source.priority, source.name);
    }

    hierarchy.validate()?;
    Ok(hierarchy.resolved)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
