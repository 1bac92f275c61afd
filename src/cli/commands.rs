//! CLI command implementations.

use anyhow::Result;
use std::path::PathBuf;
use tracing::{error, info};

use crate::client::{ConnectionState, JsonRpcClient};
use crate::config::settings::{ConfigurationHierarchy, ServerConfig};
use crate::config::validation::validate_configuration;
use crate::handlers::ConfirmProvisioningRequest;
use crate::jsonrpc::TransportConfig;
use crate::server::start_server;

use super::utils::{build_analyze_request, load_server_config, print_json};

pub struct ServeOptions {
    pub transport: Option<String>,
    pub socket_path: Option<String>,
    pub http_addr: Option<String>,
    pub config_path: Option<PathBuf>,
    pub config_json: Option<String>,
}

/// Where client commands send their calls
pub struct ClientTarget {
    pub socket: Option<String>,
    pub credential: Option<String>,
}

impl ClientTarget {
    fn client(self) -> Result<JsonRpcClient> {
        let client = ConnectionState::get_client(self.socket)?;
        info!("Using server at: {}", client.socket_path());
        Ok(client.with_credential(self.credential))
    }
}

/// Start the Cloudwright server
pub async fn serve(options: ServeOptions) -> Result<()> {
    info!("Loading configuration...");
    let mut server_config = load_server_config(options.config_path, options.config_json)?;

    if let Some(transport) = options.transport {
        server_config.server.transport = transport;
    }
    if let Some(path) = options.socket_path {
        server_config.server.socket_path = Some(path);
    }
    if let Some(addr) = options.http_addr {
        server_config.server.http_addr = addr;
    }

    let transport_config = TransportConfig::from_settings(&server_config.server)?;
    info!("Initializing server with transport: {:?}", transport_config);

    start_server(server_config, Some(transport_config)).await
}

pub async fn connect(socket_path: String) -> Result<()> {
    info!("Connecting to Cloudwright server at: {}", socket_path);

    let client = JsonRpcClient::new(socket_path.clone());
    if !client.validate_connection().await {
        anyhow::bail!("Failed to connect to server at: {}", socket_path);
    }

    ConnectionState::save(&socket_path)?;

    println!("✓ Connected to Cloudwright server at: {}", socket_path);
    println!("  Use 'cloudwright disconnect' to disconnect.");
    Ok(())
}

pub async fn disconnect() -> Result<()> {
    match ConnectionState::load()? {
        Some(socket_path) => {
            ConnectionState::clear()?;
            println!("✓ Disconnected from: {}", socket_path);
        }
        None => println!("Not currently connected to any server."),
    }
    Ok(())
}

pub async fn analyze(
    target: ClientTarget,
    request_id: Option<String>,
    messages: Vec<String>,
    params_file: Option<PathBuf>,
    params_json: Option<String>,
) -> Result<()> {
    let request = build_analyze_request(request_id, messages, params_file, params_json)?;
    let result = target.client()?.analyze(&request).await?;
    print_json(&result)
}

pub async fn provision(target: ClientTarget, request_id: String, resources: Vec<String>) -> Result<()> {
    let request = ConfirmProvisioningRequest {
        request_id,
        confirmed_resources: resources.into_iter().map(Into::into).collect(),
    };
    let result = target.client()?.provision(&request).await?;
    print_json(&result)
}

pub async fn status(target: ClientTarget, request_id: String) -> Result<()> {
    print_json(&target.client()?.status(&request_id).await?)
}

pub async fn cancel(target: ClientTarget, request_id: String) -> Result<()> {
    print_json(&target.client()?.cancel(&request_id).await?)
}

pub async fn retry(target: ClientTarget, request_id: String) -> Result<()> {
    print_json(&target.client()?.retry(&request_id).await?)
}

pub async fn teardown(target: ClientTarget, request_id: String) -> Result<()> {
    print_json(&target.client()?.teardown(&request_id).await?)
}

pub async fn delete(target: ClientTarget, request_id: String) -> Result<()> {
    print_json(&target.client()?.delete(&request_id).await?)
}

/// Initialize default configuration
pub async fn init(force: bool) -> Result<()> {
    let config_path = ConfigurationHierarchy::default_user_config_path()?;

    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at {:?}. Use --force to overwrite.",
            config_path
        );
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&config_path, ServerConfig::default().to_toml()?)?;

    println!("✓ Configuration initialized at {:?}", config_path);
    Ok(())
}

/// Manage configuration (show, validate, edit)
pub async fn config(show: bool, validate: bool, edit: bool) -> Result<()> {
    if show {
        let config = load_server_config(None, None)?;
        println!("{}", config.to_toml()?);
    }

    if validate {
        match load_server_config(None, None) {
            Ok(config) => match validate_configuration(&config, true) {
                Ok(()) => println!("✓ Configuration is valid"),
                Err(e) => error!("Configuration validation failed: {}", e),
            },
            Err(e) => error!("Failed to load configuration: {}", e),
        }
    }

    if edit {
        let config_path = ConfigurationHierarchy::default_user_config_path()?;
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "nano".to_string());
        std::process::Command::new(editor)
            .arg(&config_path)
            .status()?;
    }

    Ok(())
}

pub async fn version() -> Result<()> {
    println!("Cloudwright {}", env!("CARGO_PKG_VERSION"));
    println!("Built with Rust {}", rustc_version::version()?);
    Ok(())
}
