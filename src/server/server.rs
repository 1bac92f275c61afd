//! Cloudwright server startup: wires the orchestrator to a transport

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::settings::ServerConfig;
use crate::config::validation::validate_configuration;
use crate::http::{self, AppState};
use crate::jsonrpc::{register_cloudwright_methods, JsonRpcServer, MethodRegistry, TransportConfig};
use crate::orchestrator::Orchestrator;

/// Build the orchestrator and serve it until end of input or Ctrl+C
pub async fn start_server(
    server_config: ServerConfig,
    transport_config: Option<TransportConfig>,
) -> Result<()> {
    validate_server_config(&server_config)?;

    let transport = match transport_config {
        Some(transport) => transport,
        None => TransportConfig::from_settings(&server_config.server)?,
    };

    let orchestrator = Orchestrator::from_config(&server_config).await?;
    let resumed = orchestrator.recover().await?;
    if resumed > 0 {
        info!(resumed, "Resumed provisioning requests from the journal");
    }
    let sweeper = orchestrator.spawn_retention_sweeper();

    let authenticator: Arc<dyn Authenticator> =
        Arc::new(StaticTokenAuthenticator::new(&server_config.auth));
    if server_config.auth.allow_anonymous {
        warn!("Anonymous access is enabled");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_token.cancel();
        }
    });

    info!("Starting Cloudwright server with {} transport", transport.description());
    let result = serve(orchestrator.clone(), authenticator, &transport, shutdown).await;

    orchestrator.shutdown();
    if let Err(e) = sweeper.await {
        debug!("Retention sweeper ended abnormally: {}", e);
    }
    info!("Cloudwright server stopped");
    result
}

async fn serve(
    orchestrator: Orchestrator,
    authenticator: Arc<dyn Authenticator>,
    transport: &TransportConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    match transport {
        TransportConfig::Http { addr } => {
            http::serve(addr, AppState::new(orchestrator, authenticator), shutdown).await
        }
        TransportConfig::Stdio => {
            let registry = MethodRegistry::new();
            register_cloudwright_methods(&registry, orchestrator, authenticator).await;
            JsonRpcServer::new(registry, shutdown).serve_stdio().await
        }
        TransportConfig::UnixSocket { path } => {
            let registry = MethodRegistry::new();
            register_cloudwright_methods(&registry, orchestrator, authenticator).await;
            JsonRpcServer::new(registry, shutdown)
                .serve_unix_socket(path)
                .await
        }
    }
}

/// Validate server configuration before starting
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    validate_configuration(config, false)?;

    match config.server.transport.as_str() {
        "stdio" => {
            debug!("Using stdio transport - no additional validation needed");
        }
        "socket" => {
            let socket_path = config.server.socket_path.as_deref().unwrap_or_default();
            if socket_path.is_empty() {
                anyhow::bail!("Socket path is required when using socket transport");
            }
            debug!("Using Unix socket transport: {}", socket_path);
        }
        "http" => {
            config
                .server
                .http_addr
                .parse::<std::net::SocketAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {}", config.server.http_addr, e))?;
            debug!("Using HTTP transport: {}", config.server.http_addr);
        }
        other => {
            anyhow::bail!("Unsupported transport type: {}", other);
        }
    }

    Ok(())
}
