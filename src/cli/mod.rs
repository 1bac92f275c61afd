//! CLI interface for Cloudwright.
//!
//! This module provides the command-line interface for both server and client operations.

mod commands;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;
pub use utils::*;

#[derive(Parser)]
#[command(name = "cloudwright")]
#[command(about = "Conversation-driven cloud provisioning server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Server socket for client commands (defaults to the saved connection)
    #[arg(long, global = true)]
    pub socket: Option<String>,

    /// Bearer credential sent with client commands
    #[arg(long, global = true, env = "CLOUDWRIGHT_TOKEN", hide_env_values = true)]
    pub credential: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the server
    Serve {
        /// One of "stdio", "socket", "http" (defaults to the configured transport)
        #[arg(long, short = 't')]
        transport: Option<String>,

        /// Unix socket path (used when transport = "socket")
        #[arg(long, short = 's')]
        socket_path: Option<String>,

        /// Listen address (used when transport = "http")
        #[arg(long)]
        http_addr: Option<String>,

        /// Path to a custom configuration file (TOML format)
        #[arg(long, short = 'c', conflicts_with = "config_json")]
        config_path: Option<PathBuf>,

        /// Inline JSON configuration (overrides file-based config)
        #[arg(long, short = 'j', conflicts_with = "config_path")]
        config_json: Option<String>,
    },

    /// Remember a server socket for later client commands
    Connect { socket_path: String },

    /// Forget the saved server socket
    Disconnect,

    /// Analyze a conversation and print recommendations
    Analyze {
        /// Continue an existing request
        #[arg(long)]
        request_id: Option<String>,

        /// A user message; repeat for several turns
        #[arg(long = "message", short = 'm')]
        messages: Vec<String>,

        /// Full request payload as a JSON file
        #[arg(long, short = 'p', conflicts_with_all = ["params_json", "messages"])]
        params_file: Option<PathBuf>,

        /// Full request payload as inline JSON
        #[arg(long, short = 'j', conflicts_with_all = ["params_file", "messages"])]
        params_json: Option<String>,
    },

    /// Confirm recommendations and start provisioning
    Provision {
        request_id: String,

        /// Recommendation names to provision
        #[arg(required = true)]
        resources: Vec<String>,
    },

    /// Show the status of a request
    Status { request_id: String },

    /// Cancel a request awaiting confirmation
    Cancel { request_id: String },

    /// Re-provision the failed resources of a failed request
    Retry { request_id: String },

    /// Tear down the resources of a failed request
    Teardown { request_id: String },

    /// Delete a request record
    Delete { request_id: String },

    /// Initialize default configuration at default location
    Init {
        #[arg(long)]
        force: bool,
    },

    /// Manage configuration
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long)]
        validate: bool,

        #[arg(long)]
        edit: bool,
    },

    /// Show version information
    Version,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let target = ClientTarget {
            socket: self.socket,
            credential: self.credential,
        };

        match self.command {
            Commands::Serve {
                transport,
                socket_path,
                http_addr,
                config_path,
                config_json,
            } => {
                serve(ServeOptions {
                    transport,
                    socket_path,
                    http_addr,
                    config_path,
                    config_json,
                })
                .await
            }

            Commands::Connect { socket_path } => connect(socket_path).await,
            Commands::Disconnect => disconnect().await,

            Commands::Analyze {
                request_id,
                messages,
                params_file,
                params_json,
            } => analyze(target, request_id, messages, params_file, params_json).await,
            Commands::Provision {
                request_id,
                resources,
            } => provision(target, request_id, resources).await,
            Commands::Status { request_id } => status(target, request_id).await,
            Commands::Cancel { request_id } => cancel(target, request_id).await,
            Commands::Retry { request_id } => retry(target, request_id).await,
            Commands::Teardown { request_id } => teardown(target, request_id).await,
            Commands::Delete { request_id } => delete(target, request_id).await,

            Commands::Init { force } => init(force).await,
            Commands::Config {
                show,
                validate,
                edit,
            } => config(show, validate, edit).await,

            Commands::Version => version().await,
        }
    }
}
