//! Cloudwright - conversation-driven cloud provisioning server.

use anyhow::Result;
use cloudwright::cli::Cli;
use cloudwright::config::init_logging_with_level;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging_with_level(cli.log_level.as_deref())?;
    cli.run().await
}
