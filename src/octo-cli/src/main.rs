//! octo - GitHub from the terminal.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use octo_cli::cli::{Cli, dispatch_command};
use octo_cli::styled_output::print_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = dispatch_command(cli).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
