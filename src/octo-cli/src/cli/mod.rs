//! CLI argument parsing and command dispatch.

pub mod args;

pub use args::{Cli, Commands, LogLevel, LoginArgs, StoreArg};

use anyhow::Result;

use crate::login::{run_login, run_logout, run_status};

/// Run the selected subcommand.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let mode = cli.store.into();
    match cli.command {
        Commands::Login(args) => run_login(args, mode).await,
        Commands::Logout => run_logout(mode).await,
        Commands::Status => run_status(mode).await,
    }
}
