//! Command-line argument structures.

use clap::{Parser, Subcommand, ValueEnum};
use octo_login::CredentialsStoreMode;

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Where the access token is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    /// System keychain, encrypted file when no keychain is available
    #[default]
    Auto,
    /// System keychain only
    Keyring,
    /// Encrypted file in the octo home directory
    File,
    /// Process memory only; forgotten on exit
    Memory,
}

impl From<StoreArg> for CredentialsStoreMode {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Auto => CredentialsStoreMode::Auto,
            StoreArg::Keyring => CredentialsStoreMode::Keyring,
            StoreArg::File => CredentialsStoreMode::EncryptedFile,
            StoreArg::Memory => CredentialsStoreMode::Memory,
        }
    }
}

/// octo - GitHub from the terminal
#[derive(Debug, Parser)]
#[command(name = "octo")]
#[command(author, version, about = "octo - GitHub from the terminal", long_about = None)]
pub struct Cli {
    /// Log level for diagnostics on stderr (RUST_LOG overrides)
    #[arg(long = "log-level", value_enum, global = true, default_value = "warn")]
    pub log_level: LogLevel,

    /// Credential storage backend
    #[arg(long = "store", value_enum, global = true, default_value = "auto")]
    pub store: StoreArg,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in to GitHub in the browser
    Login(LoginArgs),
    /// Forget the stored access token
    Logout,
    /// Show who is logged in
    Status,
}

/// Arguments for `octo login`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct LoginArgs {
    /// OAuth app client ID (overrides config and OCTO_CLIENT_ID)
    #[arg(long = "client-id")]
    pub client_id: Option<String>,

    /// Redirect URI registered for the OAuth app
    #[arg(long = "redirect-uri")]
    pub redirect_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_login_flags() {
        let cli = Cli::parse_from([
            "octo",
            "login",
            "--client-id",
            "Iv1.abc",
            "--redirect-uri",
            "octo://oauth/callback",
        ]);
        let Commands::Login(args) = cli.command else {
            panic!("expected login");
        };
        assert_eq!(args.client_id.as_deref(), Some("Iv1.abc"));
        assert_eq!(args.redirect_uri.as_deref(), Some("octo://oauth/callback"));
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert_eq!(cli.store, StoreArg::Auto);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["octo", "status", "--log-level", "debug", "--store", "file"]);
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.log_level.as_filter_str(), "debug");
        assert_eq!(
            CredentialsStoreMode::from(cli.store),
            CredentialsStoreMode::EncryptedFile
        );
    }

    #[test]
    fn test_unknown_store_is_rejected() {
        assert!(Cli::try_parse_from(["octo", "logout", "--store", "cloud"]).is_err());
    }
}
