//! Constants for the octo-login module.

/// Environment variable overriding the OAuth client ID.
pub const CLIENT_ID_ENV_VAR: &str = "OCTO_CLIENT_ID";

/// Environment variable carrying the OAuth client secret.
pub const CLIENT_SECRET_ENV_VAR: &str = "OCTO_CLIENT_SECRET";

/// Environment variable overriding the redirect URI.
pub const REDIRECT_URI_ENV_VAR: &str = "OCTO_REDIRECT_URI";

/// Environment variable overriding the application home directory.
pub const HOME_ENV_VAR: &str = "OCTO_HOME";

/// Name of the application home directory under the user's home.
pub const HOME_DIR_NAME: &str = ".octo";

/// Configuration file name inside the application home.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Provider authorization endpoint.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";

/// Provider token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// REST API base URL used for the post-login profile fetch.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Custom-scheme redirect routed back into the callback interpreter.
pub const DEFAULT_REDIRECT_URI: &str = "octo://oauth/callback";

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["repo", "user"];

/// Service name for keyring storage.
pub const KEYRING_SERVICE: &str = "octo-cli";

/// The single keyring key the access token record lives under.
pub const KEYRING_ACCOUNT: &str = "access_token";

/// Application-level timeout for the code-for-token exchange.
pub const EXCHANGE_TIMEOUT_SECS: u64 = 30;

/// Default PKCE verifier length in characters.
pub const DEFAULT_VERIFIER_LEN: usize = 64;

/// User-Agent string for HTTP requests
pub const USER_AGENT: &str = concat!("octo-cli/", env!("CARGO_PKG_VERSION"));
