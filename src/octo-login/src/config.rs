//! OAuth client configuration.
//!
//! Values are resolved in layers: built-in defaults, then `config.toml` in the
//! application home, then environment variables. Callers (the CLI) apply their
//! own flags on top and must call [`OAuthConfig::validate`] before handing the
//! configuration to the session.

use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CLIENT_ID_ENV_VAR, CLIENT_SECRET_ENV_VAR, CONFIG_FILE_NAME, DEFAULT_API_BASE_URL,
    DEFAULT_AUTHORIZE_URL, DEFAULT_REDIRECT_URI, DEFAULT_SCOPES, DEFAULT_TOKEN_URL,
    DEFAULT_VERIFIER_LEN, EXCHANGE_TIMEOUT_SECS, HOME_DIR_NAME, HOME_ENV_VAR,
    REDIRECT_URI_ENV_VAR,
};

/// Malformed client setup. Fatal: fix the configuration and restart.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("{field} must use HTTPS (got {url})")]
    InsecureUrl { field: &'static str, url: String },
    #[error("exchange timeout must be greater than zero")]
    ZeroTimeout,
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    authorize_url: Option<String>,
    token_url: Option<String>,
    api_base_url: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<Vec<String>>,
    verifier_len: Option<usize>,
    exchange_timeout_secs: Option<u64>,
}

/// Settings for one OAuth client registration.
#[derive(Debug)]
pub struct OAuthConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// Client secret, for providers that require confidential-client exchange.
    pub client_secret: Option<SecretString>,
    /// Provider authorization endpoint (browser-facing).
    pub authorize_url: String,
    /// Provider token endpoint.
    pub token_url: String,
    /// REST API base URL for the profile fetch.
    pub api_base_url: String,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Scopes to request.
    pub scopes: Vec<String>,
    /// PKCE verifier length, clamped to `[43, 128]` at generation time.
    pub verifier_len: usize,
    /// Timeout for the token exchange request, in seconds.
    pub exchange_timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            verifier_len: DEFAULT_VERIFIER_LEN,
            exchange_timeout_secs: EXCHANGE_TIMEOUT_SECS,
        }
    }
}

impl OAuthConfig {
    /// Defaults with the given client ID.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `home/config.toml` (if present) and the
    /// process environment.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(home, |key| std::env::var(key).ok())
    }

    /// [`OAuthConfig::load`] with an explicit environment lookup.
    pub fn load_with_env(
        home: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = home.join(CONFIG_FILE_NAME);
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let file: FileConfig =
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
            config.merge_file(file);
            tracing::debug!(path = %path.display(), "Loaded OAuth config file");
        }

        config.apply_env(lookup);
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let mut config = Self::default();
        config.merge_file(file);
        Ok(config)
    }

    fn merge_file(&mut self, file: FileConfig) {
        if let Some(v) = file.client_id {
            self.client_id = v;
        }
        if let Some(v) = file.client_secret {
            self.client_secret = Some(SecretString::from(v));
        }
        if let Some(v) = file.authorize_url {
            self.authorize_url = v;
        }
        if let Some(v) = file.token_url {
            self.token_url = v;
        }
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.redirect_uri {
            self.redirect_uri = v;
        }
        if let Some(v) = file.scopes {
            self.scopes = v;
        }
        if let Some(v) = file.verifier_len {
            self.verifier_len = v;
        }
        if let Some(v) = file.exchange_timeout_secs {
            self.exchange_timeout_secs = v;
        }
    }

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty(CLIENT_ID_ENV_VAR) {
            self.client_id = v;
        }
        if let Some(v) = non_empty(CLIENT_SECRET_ENV_VAR) {
            self.client_secret = Some(SecretString::from(v));
        }
        if let Some(v) = non_empty(REDIRECT_URI_ENV_VAR) {
            self.redirect_uri = v;
        }
    }

    /// Fail fast on a setup that can never complete a login.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(ConfigError::Missing("redirect_uri"));
        }
        if self.exchange_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        parse_url("redirect_uri", &self.redirect_uri)?;
        validate_endpoint("authorize_url", &self.authorize_url)?;
        validate_endpoint("token_url", &self.token_url)?;
        validate_endpoint("api_base_url", &self.api_base_url)?;
        Ok(())
    }

    /// Requested scopes, space-joined.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<url::Url, ConfigError> {
    url::Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })
}

/// Provider endpoints must be HTTPS and carry no credentials. Plain HTTP is
/// tolerated for loopback hosts only.
fn validate_endpoint(field: &'static str, raw: &str) -> Result<(), ConfigError> {
    let url = parse_url(field, raw)?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: "credentials are not allowed in the URL".to_string(),
        });
    }

    let loopback = matches!(url.host_str(), Some("127.0.0.1" | "localhost" | "[::1]"));
    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        _ => Err(ConfigError::InsecureUrl {
            field,
            url: raw.to_string(),
        }),
    }
}

/// Application home: `$OCTO_HOME`, else `~/.octo`.
pub fn app_home() -> Option<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV_VAR)
        && !home.trim().is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|h| h.join(HOME_DIR_NAME))
}
