//! Authenticated user profile fetch.
//!
//! The session needs exactly one REST call: `GET /user`, which both proves the
//! token is still valid and yields the profile shown once logged in.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::{ConfigError, OAuthConfig};
use crate::constants::USER_AGENT;
use crate::types::AccessTokenRecord;

/// Failure of the profile fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    /// The API rejected the token (HTTP 401): revoked or expired.
    #[error("Access token was rejected by the API")]
    Unauthorized,
    #[error("Failed to fetch user: HTTP {status}")]
    Http { status: u16 },
    #[error("Failed to fetch user: {0}")]
    Transport(String),
    #[error("Failed to fetch user: malformed response: {0}")]
    MalformedBody(String),
}

/// The authenticated user, as returned by `GET /user`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UserProfile {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub html_url: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub blog: Option<String>,
    pub location: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub public_repos: u32,
    #[serde(default)]
    pub public_gists: u32,
    #[serde(default)]
    pub followers: u32,
    #[serde(default)]
    pub following: u32,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl UserProfile {
    /// Display name, falling back to the login.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.login)
    }
}

/// Source of the authenticated user's profile.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch(&self, token: &AccessTokenRecord) -> Result<UserProfile, ProfileError>;
}

/// `Authorization` header value for API requests made with `token`.
pub fn authorization_header(token: &AccessTokenRecord) -> String {
    format!("token {}", token.token())
}

/// [`ProfileFetcher`] backed by the GitHub REST API.
#[derive(Clone)]
pub struct GitHubProfileClient {
    client: Client,
    api_base_url: String,
}

impl GitHubProfileClient {
    pub fn new(config: &OAuthConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.exchange_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProfileFetcher for GitHubProfileClient {
    async fn fetch(&self, token: &AccessTokenRecord) -> Result<UserProfile, ProfileError> {
        let url = format!("{}/user", self.api_base_url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
            .header(reqwest::header::AUTHORIZATION, authorization_header(token))
            .send()
            .await
            .map_err(|e| ProfileError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                tracing::info!("API reported the access token as invalid");
                Err(ProfileError::Unauthorized)
            }
            status if !status.is_success() => {
                tracing::warn!(status = %status, "Profile fetch failed");
                Err(ProfileError::Http {
                    status: status.as_u16(),
                })
            }
            _ => {
                let profile: UserProfile = response
                    .json()
                    .await
                    .map_err(|e| ProfileError::MalformedBody(e.to_string()))?;
                tracing::debug!(login = %profile.login, "Fetched authenticated user");
                Ok(profile)
            }
        }
    }
}
