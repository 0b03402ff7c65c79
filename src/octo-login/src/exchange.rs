//! Authorization code for access token exchange.
//!
//! One POST to the provider token endpoint, bound to the attempt's PKCE
//! verifier. There are no retries here: every failure surfaces to the caller.

use std::collections::HashSet;

use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::config::{ConfigError, OAuthConfig};
use crate::constants::USER_AGENT;
use crate::request::AuthorizationAttempt;
use crate::types::{AccessTokenRecord, DEFAULT_TOKEN_TYPE};

/// Longest slice of an error body kept for diagnostics.
const MAX_ERROR_BODY: usize = 512;

/// Failure of a token exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// The code was already presented once; providers invalidate codes on
    /// first use, so a second exchange is refused without a network call.
    #[error("Token exchange rejected: this authorization code was already used")]
    AlreadyExchanged,
    #[error("Token exchange timed out after {secs} seconds")]
    Timeout { secs: u64 },
    #[error("Token exchange failed: {0}")]
    Transport(String),
    #[error("Token exchange failed: HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// HTTP success carrying an OAuth error body (GitHub does this).
    #[error("Token exchange failed: {}", provider_reason(.error, .description.as_deref()))]
    Provider {
        status: u16,
        error: String,
        description: Option<String>,
    },
    #[error("Token exchange failed: malformed token response: {reason}")]
    MalformedBody { status: u16, reason: String },
}

fn provider_reason<'a>(error: &'a str, description: Option<&'a str>) -> &'a str {
    description.filter(|d| !d.trim().is_empty()).unwrap_or(error)
}

impl ExchangeError {
    /// HTTP status of the response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ExchangeError::Http { status, .. }
            | ExchangeError::Provider { status, .. }
            | ExchangeError::MalformedBody { status, .. } => Some(*status),
            ExchangeError::AlreadyExchanged
            | ExchangeError::Timeout { .. }
            | ExchangeError::Transport(_) => None,
        }
    }
}

#[derive(serde::Deserialize)]
struct TokenResponseBody {
    access_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Performs code-for-token exchanges against one token endpoint.
pub struct TokenExchanger {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: Option<SecretString>,
    timeout_secs: u64,
    /// SHA-256 digests of every code ever presented.
    presented: Mutex<HashSet<[u8; 32]>>,
}

impl TokenExchanger {
    /// Build an exchanger from a validated configuration.
    pub fn new(config: &OAuthConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.exchange_timeout())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config
                .client_secret
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_string())),
            timeout_secs: config.exchange_timeout_secs,
            presented: Mutex::new(HashSet::new()),
        })
    }

    /// Exchange `code` for an access token, proving possession of the
    /// attempt's PKCE verifier.
    ///
    /// The code is marked as used before the request is sent, so even a
    /// failed exchange consumes it.
    pub async fn exchange(
        &self,
        code: &str,
        attempt: &AuthorizationAttempt,
    ) -> Result<AccessTokenRecord, ExchangeError> {
        let digest: [u8; 32] = Sha256::digest(code.as_bytes()).into();
        if !self.presented.lock().insert(digest) {
            tracing::warn!("Refusing to exchange an authorization code a second time");
            return Err(ExchangeError::AlreadyExchanged);
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", attempt.redirect_uri()),
            ("code_verifier", attempt.code_verifier()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }

        tracing::debug!(token_url = %self.token_url, "Exchanging authorization code for access token");

        let response = self
            .client
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify_transport(e))?;

        if !status.is_success() {
            tracing::warn!(status = %status, "Token exchange request failed");
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        parse_token_body(status.as_u16(), &body)
    }

    fn classify_transport(&self, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            tracing::warn!(secs = self.timeout_secs, "Token exchange timed out");
            ExchangeError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            tracing::warn!(error = %err, "Token exchange transport failure");
            ExchangeError::Transport(err.to_string())
        }
    }
}

fn parse_token_body(status: u16, body: &str) -> Result<AccessTokenRecord, ExchangeError> {
    let parsed: TokenResponseBody =
        serde_json::from_str(body).map_err(|e| ExchangeError::MalformedBody {
            status,
            reason: e.to_string(),
        })?;

    if let Some(error) = parsed.error.filter(|e| !e.is_empty()) {
        tracing::warn!(error = %error, "Token endpoint returned an OAuth error");
        return Err(ExchangeError::Provider {
            status,
            error,
            description: parsed.error_description,
        });
    }

    let access_token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExchangeError::MalformedBody {
            status,
            reason: "missing access_token".to_string(),
        })?;

    tracing::info!("Authorization code exchanged for access token");

    Ok(AccessTokenRecord::new(
        access_token,
        parsed
            .token_type
            .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
        parsed.scope.unwrap_or_default(),
    ))
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
