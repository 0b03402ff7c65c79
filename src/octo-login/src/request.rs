//! Authorization request building.
//!
//! An [`AuthorizationAttempt`] is one login button press: a fresh PKCE pair,
//! a fresh `state` nonce, and the authorization URL that carries them. The
//! caller keeps the attempt until the redirect comes back; dropping it wipes
//! the verifier.

use url::Url;

use crate::config::{ConfigError, OAuthConfig};
use crate::pkce::PkcePair;
use crate::utils::random_url_safe;

/// Bytes of randomness behind each `state` nonce.
const STATE_BYTES: usize = 32;

/// Correlated state for one in-flight login cycle.
#[derive(Debug)]
pub struct AuthorizationAttempt {
    state: String,
    pkce: PkcePair,
    client_id: String,
    redirect_uri: String,
    scope: String,
    authorization_url: Url,
}

impl AuthorizationAttempt {
    /// Start a new attempt with a fresh PKCE pair.
    pub fn new(config: &OAuthConfig) -> Result<Self, ConfigError> {
        build_authorization_request(config, PkcePair::with_verifier_len(config.verifier_len))
    }

    /// Opaque anti-CSRF value the provider must echo back.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn pkce(&self) -> &PkcePair {
        &self.pkce
    }

    pub fn code_verifier(&self) -> &str {
        self.pkce.verifier()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Requested scopes, space-joined.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// URL to open in the browser.
    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }
}

/// Build the provider authorization URL for `pkce` and wrap everything the
/// callback and exchange steps need into an [`AuthorizationAttempt`].
///
/// Only a malformed configuration (empty client ID or redirect URI, or an
/// unparsable authorization endpoint) can fail.
pub fn build_authorization_request(
    config: &OAuthConfig,
    pkce: PkcePair,
) -> Result<AuthorizationAttempt, ConfigError> {
    if config.client_id.trim().is_empty() {
        return Err(ConfigError::Missing("client_id"));
    }
    if config.redirect_uri.trim().is_empty() {
        return Err(ConfigError::Missing("redirect_uri"));
    }

    let state = random_url_safe(STATE_BYTES);
    let scope = config.scope_string();

    // Built by hand so the scope separator is `%20` rather than the `+` that
    // form encoding would produce.
    let query = format!(
        "response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method={}",
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&scope),
        urlencoding::encode(&state),
        urlencoding::encode(pkce.challenge()),
        pkce.method(),
    );

    let base = config.authorize_url.trim_end_matches(['?', '&']);
    let separator = if base.contains('?') { '&' } else { '?' };
    let authorization_url =
        Url::parse(&format!("{base}{separator}{query}")).map_err(|e| ConfigError::InvalidUrl {
            field: "authorize_url",
            reason: e.to_string(),
        })?;

    tracing::debug!(
        client_id = %config.client_id,
        redirect_uri = %config.redirect_uri,
        scope = %scope,
        "Built authorization request"
    );

    Ok(AuthorizationAttempt {
        state,
        pkce,
        client_id: config.client_id.clone(),
        redirect_uri: config.redirect_uri.clone(),
        scope,
        authorization_url,
    })
}
