//! Type definitions for authentication data.

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

/// Token type assumed when the provider omits one.
pub const DEFAULT_TOKEN_TYPE: &str = "bearer";

/// An access token as issued by the token endpoint.
///
/// Owned by the [`TokenStore`](crate::TokenStore); everything else holds
/// short-lived clones for the duration of a request.
pub struct AccessTokenRecord {
    token: SecretString,
    /// Token type reported by the provider (informational).
    pub token_type: String,
    /// Granted scopes as reported by the provider (informational).
    pub scope: String,
    /// Unix timestamp at which the token was obtained.
    pub obtained_at: Option<i64>,
}

impl AccessTokenRecord {
    /// Create a record for a freshly issued token.
    pub fn new(token: impl Into<String>, token_type: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            token_type: token_type.into(),
            scope: scope.into(),
            obtained_at: Some(chrono::Utc::now().timestamp()),
        }
    }

    /// The bearer string (exposes the secret - use sparingly).
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Individual scopes. GitHub separates them with commas, other providers
    /// with spaces; both are accepted.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub(crate) fn to_stored(&self) -> StoredToken {
        StoredToken {
            access_token: self.token().to_string(),
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            obtained_at: self.obtained_at,
        }
    }

    pub(crate) fn from_stored(mut stored: StoredToken) -> Self {
        Self {
            token: SecretString::from(std::mem::take(&mut stored.access_token)),
            token_type: std::mem::take(&mut stored.token_type),
            scope: std::mem::take(&mut stored.scope),
            obtained_at: stored.obtained_at,
        }
    }
}

impl Clone for AccessTokenRecord {
    fn clone(&self) -> Self {
        Self {
            token: SecretString::from(self.token().to_string()),
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
            obtained_at: self.obtained_at,
        }
    }
}

impl PartialEq for AccessTokenRecord {
    fn eq(&self, other: &Self) -> bool {
        crate::utils::constant_time_eq(self.token(), other.token())
            && self.token_type == other.token_type
            && self.scope == other.scope
    }
}

impl Eq for AccessTokenRecord {}

impl std::fmt::Debug for AccessTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenRecord")
            .field("token", &crate::utils::safe_format_key(self.token()))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Persisted form of an [`AccessTokenRecord`].
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct StoredToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obtained_at: Option<i64>,
}

impl Drop for StoredToken {
    fn drop(&mut self) {
        self.access_token.zeroize();
    }
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// Credential store mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsStoreMode {
    /// Keyring first, encrypted file when the keyring is unavailable.
    #[default]
    Auto,
    /// Store credentials in the keyring only.
    Keyring,
    /// Store credentials in an encrypted file only.
    EncryptedFile,
    /// Keep credentials in memory for the lifetime of the process.
    Memory,
}

impl std::fmt::Display for CredentialsStoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsStoreMode::Auto => write!(f, "auto"),
            CredentialsStoreMode::Keyring => write!(f, "keyring"),
            CredentialsStoreMode::EncryptedFile => write!(f, "encrypted_file"),
            CredentialsStoreMode::Memory => write!(f, "memory"),
        }
    }
}
