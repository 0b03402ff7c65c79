//! Umbrella error for the login flow.
//!
//! Every component has its own error type; [`AuthError`] is what the session
//! converts them into before flattening to the `Error(message)` state.

use crate::callback::CallbackError;
use crate::config::ConfigError;
use crate::exchange::ExchangeError;
use crate::profile::ProfileError;
use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed client setup. Not recoverable by the user.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// The user dismissed the browser. Routed to `NotAuthenticated`.
    #[error("Login cancelled")]
    Cancelled,
    #[error(transparent)]
    Callback(#[from] CallbackError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    ProfileFetch(#[from] ProfileError),
    #[error("Failed to save credentials: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Human-readable text for the `Error` state.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether offering `retry()` makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::Configuration(_) => false,
            AuthError::Cancelled => true,
            AuthError::Callback(_) => true,
            AuthError::Exchange(_) => true,
            AuthError::ProfileFetch(e) => !matches!(e, ProfileError::Unauthorized),
            AuthError::Storage(_) => true,
        }
    }

    /// The provider reported the token as invalid; the session clears it
    /// silently instead of surfacing an error.
    pub fn is_token_invalidation(&self) -> bool {
        matches!(self, AuthError::ProfileFetch(ProfileError::Unauthorized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_description_is_the_message() {
        let err = AuthError::from(CallbackError::Provider {
            error: "access_denied".to_string(),
            description: Some("The user has denied your application access.".to_string()),
        });
        assert_eq!(err.message(), "The user has denied your application access.");
    }

    #[test]
    fn test_exchange_message_mentions_status() {
        let err = AuthError::from(ExchangeError::Http {
            status: 500,
            body: "boom".to_string(),
        });
        assert!(err.message().contains("500"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_configuration_is_not_retryable() {
        let err = AuthError::from(ConfigError::Missing("client_id"));
        assert!(!err.is_retryable());
        assert!(err.message().starts_with("Configuration error"));
    }

    #[test]
    fn test_unauthorized_is_token_invalidation() {
        assert!(AuthError::from(ProfileError::Unauthorized).is_token_invalidation());
        assert!(!AuthError::from(ProfileError::Http { status: 500 }).is_token_invalidation());
    }
}
