//! Interpretation of the OAuth redirect.
//!
//! The redirect reaches us either as a deep link or as the result of an
//! embedded browser. Both arrive here as a URI string and resolve to a code,
//! an error, or a cancellation. Parsing is pure.

use std::collections::HashMap;

use url::Url;

use crate::request::AuthorizationAttempt;
use crate::utils::constant_time_eq;

/// Why a redirect could not yield an authorization code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The provider answered with an `error` parameter.
    #[error("{}", provider_message(.error, .description.as_deref()))]
    Provider {
        error: String,
        description: Option<String>,
    },
    /// The `state` parameter is missing or belongs to another attempt.
    #[error("Authorization rejected: state mismatch (the response does not belong to this login attempt)")]
    StateMismatch,
    /// The redirect targets a different scheme, host or path.
    #[error("Authorization rejected: unexpected redirect target {actual}")]
    UnexpectedRedirect { actual: String },
    #[error("Authorization rejected: malformed redirect URI: {0}")]
    MalformedUri(String),
    /// A redirect arrived while no login attempt was outstanding.
    #[error("Authorization rejected: no login attempt is in progress")]
    NoOutstandingAttempt,
}

fn provider_message(error: &str, description: Option<&str>) -> String {
    match description {
        Some(description) if !description.trim().is_empty() => description.to_string(),
        _ => format!("Authorization failed: {error}"),
    }
}

/// Result of interpreting one redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The provider granted a code and the `state` matches the attempt.
    AuthorizationCode { code: String, state: String },
    /// The provider refused, or the redirect failed validation.
    AuthorizationError(CallbackError),
    /// Neither a code nor an error: the user dismissed the browser.
    Cancelled,
}

/// Interpret `redirect` against the outstanding `attempt`.
pub fn interpret_callback(redirect: &str, attempt: &AuthorizationAttempt) -> CallbackOutcome {
    parse_callback(redirect, attempt.redirect_uri(), attempt.state())
}

/// Interpret `redirect` for an attempt registered with `expected_redirect` and
/// `expected_state`.
///
/// An `error` parameter wins over a `code`. A code is only accepted when the
/// returned `state` matches in constant time; a missing `state` counts as a
/// mismatch.
pub fn parse_callback(redirect: &str, expected_redirect: &str, expected_state: &str) -> CallbackOutcome {
    let url = match Url::parse(redirect.trim()) {
        Ok(url) => url,
        Err(e) => return CallbackOutcome::AuthorizationError(CallbackError::MalformedUri(e.to_string())),
    };

    match Url::parse(expected_redirect) {
        Ok(expected) if same_target(&url, &expected) => {}
        Ok(_) => {
            tracing::warn!(actual = %strip_query(&url), "Redirect does not match the registered redirect URI");
            return CallbackOutcome::AuthorizationError(CallbackError::UnexpectedRedirect {
                actual: strip_query(&url),
            });
        }
        Err(e) => return CallbackOutcome::AuthorizationError(CallbackError::MalformedUri(e.to_string())),
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let non_empty = |key: &str| params.get(key).filter(|v| !v.is_empty());

    if let Some(error) = non_empty("error") {
        tracing::debug!(error = %error, "Provider returned an authorization error");
        return CallbackOutcome::AuthorizationError(CallbackError::Provider {
            error: error.clone(),
            description: non_empty("error_description").cloned(),
        });
    }

    let Some(code) = non_empty("code") else {
        tracing::debug!("Redirect carries neither code nor error; treating as cancelled");
        return CallbackOutcome::Cancelled;
    };

    match non_empty("state") {
        Some(state) if constant_time_eq(expected_state, state) => {
            tracing::debug!("OAuth state validation passed");
            CallbackOutcome::AuthorizationCode {
                code: code.clone(),
                state: state.clone(),
            }
        }
        _ => {
            tracing::warn!("OAuth state mismatch; discarding authorization code");
            CallbackOutcome::AuthorizationError(CallbackError::StateMismatch)
        }
    }
}

fn same_target(actual: &Url, expected: &Url) -> bool {
    actual.scheme() == expected.scheme()
        && actual.host_str() == expected.host_str()
        && actual.port_or_known_default() == expected.port_or_known_default()
        && actual.path().trim_end_matches('/') == expected.path().trim_end_matches('/')
}

fn strip_query(url: &Url) -> String {
    let mut bare = url.clone();
    bare.set_query(None);
    bare.set_fragment(None);
    bare.to_string()
}
