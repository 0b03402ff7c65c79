//! The auth session state machine.
//!
//! [`AuthSession`] drives one login cycle at a time through the other
//! components and publishes a single authoritative [`AuthState`]:
//!
//! ```text
//! NotAuthenticated --login--> Loading --callback ok--> Authenticated
//!        ^                     |  |                         |
//!        +------cancelled------+  +--failure--> Error       |
//!        +-----------------------logout---------------------+
//! ```
//!
//! Transitions are serialized through one async lock. Whatever work a
//! transition needs (exchange, save, profile fetch) runs on a spawned task, so
//! dropping the caller's future can discard the outcome but never leave a
//! half-applied token behind.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::WatchStream;
use url::Url;

use crate::callback::{CallbackError, CallbackOutcome, interpret_callback};
use crate::config::{ConfigError, OAuthConfig};
use crate::error::AuthError;
use crate::exchange::TokenExchanger;
use crate::profile::{GitHubProfileClient, ProfileFetcher, UserProfile};
use crate::request::AuthorizationAttempt;
use crate::store::TokenStore;
use crate::types::AccessTokenRecord;

/// Current standing of the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    NotAuthenticated,
    /// A login attempt or a restore is in progress.
    Loading,
    Authenticated(UserProfile),
    /// Human-readable failure. `retry()` starts over.
    Error(String),
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, AuthState::Loading)
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        match self {
            AuthState::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AuthState::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::NotAuthenticated => write!(f, "not authenticated"),
            AuthState::Loading => write!(f, "loading"),
            AuthState::Authenticated(profile) => write!(f, "authenticated as {}", profile.login),
            AuthState::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Long-lived, re-entrant login state machine. Cheap to clone; clones share
/// one session.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: OAuthConfig,
    exchanger: TokenExchanger,
    store: Arc<TokenStore>,
    profiles: Arc<dyn ProfileFetcher>,
    state: watch::Sender<AuthState>,
    /// The outstanding attempt, if any. Holding this lock is the right to
    /// transition.
    flow: Mutex<Option<AuthorizationAttempt>>,
}

impl AuthSession {
    /// Build a session. Fails fast on a malformed configuration.
    pub fn new(
        config: OAuthConfig,
        store: Arc<TokenStore>,
        profiles: Arc<dyn ProfileFetcher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let exchanger = TokenExchanger::new(&config)?;
        let (state, _) = watch::channel(AuthState::NotAuthenticated);

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                exchanger,
                store,
                profiles,
                state,
                flow: Mutex::new(None),
            }),
        })
    }

    /// Build a session that fetches profiles from the configured GitHub API.
    pub fn with_github(config: OAuthConfig, store: Arc<TokenStore>) -> Result<Self, ConfigError> {
        let profiles = Arc::new(GitHubProfileClient::new(&config)?);
        Self::new(config, store, profiles)
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that sees the current state, then every transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Stream of states, starting with the current one.
    pub fn states(&self) -> WatchStream<AuthState> {
        WatchStream::new(self.inner.state.subscribe())
    }

    /// Settle the initial state from whatever the token store holds.
    ///
    /// A stored token is verified with a profile fetch. If the API rejects it,
    /// the token is cleared and the session settles on `NotAuthenticated`.
    pub async fn restore(&self) -> AuthState {
        let inner = Arc::clone(&self.inner);
        self.detached(async move { inner.restore().await }).await
    }

    /// Start a login attempt and return the URL to open in the browser.
    ///
    /// Returns `None` without side effects while `Loading` or `Authenticated`.
    /// A configuration failure settles on `Error` and also returns `None`.
    pub async fn login(&self) -> Option<Url> {
        if matches!(
            *self.inner.state.borrow(),
            AuthState::Loading | AuthState::Authenticated(_)
        ) {
            tracing::debug!("Login already in progress or complete, ignoring");
            return None;
        }

        let mut flow = self.inner.flow.lock().await;
        if matches!(
            *self.inner.state.borrow(),
            AuthState::Loading | AuthState::Authenticated(_)
        ) {
            return None;
        }
        self.inner.start_attempt(&mut flow)
    }

    /// From `Error`, start over with a brand new attempt. A no-op elsewhere.
    pub async fn retry(&self) -> Option<Url> {
        let mut flow = self.inner.flow.lock().await;
        if !matches!(*self.inner.state.borrow(), AuthState::Error(_)) {
            tracing::debug!("Nothing to retry");
            return None;
        }
        flow.take();
        self.inner.settle(AuthState::NotAuthenticated);
        self.inner.start_attempt(&mut flow)
    }

    /// Feed the redirect the browser came back with. Resolves once the
    /// session has settled and returns the settled state.
    pub async fn handle_callback(&self, redirect: &str) -> AuthState {
        let inner = Arc::clone(&self.inner);
        let redirect = redirect.to_string();
        self.detached(async move { inner.complete(&redirect).await }).await
    }

    /// The user dismissed the browser without any redirect.
    pub async fn cancel(&self) -> AuthState {
        let mut flow = self.inner.flow.lock().await;
        if flow.take().is_some() {
            tracing::info!("Login cancelled");
            self.inner.settle(AuthState::NotAuthenticated)
        } else {
            self.state()
        }
    }

    /// Clear the stored token and return to `NotAuthenticated`.
    ///
    /// Accepted from any state. An exchange already in flight completes
    /// first; an outstanding attempt is discarded.
    pub async fn logout(&self) -> AuthState {
        let inner = Arc::clone(&self.inner);
        self.detached(async move {
            let mut flow = inner.flow.lock().await;
            flow.take();
            match inner.store.clear().await {
                Ok(()) => {
                    tracing::info!("Logged out");
                    inner.settle(AuthState::NotAuthenticated)
                }
                Err(e) => inner.fail(AuthError::from(e)),
            }
        })
        .await
    }

    /// An authenticated API call came back 401: forget the token.
    ///
    /// A login attempt in progress is left alone.
    pub async fn handle_unauthorized(&self) -> AuthState {
        let inner = Arc::clone(&self.inner);
        self.detached(async move {
            let flow = inner.flow.lock().await;
            tracing::info!("API rejected the access token, clearing it");
            match inner.store.clear().await {
                Ok(()) if flow.is_some() => inner.state.borrow().clone(),
                Ok(()) => inner.settle(AuthState::NotAuthenticated),
                Err(e) => inner.fail(AuthError::from(e)),
            }
        })
        .await
    }

    /// Run `work` on its own task so it finishes even if the caller goes
    /// away.
    async fn detached<F>(&self, work: F) -> AuthState
    where
        F: Future<Output = AuthState> + Send + 'static,
    {
        match tokio::spawn(work).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Session task failed");
                self.inner.settle(AuthState::Error(format!("Internal error: {e}")))
            }
        }
    }
}

impl SessionInner {
    fn settle(&self, state: AuthState) -> AuthState {
        tracing::debug!(state = %state, "Auth state changed");
        self.state.send_replace(state.clone());
        state
    }

    fn fail(&self, error: AuthError) -> AuthState {
        tracing::warn!(error = %error, retryable = error.is_retryable(), "Login failed");
        self.settle(AuthState::Error(error.message()))
    }

    /// Must be called with the flow lock held.
    fn start_attempt(&self, flow: &mut Option<AuthorizationAttempt>) -> Option<Url> {
        match AuthorizationAttempt::new(&self.config) {
            Ok(attempt) => {
                let url = attempt.authorization_url().clone();
                // replaces any stale attempt and wipes its verifier
                *flow = Some(attempt);
                tracing::info!("Started login attempt");
                self.settle(AuthState::Loading);
                Some(url)
            }
            Err(e) => {
                self.fail(AuthError::from(e));
                None
            }
        }
    }

    async fn complete(&self, redirect: &str) -> AuthState {
        let mut flow = self.flow.lock().await;

        let Some(attempt) = flow.take() else {
            if self.state.borrow().is_loading() {
                return self.fail(AuthError::from(CallbackError::NoOutstandingAttempt));
            }
            tracing::warn!("Ignoring redirect: no login attempt is in progress");
            return self.state.borrow().clone();
        };

        let code = match interpret_callback(redirect, &attempt) {
            CallbackOutcome::AuthorizationCode { code, .. } => code,
            CallbackOutcome::AuthorizationError(e) => return self.fail(AuthError::from(e)),
            CallbackOutcome::Cancelled => {
                tracing::info!("Login cancelled by the user");
                return self.settle(AuthState::NotAuthenticated);
            }
        };

        let exchanged = self.exchanger.exchange(&code, &attempt).await;
        // the verifier is single use
        drop(attempt);
        let record = match exchanged {
            Ok(record) => record,
            Err(e) => return self.fail(AuthError::from(e)),
        };

        if let Err(e) = self.store.save(record.clone()).await {
            return self.fail(AuthError::from(e));
        }

        self.verify(&record).await
    }

    async fn restore(&self) -> AuthState {
        let flow = self.flow.lock().await;
        if flow.is_some() {
            tracing::debug!("Login in progress, not restoring");
            return self.state.borrow().clone();
        }

        let Some(record) = self.store.current() else {
            tracing::debug!("No stored access token");
            return self.settle(AuthState::NotAuthenticated);
        };

        self.settle(AuthState::Loading);
        self.verify(&record).await
    }

    /// Fetch the profile for `record` and settle accordingly. Must be called
    /// with the flow lock held.
    async fn verify(&self, record: &AccessTokenRecord) -> AuthState {
        match self.profiles.fetch(record).await {
            Ok(profile) => {
                tracing::info!(login = %profile.login, "Authenticated");
                self.settle(AuthState::Authenticated(profile))
            }
            Err(e) => {
                let error = AuthError::from(e);
                if !error.is_token_invalidation() {
                    return self.fail(error);
                }
                tracing::info!("Stored access token is no longer valid, clearing it");
                match self.store.clear().await {
                    Ok(()) => self.settle(AuthState::NotAuthenticated),
                    Err(e) => self.fail(AuthError::from(e)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileError;
    use crate::profile::tests::octocat_json;
    use crate::store::MemoryBackend;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    /// Answers every fetch with the same canned result.
    struct StaticProfiles(Result<UserProfile, ProfileError>);

    #[async_trait::async_trait]
    impl ProfileFetcher for StaticProfiles {
        async fn fetch(&self, _token: &AccessTokenRecord) -> Result<UserProfile, ProfileError> {
            self.0.clone()
        }
    }

    fn octocat() -> UserProfile {
        serde_json::from_value(octocat_json()).unwrap()
    }

    fn config() -> OAuthConfig {
        // never contacted in these tests
        let mut config = OAuthConfig::new("Iv1.client");
        config.token_url = "http://127.0.0.1:9/login/oauth/access_token".to_string();
        config
    }

    fn session_with(
        store: Arc<TokenStore>,
        profiles: Result<UserProfile, ProfileError>,
    ) -> AuthSession {
        AuthSession::new(config(), store, Arc::new(StaticProfiles(profiles))).unwrap()
    }

    fn state_param(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_bad_config() {
        let store = Arc::new(TokenStore::in_memory());
        let result = AuthSession::new(
            OAuthConfig::new(""),
            store,
            Arc::new(StaticProfiles(Ok(octocat()))),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_login_enters_loading() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        assert_eq!(session.state(), AuthState::NotAuthenticated);

        let url = session.login().await.unwrap();
        assert_eq!(session.state(), AuthState::Loading);
        assert!(url.as_str().contains("code_challenge_method=S256"));
    }

    #[tokio::test]
    async fn test_second_login_while_loading_is_noop() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        let first = session.login().await.unwrap();
        assert!(session.login().await.is_none());

        // the original attempt is still the outstanding one
        let state = state_param(&first);
        let outcome = session
            .handle_callback(&format!("octo://oauth/callback?state={state}"))
            .await;
        assert_eq!(outcome, AuthState::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_cancel_returns_to_not_authenticated() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        session.login().await.unwrap();
        assert_eq!(session.cancel().await, AuthState::NotAuthenticated);

        // attempt is gone: a late redirect is ignored
        let late = session
            .handle_callback("octo://oauth/callback?code=abc&state=whatever")
            .await;
        assert_eq!(late, AuthState::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_state_mismatch_settles_on_error() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        session.login().await.unwrap();

        let state = session
            .handle_callback("octo://oauth/callback?code=abc123&state=forged")
            .await;
        let message = state.error_message().unwrap();
        assert!(message.contains("state mismatch"));
        assert_eq!(session.store().current(), None);
    }

    #[tokio::test]
    async fn test_provider_error_settles_on_error() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        let url = session.login().await.unwrap();
        let state = state_param(&url);

        let settled = session
            .handle_callback(&format!(
                "octo://oauth/callback?error=access_denied&error_description=The+user+has+denied+your+application+access.&state={state}"
            ))
            .await;
        assert_eq!(
            settled,
            AuthState::Error("The user has denied your application access.".to_string())
        );
    }

    #[tokio::test]
    async fn test_retry_issues_fresh_attempt() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        let first = session.login().await.unwrap();
        session
            .handle_callback("octo://oauth/callback?code=abc123&state=forged")
            .await;
        assert!(session.state().error_message().is_some());

        let second = session.retry().await.unwrap();
        assert_eq!(session.state(), AuthState::Loading);
        assert_ne!(state_param(&first), state_param(&second));
    }

    #[tokio::test]
    async fn test_retry_outside_error_is_noop() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        assert!(session.retry().await.is_none());
        assert_eq!(session.state(), AuthState::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_restore_without_token() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        assert_eq!(session.restore().await, AuthState::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_restore_with_valid_token() {
        let backend = Arc::new(MemoryBackend::with_record(AccessTokenRecord::new(
            "tok_1", "bearer", "repo user",
        )));
        let store = Arc::new(TokenStore::open(backend).await.unwrap());
        let session = session_with(store, Ok(octocat()));

        assert_eq!(session.restore().await, AuthState::Authenticated(octocat()));
        assert!(session.login().await.is_none());
    }

    #[tokio::test]
    async fn test_restore_with_revoked_token_clears_it() {
        let backend = Arc::new(MemoryBackend::with_record(AccessTokenRecord::new(
            "revoked", "bearer", "",
        )));
        let store = Arc::new(TokenStore::open(backend.clone()).await.unwrap());
        let session = session_with(store.clone(), Err(ProfileError::Unauthorized));

        assert_eq!(session.restore().await, AuthState::NotAuthenticated);
        assert_eq!(store.current(), None);
        assert_eq!(crate::store::TokenBackend::load(&*backend).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_with_server_error_keeps_token() {
        let backend = Arc::new(MemoryBackend::with_record(AccessTokenRecord::new(
            "tok_1", "bearer", "",
        )));
        let store = Arc::new(TokenStore::open(backend).await.unwrap());
        let session = session_with(store.clone(), Err(ProfileError::Http { status: 502 }));

        let state = session.restore().await;
        assert!(state.error_message().unwrap().contains("502"));
        assert!(store.current().is_some());
    }

    #[tokio::test]
    async fn test_logout_from_loading_discards_attempt() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        let url = session.login().await.unwrap();

        assert_eq!(session.logout().await, AuthState::NotAuthenticated);
        let state = state_param(&url);
        let late = session
            .handle_callback(&format!("octo://oauth/callback?code=abc123&state={state}"))
            .await;
        assert_eq!(late, AuthState::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_handle_unauthorized_clears_store() {
        let backend = Arc::new(MemoryBackend::with_record(AccessTokenRecord::new(
            "tok_1", "bearer", "",
        )));
        let store = Arc::new(TokenStore::open(backend).await.unwrap());
        let session = session_with(store.clone(), Ok(octocat()));
        session.restore().await;

        assert_eq!(session.handle_unauthorized().await, AuthState::NotAuthenticated);
        assert_eq!(store.current(), None);
    }

    #[tokio::test]
    async fn test_states_stream_follows_transitions() {
        let session = session_with(Arc::new(TokenStore::in_memory()), Ok(octocat()));
        let mut states = session.states();
        assert_eq!(states.next().await, Some(AuthState::NotAuthenticated));

        session.login().await.unwrap();
        assert_eq!(states.next().await, Some(AuthState::Loading));

        session.cancel().await;
        assert_eq!(states.next().await, Some(AuthState::NotAuthenticated));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AuthState::Loading.to_string(), "loading");
        assert_eq!(
            AuthState::Authenticated(octocat()).to_string(),
            "authenticated as octocat"
        );
    }
}
