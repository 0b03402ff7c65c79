//! Login command handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use octo_login::{
    AuthSession, AuthState, CredentialsStoreMode, GitHubProfileClient, OAuthConfig, ProfileError,
    ProfileFetcher, TokenStore, app_home, backend_for, safe_format_key,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::LoginArgs;
use crate::styled_output::{print_dim, print_info, print_success, print_warning};

/// Resolve the octo home directory and make sure it exists, since the
/// encrypted file backend writes into it.
fn ensure_octo_home() -> Result<PathBuf> {
    let home = app_home().context("Could not determine a home directory; set OCTO_HOME")?;
    std::fs::create_dir_all(&home)
        .with_context(|| format!("Failed to create octo home directory at {}", home.display()))?;
    Ok(home)
}

async fn open_store(mode: CredentialsStoreMode, home: &std::path::Path) -> Result<Arc<TokenStore>> {
    let store = TokenStore::open(backend_for(mode, home))
        .await
        .with_context(|| format!("Failed to open {mode} credential store"))?;
    Ok(Arc::new(store))
}

/// Read one line from stdin. `None` on EOF.
async fn read_redirect() -> Result<Option<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    lines.next_line().await.context("Failed to read from stdin")
}

/// Run the browser login: print the authorization URL, wait for the pasted
/// redirect, then report the settled state.
pub async fn run_login(args: LoginArgs, mode: CredentialsStoreMode) -> Result<()> {
    let home = ensure_octo_home()?;

    let mut config = OAuthConfig::load(&home)?;
    if let Some(client_id) = args.client_id {
        config.client_id = client_id;
    }
    if let Some(redirect_uri) = args.redirect_uri {
        config.redirect_uri = redirect_uri;
    }

    let store = open_store(mode, &home).await?;
    let session = AuthSession::with_github(config, store)?;

    if let AuthState::Authenticated(profile) = session.restore().await {
        print_success(&format!("Already logged in as {}.", profile.login));
        print_dim("Run `octo logout` first to switch accounts.");
        return Ok(());
    }

    let Some(url) = session.login().await else {
        match session.state() {
            AuthState::Error(message) => bail!(message),
            state => bail!("Could not start login ({state})"),
        }
    };

    print_info("Open this URL in your browser to authorize octo:");
    println!("{url}");
    print_dim("After approving, paste the full redirect URL here (empty line to cancel):");

    let redirect = read_redirect().await?.unwrap_or_default();
    if redirect.trim().is_empty() {
        session.cancel().await;
        print_warning("Login cancelled.");
        return Ok(());
    }

    match session.handle_callback(redirect.trim()).await {
        AuthState::Authenticated(profile) => {
            print_success(&format!(
                "Logged in as {} ({}). Credentials stored in {mode} storage.",
                profile.display_name(),
                profile.login
            ));
            Ok(())
        }
        AuthState::NotAuthenticated => {
            print_warning("Login cancelled.");
            Ok(())
        }
        AuthState::Error(message) => bail!(message),
        AuthState::Loading => bail!("Login did not complete"),
    }
}

/// Forget the stored token.
pub async fn run_logout(mode: CredentialsStoreMode) -> Result<()> {
    let home = ensure_octo_home()?;
    let store = open_store(mode, &home).await?;

    if store.current().is_none() {
        print_info("Not logged in.");
        return Ok(());
    }

    store.clear().await.context("Failed to remove stored credentials")?;
    print_success("Logged out.");
    Ok(())
}

/// Show who the stored token belongs to.
///
/// Checking a token needs no OAuth app, so this works without a client ID.
pub async fn run_status(mode: CredentialsStoreMode) -> Result<()> {
    let home = ensure_octo_home()?;
    let config = OAuthConfig::load(&home)?;
    let store = open_store(mode, &home).await?;

    let Some(token) = store.current() else {
        print_info("Not logged in.");
        return Ok(());
    };
    tracing::debug!(token = %safe_format_key(token.token()), "Checking stored access token");

    let profiles = GitHubProfileClient::new(&config)?;
    match profiles.fetch(&token).await {
        Ok(profile) => {
            print_success(&format!("Logged in as {} ({}).", profile.display_name(), profile.login));
            if !token.scope.is_empty() {
                print_dim(&format!("Scopes: {}", token.scopes().join(", ")));
            }
            Ok(())
        }
        Err(ProfileError::Unauthorized) => {
            store.clear().await.context("Failed to remove revoked credentials")?;
            print_warning("Not logged in. The stored token was revoked and has been removed.");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to verify the stored token"),
    }
}
