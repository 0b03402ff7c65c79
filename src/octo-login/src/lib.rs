//! Octo Login - GitHub OAuth login for the octo client.
//!
//! Implements the authorization code flow with PKCE (S256):
//! - Authorization URL building with a fresh verifier and `state` nonce
//! - Redirect interpretation with anti-CSRF `state` checking
//! - Single-use code-for-token exchange
//! - Observable token store with serialized writes
//! - A session state machine driving the whole cycle
//!
//! Security features:
//! - OS keychain integration (Windows Credential Manager, macOS Keychain, Linux Secret Service)
//! - Encrypted file storage with AES-256-GCM
//! - Secure memory handling with secrecy and zeroize
//! - File permissions enforcement (0600)

// Core modules
pub mod config;
pub mod constants;
mod error;
pub mod types;
mod utils;

// Storage backends
mod encrypted;
pub mod keyring;
pub mod store;

// Flow components
pub mod callback;
pub mod exchange;
pub mod pkce;
pub mod profile;
pub mod request;

// State machine
pub mod session;

// Re-exports from config
pub use config::{ConfigError, OAuthConfig, app_home};

// Re-exports from constants
pub use constants::{KEYRING_ACCOUNT, KEYRING_SERVICE};

// Re-exports from types
pub use types::{AccessTokenRecord, CredentialsStoreMode};

// Re-exports from error
pub use error::AuthError;

// Re-exports from storage
pub use encrypted::EncryptedFileBackend;
pub use keyring::KeyringBackend;
pub use store::{FallbackBackend, MemoryBackend, StorageError, TokenBackend, TokenStore, backend_for};

// Re-exports from the flow components
pub use callback::{CallbackError, CallbackOutcome, interpret_callback, parse_callback};
pub use exchange::{ExchangeError, TokenExchanger};
pub use pkce::{ChallengeMethod, PkcePair, derive_challenge, generate_verifier};
pub use profile::{GitHubProfileClient, ProfileError, ProfileFetcher, UserProfile, authorization_header};
pub use request::{AuthorizationAttempt, build_authorization_request};

// Re-exports from session
pub use session::{AuthSession, AuthState};

// Re-exports from utils
pub use utils::safe_format_key;
