//! Keyring-based credential storage for the octo OAuth client.
//!
//! Access tokens live in the OS-native keychain rather than on disk:
//! - Windows: Credential Manager
//! - macOS: Keychain
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//!
//! Every entry is addressed by a `(service, key)` pair. The login crate keeps
//! exactly one entry per service, so callers rarely need more than
//! [`KeyringStore::set`], [`KeyringStore::get`] and [`KeyringStore::delete`].

use thiserror::Error;
use tracing::{debug, warn};

/// Default service name for keyring entries.
pub const DEFAULT_SERVICE: &str = "octo-cli";

/// Errors that can occur during keyring operations.
#[derive(Error, Debug)]
pub enum KeyringError {
    /// Failed to access the keyring.
    #[error("Failed to access keyring: {0}")]
    AccessDenied(String),

    /// Failed to store the credential.
    #[error("Failed to store credential: {0}")]
    StoreFailed(String),

    /// Failed to delete the credential.
    #[error("Failed to delete credential: {0}")]
    DeleteFailed(String),

    /// Platform not supported.
    #[error("Keyring not supported on this platform")]
    NotSupported,

    /// The platform keychain service failed (no Secret Service on the bus,
    /// locked collection, and the like).
    #[error("Platform keyring failure: {0}")]
    PlatformFailure(String),

    /// Internal keyring error.
    #[error("Keyring error: {0}")]
    Internal(String),
}

impl KeyringError {
    /// Whether the error means no keychain is reachable at all, as opposed to
    /// a keychain that exists but refused a particular operation.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            KeyringError::AccessDenied(_)
                | KeyringError::NotSupported
                | KeyringError::PlatformFailure(_)
        )
    }
}

impl From<keyring::Error> for KeyringError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(_) => {
                KeyringError::AccessDenied("Cannot access keyring storage".to_string())
            }
            keyring::Error::PlatformFailure(e) => KeyringError::PlatformFailure(e.to_string()),
            _ => KeyringError::Internal(err.to_string()),
        }
    }
}

/// Result type for keyring operations.
pub type Result<T> = std::result::Result<T, KeyringError>;

/// Keyring store for secure credential management.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Create a new keyring store with the default service name.
    pub fn new() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
        }
    }

    /// Create a new keyring store with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// The service name entries are filed under.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn get_entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(KeyringError::from)
    }

    /// Store a credential in the keyring, replacing any previous value.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = self.get_entry(key)?;
        entry.set_password(value).map_err(|e| match e {
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                warn!(service = %self.service, key, "Keyring unavailable: {e}");
                KeyringError::from(e)
            }
            other => {
                warn!(service = %self.service, key, "Failed to store credential: {other}");
                KeyringError::StoreFailed(other.to_string())
            }
        })?;
        debug!(service = %self.service, key, "Stored credential");
        Ok(())
    }

    /// Retrieve a credential from the keyring.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = self.get_entry(key)?;
        match entry.get_password() {
            Ok(value) => {
                debug!(service = %self.service, key, "Retrieved credential");
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyringError::from(e)),
        }
    }

    /// Delete a credential from the keyring.
    ///
    /// Returns `false` when there was nothing to delete.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let entry = self.get_entry(key)?;
        match entry.delete_credential() {
            Ok(()) => {
                debug!(service = %self.service, key, "Deleted credential");
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e @ keyring::Error::NoStorageAccess(_)) => Err(KeyringError::from(e)),
            Err(e) => Err(KeyringError::DeleteFailed(e.to_string())),
        }
    }

    /// Check if a credential exists in the keyring.
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}
