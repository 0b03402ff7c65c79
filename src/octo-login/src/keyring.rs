//! Keyring-based token storage.
//!
//! The record is kept as one JSON value under a single key:
//! - Windows: Credential Manager
//! - macOS: Keychain
//! - Linux: Secret Service (gnome-keyring, kwallet)

use std::sync::Arc;

use async_trait::async_trait;
use octo_keyring_store::KeyringStore;
use zeroize::Zeroize;

use crate::constants::{KEYRING_ACCOUNT, KEYRING_SERVICE};
use crate::store::{StorageError, TokenBackend};
use crate::types::{AccessTokenRecord, StoredToken};

/// [`TokenBackend`] that lives in the OS keychain.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    store: Arc<KeyringStore>,
    account: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Use a custom service name, e.g. to isolate test runs.
    pub fn with_service(service: &str) -> Self {
        Self {
            store: Arc::new(KeyringStore::with_service(service)),
            account: KEYRING_ACCOUNT.to_string(),
        }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&KeyringStore, &str) -> Result<T, StorageError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || op(&store, &account))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keyring"
    }

    async fn load(&self) -> Result<Option<AccessTokenRecord>, StorageError> {
        self.run(|store, account| {
            let Some(mut json) = store.get(account)? else {
                return Ok(None);
            };
            let parsed = serde_json::from_str::<StoredToken>(&json);
            json.zeroize();
            let stored = parsed.map_err(|e| StorageError::Corrupt(e.to_string()))?;
            tracing::debug!("Loaded access token from keyring");
            Ok(Some(AccessTokenRecord::from_stored(stored)))
        })
        .await
    }

    async fn save(&self, record: &AccessTokenRecord) -> Result<(), StorageError> {
        let mut json = serde_json::to_string(&record.to_stored())
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.run(move |store, account| {
            let result = store.set(account, &json);
            json.zeroize();
            result?;
            tracing::debug!("Saved access token to keyring");
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<bool, StorageError> {
        self.run(|store, account| Ok(store.delete(account)?)).await
    }
}
