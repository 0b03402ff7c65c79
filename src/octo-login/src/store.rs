//! Token persistence.
//!
//! [`TokenStore`] is the single owner of the access token. It serializes
//! writes, makes each one durable in a [`TokenBackend`] before publishing it,
//! and lets any number of observers follow the current value.

use std::path::Path;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::encrypted::EncryptedFileBackend;
use crate::keyring::KeyringBackend;
use crate::types::{AccessTokenRecord, CredentialsStoreMode};

/// Persistence failure. Never swallowed: an unpersisted token would leave the
/// user logged in for this process only.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("keychain error: {0}")]
    Keyring(#[from] octo_keyring_store::KeyringError),
    #[error("encrypted token file error: {0:#}")]
    EncryptedFile(anyhow::Error),
    #[error("stored token record is corrupt: {0}")]
    Corrupt(String),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("{backend} storage is unavailable")]
    Unavailable { backend: &'static str },
}

impl StorageError {
    /// The backend cannot be reached at all (no keychain, injected outage),
    /// as opposed to a reachable backend failing an operation.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StorageError::Keyring(e) => e.is_unavailable(),
            StorageError::Unavailable { .. } => true,
            _ => false,
        }
    }
}

/// A place to keep exactly one access token record.
///
/// Each `save` and `clear` must be atomic and durable when it returns `Ok`.
#[async_trait]
pub trait TokenBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn load(&self) -> Result<Option<AccessTokenRecord>, StorageError>;

    async fn save(&self, record: &AccessTokenRecord) -> Result<(), StorageError>;

    /// Returns whether a record was present.
    async fn clear(&self) -> Result<bool, StorageError>;
}

/// In-process backend. Used for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryBackend {
    record: Mutex<Option<AccessTokenRecord>>,
    #[cfg(test)]
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out holding `record`.
    pub fn with_record(record: AccessTokenRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    /// Simulate an outage: every operation fails while set.
    #[cfg(test)]
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        #[cfg(test)]
        {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable { backend: "memory" });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TokenBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Option<AccessTokenRecord>, StorageError> {
        self.check()?;
        Ok(self.record.lock().clone())
    }

    async fn save(&self, record: &AccessTokenRecord) -> Result<(), StorageError> {
        self.check()?;
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<bool, StorageError> {
        self.check()?;
        Ok(self.record.lock().take().is_some())
    }
}

/// Primary backend with a secondary used whenever the primary fails.
///
/// `save` writes first and only then removes the copy in the other backend,
/// so a failed save leaves the previous token where it was. `load` prefers
/// the primary.
pub struct FallbackBackend {
    primary: Arc<dyn TokenBackend>,
    secondary: Arc<dyn TokenBackend>,
}

impl FallbackBackend {
    pub fn new(primary: Arc<dyn TokenBackend>, secondary: Arc<dyn TokenBackend>) -> Self {
        Self { primary, secondary }
    }

    /// After a write to the secondary, the primary must not keep an older
    /// token that `load` would prefer.
    async fn evict_primary(&self) -> Result<(), StorageError> {
        let err = match self.primary.clear().await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        match self.primary.load().await {
            // unreadable or empty: load falls through to the secondary
            Err(_) | Ok(None) => {
                tracing::debug!(backend = self.primary.name(), error = %err, "Could not clear primary storage, nothing readable left");
                Ok(())
            }
            Ok(Some(_)) => Err(err),
        }
    }
}

#[async_trait]
impl TokenBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn load(&self) -> Result<Option<AccessTokenRecord>, StorageError> {
        match self.primary.load().await {
            Ok(Some(record)) => return Ok(Some(record)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    backend = self.primary.name(),
                    error = %e,
                    "Primary storage load failed, trying {}",
                    self.secondary.name()
                );
            }
        }
        self.secondary.load().await
    }

    async fn save(&self, record: &AccessTokenRecord) -> Result<(), StorageError> {
        match self.primary.save(record).await {
            Ok(()) => {
                if let Err(e) = self.secondary.clear().await {
                    // the primary is authoritative on load
                    tracing::debug!(backend = self.secondary.name(), error = %e, "Failed to clear stale token");
                }
                tracing::info!(backend = self.primary.name(), "Access token saved");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.primary.name(),
                    error = %e,
                    "Primary storage save failed, falling back to {}",
                    self.secondary.name()
                );
            }
        }

        self.secondary.save(record).await?;
        if let Err(e) = self.evict_primary().await {
            tracing::error!(backend = self.primary.name(), error = %e, "Stale token in primary storage would shadow the new one");
            if let Err(undo) = self.secondary.clear().await {
                tracing::warn!(backend = self.secondary.name(), error = %undo, "Failed to roll back fallback write");
            }
            return Err(e);
        }
        tracing::info!(backend = self.secondary.name(), "Access token saved");
        Ok(())
    }

    async fn clear(&self) -> Result<bool, StorageError> {
        let mut removed = false;
        let mut failure = None;
        for backend in [&self.primary, &self.secondary] {
            match backend.clear().await {
                Ok(found) => removed |= found,
                Err(e) if e.is_unavailable() => {
                    tracing::debug!(backend = backend.name(), error = %e, "Storage unavailable, nothing to clear");
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "Failed to clear access token");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

/// Build the backend for `mode`; file-based backends live in `home`.
pub fn backend_for(mode: CredentialsStoreMode, home: &Path) -> Arc<dyn TokenBackend> {
    match mode {
        CredentialsStoreMode::Auto => Arc::new(FallbackBackend::new(
            Arc::new(KeyringBackend::new()),
            Arc::new(EncryptedFileBackend::new(home)),
        )),
        CredentialsStoreMode::Keyring => Arc::new(KeyringBackend::new()),
        CredentialsStoreMode::EncryptedFile => Arc::new(EncryptedFileBackend::new(home)),
        CredentialsStoreMode::Memory => Arc::new(MemoryBackend::new()),
    }
}

/// Observable, serialized owner of the access token.
pub struct TokenStore {
    backend: Arc<dyn TokenBackend>,
    /// Held across the backend write and the publish, so writers never
    /// interleave and observers see writes in commit order.
    write_lock: tokio::sync::Mutex<()>,
    current: watch::Sender<Option<AccessTokenRecord>>,
}

impl TokenStore {
    /// Open the store, loading whatever the backend currently holds.
    pub async fn open(backend: Arc<dyn TokenBackend>) -> Result<Self, StorageError> {
        let initial = backend.load().await?;
        tracing::debug!(
            backend = backend.name(),
            has_token = initial.is_some(),
            "Opened token store"
        );
        let (current, _) = watch::channel(initial);
        Ok(Self {
            backend,
            write_lock: tokio::sync::Mutex::new(()),
            current,
        })
    }

    /// An empty store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            backend: Arc::new(MemoryBackend::new()),
            write_lock: tokio::sync::Mutex::new(()),
            current,
        }
    }

    /// Follow the stored token. Yields the current value immediately, then
    /// again after every `save` or `clear`. Never ends while the store lives.
    pub fn observe(&self) -> WatchStream<Option<AccessTokenRecord>> {
        WatchStream::new(self.current.subscribe())
    }

    /// Raw watch receiver, for callers that prefer `changed()` over a stream.
    pub fn subscribe(&self) -> watch::Receiver<Option<AccessTokenRecord>> {
        self.current.subscribe()
    }

    /// The token as of the last committed write.
    pub fn current(&self) -> Option<AccessTokenRecord> {
        self.current.borrow().clone()
    }

    /// Replace the stored record. Durable when this returns `Ok`.
    pub async fn save(&self, record: AccessTokenRecord) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.backend.save(&record).await {
            tracing::error!(backend = self.backend.name(), error = %e, "Failed to persist access token");
            self.resync().await;
            return Err(e);
        }
        self.current.send_replace(Some(record));
        Ok(())
    }

    /// Remove the stored record. Durable when this returns `Ok`.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let removed = match self.backend.clear().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(backend = self.backend.name(), error = %e, "Failed to clear access token");
                self.resync().await;
                return Err(e);
            }
        };
        tracing::debug!(backend = self.backend.name(), removed, "Cleared access token");
        self.current.send_replace(None);
        Ok(())
    }

    /// After a failed write, publish whatever the backend actually holds.
    /// Called with the write lock held.
    async fn resync(&self) {
        match self.backend.load().await {
            Ok(durable) => {
                self.current.send_if_modified(|current| {
                    if *current == durable {
                        false
                    } else {
                        *current = durable;
                        true
                    }
                });
            }
            Err(e) => {
                tracing::warn!(backend = self.backend.name(), error = %e, "Could not re-read storage after a failed write");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;

    fn record(token: &str) -> AccessTokenRecord {
        AccessTokenRecord::new(token, "bearer", "repo user")
    }

    /// A reachable backend that rejects selected operations, like a keychain
    /// that answers but refuses the write.
    #[derive(Default)]
    struct Faulty {
        inner: MemoryBackend,
        fail_load: bool,
        fail_save: bool,
        fail_clear: bool,
    }

    impl Faulty {
        fn refused(op: &str) -> StorageError {
            let err = octo_keyring_store::KeyringError::StoreFailed(format!("{op} refused"));
            StorageError::Keyring(err)
        }
    }

    #[async_trait]
    impl TokenBackend for Faulty {
        fn name(&self) -> &'static str {
            "faulty"
        }

        async fn load(&self) -> Result<Option<AccessTokenRecord>, StorageError> {
            if self.fail_load {
                return Err(StorageError::Corrupt("bad json".to_string()));
            }
            self.inner.load().await
        }

        async fn save(&self, record: &AccessTokenRecord) -> Result<(), StorageError> {
            if self.fail_save {
                return Err(Self::refused("save"));
            }
            self.inner.save(record).await
        }

        async fn clear(&self) -> Result<bool, StorageError> {
            if self.fail_clear {
                return Err(Self::refused("clear"));
            }
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_observe_emits_current_value_first() {
        let store = TokenStore::open(Arc::new(MemoryBackend::with_record(record("tok_0"))))
            .await
            .unwrap();

        let mut stream = store.observe();
        assert_eq!(stream.next().await, Some(Some(record("tok_0"))));
    }

    #[tokio::test]
    async fn test_observe_follows_mutations() {
        let store = TokenStore::in_memory();
        let mut stream = store.observe();
        assert_eq!(stream.next().await, Some(None));

        store.save(record("tok_1")).await.unwrap();
        assert_eq!(stream.next().await, Some(Some(record("tok_1"))));

        store.clear().await.unwrap();
        assert_eq!(stream.next().await, Some(None));
    }

    #[tokio::test]
    async fn test_observe_is_restartable() {
        let store = TokenStore::in_memory();
        store.save(record("tok_1")).await.unwrap();

        let first = store.observe().next().await;
        let second = store.observe().next().await;
        assert_eq!(first, second);
        assert_eq!(first, Some(Some(record("tok_1"))));
    }

    #[tokio::test]
    async fn test_clear_then_observe_is_empty() {
        let store = TokenStore::in_memory();
        store.save(record("tok_1")).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.observe().next().await, Some(None));
        assert_eq!(store.current(), None);
    }

    #[tokio::test]
    async fn test_failed_save_is_not_published() {
        let backend = Arc::new(MemoryBackend::new());
        let store = TokenStore::open(backend.clone()).await.unwrap();

        backend.set_unavailable(true);
        let err = store.save(record("tok_1")).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.current(), None);

        backend.set_unavailable(false);
        assert_eq!(backend.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_token() {
        let backend = Arc::new(MemoryBackend::with_record(record("tok_1")));
        let store = TokenStore::open(backend.clone()).await.unwrap();

        backend.set_unavailable(true);
        assert!(store.clear().await.is_err());
        assert_eq!(store.current(), Some(record("tok_1")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_end_consistent() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(TokenStore::open(backend.clone()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                if i % 5 == 0 {
                    store.clear().await
                } else {
                    store.save(record(&format!("tok_{i}"))).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // whatever write committed last is what both the backend and
        // observers see
        assert_eq!(backend.load().await.unwrap(), store.current());
    }

    #[tokio::test]
    async fn test_open_propagates_load_failure() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_unavailable(true);
        assert!(TokenStore::open(backend).await.is_err());
    }

    #[tokio::test]
    async fn test_fallback_uses_secondary_when_primary_unavailable() {
        let primary = Arc::new(MemoryBackend::new());
        let secondary = Arc::new(MemoryBackend::new());
        primary.set_unavailable(true);
        let fallback = FallbackBackend::new(primary.clone(), secondary.clone());

        fallback.save(&record("tok_1")).await.unwrap();
        assert_eq!(secondary.load().await.unwrap(), Some(record("tok_1")));
        assert_eq!(fallback.load().await.unwrap(), Some(record("tok_1")));

        assert!(fallback.clear().await.unwrap());
        assert_eq!(secondary.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fallback_save_wipes_stale_secondary() {
        let primary = Arc::new(MemoryBackend::new());
        let secondary = Arc::new(MemoryBackend::with_record(record("stale")));
        let fallback = FallbackBackend::new(primary.clone(), secondary.clone());

        fallback.save(&record("fresh")).await.unwrap();
        assert_eq!(primary.load().await.unwrap(), Some(record("fresh")));
        assert_eq!(secondary.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fallback_prefers_primary_on_load() {
        let primary = Arc::new(MemoryBackend::with_record(record("primary")));
        let secondary = Arc::new(MemoryBackend::with_record(record("secondary")));
        let fallback = FallbackBackend::new(primary, secondary);
        assert_eq!(fallback.load().await.unwrap(), Some(record("primary")));
    }

    #[tokio::test]
    async fn test_fallback_fails_when_both_unavailable() {
        let primary = Arc::new(MemoryBackend::new());
        let secondary = Arc::new(MemoryBackend::new());
        primary.set_unavailable(true);
        secondary.set_unavailable(true);
        let fallback = FallbackBackend::new(primary, secondary);

        assert!(fallback.save(&record("tok")).await.is_err());
    }

    #[tokio::test]
    async fn test_fallback_when_primary_refuses_write() {
        let primary = Arc::new(Faulty {
            inner: MemoryBackend::with_record(record("old")),
            fail_save: true,
            ..Faulty::default()
        });
        let secondary = Arc::new(MemoryBackend::new());
        let fallback = FallbackBackend::new(primary.clone(), secondary.clone());

        fallback.save(&record("new")).await.unwrap();
        assert_eq!(secondary.load().await.unwrap(), Some(record("new")));
        // the old primary copy must not shadow the new token
        assert_eq!(primary.load().await.unwrap(), None);
        assert_eq!(fallback.load().await.unwrap(), Some(record("new")));
    }

    #[tokio::test]
    async fn test_failed_fallback_save_keeps_previous_token() {
        let primary = Arc::new(Faulty {
            inner: MemoryBackend::with_record(record("old")),
            fail_save: true,
            fail_clear: true,
            ..Faulty::default()
        });
        let secondary = Arc::new(MemoryBackend::new());
        let fallback = Arc::new(FallbackBackend::new(primary, secondary.clone()));
        let store = TokenStore::open(fallback.clone()).await.unwrap();
        assert_eq!(store.current(), Some(record("old")));

        assert!(store.save(record("new")).await.is_err());
        assert_eq!(secondary.load().await.unwrap(), None);
        assert_eq!(fallback.load().await.unwrap(), Some(record("old")));
        assert_eq!(store.current(), Some(record("old")));
    }

    #[tokio::test]
    async fn test_failed_save_on_both_backends_keeps_old_token() {
        let primary = Arc::new(MemoryBackend::with_record(record("old")));
        let secondary = Arc::new(MemoryBackend::new());
        let fallback = Arc::new(FallbackBackend::new(primary.clone(), secondary.clone()));
        let store = TokenStore::open(fallback.clone()).await.unwrap();

        primary.set_unavailable(true);
        secondary.set_unavailable(true);
        assert!(store.save(record("new")).await.is_err());

        primary.set_unavailable(false);
        secondary.set_unavailable(false);
        assert_eq!(fallback.load().await.unwrap(), Some(record("old")));
        assert_eq!(store.current(), Some(record("old")));
    }

    #[tokio::test]
    async fn test_fallback_reads_secondary_when_primary_load_fails() {
        let primary = Arc::new(Faulty {
            fail_load: true,
            ..Faulty::default()
        });
        let secondary = Arc::new(MemoryBackend::with_record(record("on_disk")));
        let fallback = FallbackBackend::new(primary, secondary);
        assert_eq!(fallback.load().await.unwrap(), Some(record("on_disk")));
    }

    #[tokio::test]
    async fn test_fallback_clear_tries_every_backend() {
        let primary = Arc::new(Faulty {
            inner: MemoryBackend::with_record(record("a")),
            fail_clear: true,
            ..Faulty::default()
        });
        let secondary = Arc::new(MemoryBackend::with_record(record("b")));
        let fallback = FallbackBackend::new(primary, secondary.clone());

        assert!(fallback.clear().await.is_err());
        assert_eq!(secondary.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_clear_republishes_durable_state() {
        let primary = Arc::new(Faulty {
            inner: MemoryBackend::with_record(record("a")),
            fail_clear: true,
            ..Faulty::default()
        });
        let secondary = Arc::new(MemoryBackend::new());
        let fallback = Arc::new(FallbackBackend::new(primary, secondary));
        let store = TokenStore::open(fallback.clone()).await.unwrap();

        assert!(store.clear().await.is_err());
        assert_eq!(store.current(), fallback.load().await.unwrap());
        assert_eq!(store.current(), Some(record("a")));
    }

    #[tokio::test]
    async fn test_encrypted_backend_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(backend_for(CredentialsStoreMode::EncryptedFile, dir.path()))
            .await
            .unwrap();
        store.save(record("tok_disk")).await.unwrap();
        drop(store);

        let reopened = TokenStore::open(backend_for(CredentialsStoreMode::EncryptedFile, dir.path()))
            .await
            .unwrap();
        assert_eq!(reopened.current(), Some(record("tok_disk")));
    }
}
