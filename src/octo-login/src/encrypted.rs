//! Encrypted file-based token storage.
//!
//! Uses AES-256-GCM with a machine-derived key. This is the fallback when no
//! keychain is reachable (headless Linux, containers).

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng, rand_core::RngCore},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::store::{StorageError, TokenBackend};
use crate::types::{AccessTokenRecord, StoredToken};
use crate::utils::set_file_permissions;

const ENCRYPTED_AUTH_FILE: &str = "auth.enc";
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Generate encryption key from machine-specific entropy.
fn get_machine_derived_key() -> [u8; KEY_SIZE] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();

    // Machine ID (Linux) or fallback
    #[cfg(target_os = "linux")]
    {
        if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
            hasher.update(id.trim().as_bytes());
        } else if let Ok(id) = std::fs::read_to_string("/var/lib/dbus/machine-id") {
            hasher.update(id.trim().as_bytes());
        }
    }

    if let Ok(hostname) = hostname::get() {
        hasher.update(hostname.as_encoded_bytes());
    }

    #[cfg(unix)]
    {
        // SAFETY: getuid has no preconditions and cannot fail.
        hasher.update(unsafe { libc::getuid() }.to_le_bytes());
    }
    #[cfg(windows)]
    {
        if let Ok(user) = std::env::var("USERNAME") {
            hasher.update(user.as_bytes());
        }
    }

    if let Some(home) = dirs::home_dir() {
        hasher.update(home.to_string_lossy().as_bytes());
    }

    // Application-specific salt
    hasher.update(b"octo-cli-token-encryption-v1-machine-key");

    hasher.finalize().into()
}

/// [`TokenBackend`] writing an encrypted `auth.enc` into a directory.
#[derive(Clone)]
pub struct EncryptedFileBackend {
    path: PathBuf,
    key: [u8; KEY_SIZE],
}

impl EncryptedFileBackend {
    /// Store the token in `dir/auth.enc`, keyed to this machine and user.
    pub fn new(dir: &Path) -> Self {
        Self::with_key(dir, get_machine_derived_key())
    }

    /// Store the token in `dir/auth.enc` under an explicit key.
    pub fn with_key(dir: &Path, key: [u8; KEY_SIZE]) -> Self {
        Self {
            path: dir.join(ENCRYPTED_AUTH_FILE),
            key,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &[u8; KEY_SIZE]) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let key = self.key;
        tokio::task::spawn_blocking(move || op(&path, &key))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
            .map_err(StorageError::EncryptedFile)
    }
}

impl std::fmt::Debug for EncryptedFileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for EncryptedFileBackend {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[async_trait]
impl TokenBackend for EncryptedFileBackend {
    fn name(&self) -> &'static str {
        "encrypted_file"
    }

    async fn load(&self) -> Result<Option<AccessTokenRecord>, StorageError> {
        self.run(|path, key| load_from_encrypted_file(path, key)).await
    }

    async fn save(&self, record: &AccessTokenRecord) -> Result<(), StorageError> {
        let stored = record.to_stored();
        self.run(move |path, key| save_to_encrypted_file(path, key, &stored))
            .await
    }

    async fn clear(&self) -> Result<bool, StorageError> {
        self.run(|path, _| delete_encrypted_file(path)).await
    }
}

fn load_from_encrypted_file(path: &Path, key: &[u8; KEY_SIZE]) -> Result<Option<AccessTokenRecord>> {
    if !path.exists() {
        return Ok(None);
    }

    let encrypted_data = std::fs::read(path)
        .with_context(|| format!("Failed to read encrypted auth file: {}", path.display()))?;

    if encrypted_data.len() < NONCE_SIZE {
        anyhow::bail!("Invalid encrypted auth file: {}", path.display());
    }

    let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow::anyhow!("Cipher init failed: {e}"))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow::anyhow!("Decryption failed: {e}"))?;

    let mut json_str = String::from_utf8(plaintext).context("Invalid UTF-8 in decrypted data")?;
    let parsed = serde_json::from_str::<StoredToken>(&json_str);
    json_str.zeroize();

    let stored = parsed.context("Failed to parse decrypted auth data")?;
    tracing::debug!(path = %path.display(), "Loaded access token from encrypted file");
    Ok(Some(AccessTokenRecord::from_stored(stored)))
}

/// Encrypt and write atomically: temp file, fsync, rename.
fn save_to_encrypted_file(path: &Path, key: &[u8; KEY_SIZE], stored: &StoredToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut json = serde_json::to_string(stored).context("Failed to serialize auth data")?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow::anyhow!("Cipher init failed: {e}"))?;

    let encrypted = cipher.encrypt(nonce, json.as_bytes());
    json.zeroize();
    let ciphertext = encrypted.map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    let tmp_path = path.with_extension("enc.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        set_file_permissions(&tmp_path)?;
        file.write_all(&output)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
    }

    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to write encrypted auth file: {}", path.display()))?;

    tracing::debug!(path = %path.display(), "Saved access token to encrypted file");
    Ok(())
}

/// Overwrite with random data, then delete.
fn delete_encrypted_file(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    if let Ok(metadata) = std::fs::metadata(path) {
        let mut random_data = vec![0u8; metadata.len() as usize];
        OsRng.fill_bytes(&mut random_data);
        let _ = std::fs::write(path, &random_data);
    }

    std::fs::remove_file(path)
        .with_context(|| format!("Failed to delete encrypted auth file: {}", path.display()))?;

    Ok(true)
}
