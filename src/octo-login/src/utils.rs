//! Utility functions for the octo-login module.

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use std::path::Path;

/// Mask a token or key for safe display.
pub fn safe_format_key(key: &str) -> String {
    if key.len() <= 13 || !key.is_ascii() {
        return "***".to_string();
    }
    let prefix = &key[..8];
    let suffix = &key[key.len() - 5..];
    format!("{prefix}***{suffix}")
}

/// Set restrictive file permissions (0600 on Unix).
pub(crate) fn set_file_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

/// `byte_len` bytes from the thread-local CSPRNG, base64url-encoded without padding.
pub(crate) fn random_url_safe(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Constant-time string comparison.
///
/// Runs in time independent of where the inputs first differ; only the length
/// check short-circuits.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_format_key_long() {
        let key = "gho_1234567890ABCDE";
        assert_eq!(safe_format_key(key), "gho_1234***ABCDE");
    }

    #[test]
    fn test_safe_format_key_short() {
        assert_eq!(safe_format_key("tok_1"), "***");
    }

    #[test]
    fn test_random_url_safe_is_unpadded_and_unique() {
        let a = random_url_safe(32);
        let b = random_url_safe(32);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("state-abc", "state-abc"));
        assert!(!constant_time_eq("state-abc", "state-abd"));
        assert!(!constant_time_eq("state", "state-abc"));
        assert!(constant_time_eq("", ""));
    }
}
