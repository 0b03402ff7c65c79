//! PKCE (Proof Key for Code Exchange) implementation.
//!
//! This implements RFC 7636 for the authorization-code flow.
//!
//! SECURITY: Only the S256 challenge method is supported. The Plain method
//! is explicitly NOT implemented as it defeats the purpose of PKCE.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shortest verifier RFC 7636 allows.
pub const MIN_VERIFIER_LEN: usize = 43;

/// Longest verifier RFC 7636 allows.
pub const MAX_VERIFIER_LEN: usize = 128;

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    /// SHA-256 hash of the verifier, base64url encoded.
    S256,
}

impl ChallengeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
        }
    }
}

impl std::fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PKCE code verifier and the challenge derived from it.
///
/// The pair is deliberately not `Clone`: exactly one copy of the verifier
/// exists, and it is wiped from memory when the pair is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
    #[zeroize(skip)]
    method: ChallengeMethod,
}

impl PkcePair {
    /// Generate a new pair with the default verifier length.
    pub fn generate() -> Self {
        Self::with_verifier_len(crate::constants::DEFAULT_VERIFIER_LEN)
    }

    /// Generate a new pair; `len` is clamped to `[43, 128]`.
    pub fn with_verifier_len(len: usize) -> Self {
        Self::from_verifier(generate_verifier(len))
    }

    /// Build a pair around an existing verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = derive_challenge(&verifier);
        Self {
            verifier,
            challenge,
            method: ChallengeMethod::S256,
        }
    }

    /// The secret verifier, sent only to the token endpoint.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The challenge sent with the authorization request.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> ChallengeMethod {
        self.method
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish()
    }
}

/// Generate a cryptographically random code verifier.
///
/// The verifier is drawn from the thread-local CSPRNG and encoded as base64url
/// without padding, so it only uses `[A-Z] / [a-z] / [0-9] / "-" / "_"`.
/// `len` is clamped to `[43, 128]`; at 6 bits per character the minimum length
/// still carries more than 256 bits of entropy.
pub fn generate_verifier(len: usize) -> String {
    let len = len.clamp(MIN_VERIFIER_LEN, MAX_VERIFIER_LEN);

    // 3 bytes encode to 4 characters.
    let mut bytes = vec![0u8; (len * 3).div_ceil(4)];
    rand::rng().fill(bytes.as_mut_slice());

    let mut verifier = URL_SAFE_NO_PAD.encode(&bytes);
    bytes.zeroize();
    verifier.truncate(len);
    verifier
}

/// Compute the S256 code challenge from a verifier.
///
/// S256: BASE64URL(SHA256(ASCII(code_verifier)))
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();
    URL_SAFE_NO_PAD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn test_pkce_generation() {
        let pkce = PkcePair::generate();

        assert_eq!(pkce.verifier().len(), crate::constants::DEFAULT_VERIFIER_LEN);
        // 32-byte SHA-256 digest base64url encoded
        assert_eq!(pkce.challenge().len(), 43);
        assert_ne!(pkce.verifier(), pkce.challenge());
        assert_eq!(pkce.method(), ChallengeMethod::S256);
    }

    #[test]
    fn test_verifier_length_is_clamped() {
        for (requested, expected) in [(0, 43), (10, 43), (43, 43), (64, 64), (100, 100), (128, 128), (500, 128)] {
            assert_eq!(generate_verifier(requested).len(), expected, "requested {requested}");
        }
    }

    #[test]
    fn test_verifier_character_set() {
        for len in [43, 77, 128] {
            for _ in 0..50 {
                let verifier = generate_verifier(len);
                assert!(is_url_safe(&verifier), "Invalid character in verifier: {verifier}");
                assert!(!verifier.contains(['+', '/', '=']));
            }
        }
    }

    #[test]
    fn test_pkce_deterministic() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(derive_challenge(verifier), derive_challenge(verifier));
    }

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let pkce = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        assert_eq!(pkce.challenge(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_distinct_verifiers_give_distinct_challenges() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier(), b.verifier());
        assert_ne!(a.challenge(), b.challenge());
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let pkce = PkcePair::from_verifier("super-secret-verifier-value-that-is-long-enough".into());
        let rendered = format!("{pkce:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
