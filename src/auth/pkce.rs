//! PKCE S256 challenges and `state` nonces (RFC 7636)
//!
//! The verifier is 32 random bytes, base64url-encoded without padding; the
//! challenge is `BASE64URL(SHA256(ASCII(verifier)))`.
//!
//! # How the interactive sign-in uses it
//!
//! 1. A fresh [`PkceChallenge`] and `state` are generated per attempt.
//! 2. The authorization URL carries `code_challenge`,
//!    `code_challenge_method=S256` and `state`.
//! 3. The loopback callback must echo the same `state`; anything else is a
//!    `StateMismatch`.
//! 4. The code exchange sends the original `code_verifier`, which only this
//!    process knows.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>
//! - RFC 8252 section 7.3 (loopback redirects) <https://www.rfc-editor.org/rfc/rfc8252#section-7.3>

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE verifier and the challenge derived from it.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Sent to the token endpoint as `code_verifier` (43 characters)
    pub verifier: String,
    /// Sent to the authorization endpoint as `code_challenge`
    pub challenge: String,
    /// Always `S256`
    pub method: &'static str,
}

impl PkceChallenge {
    /// Generates a fresh verifier/challenge pair.
    ///
    /// # Examples
    ///
    /// ```
    /// use loopback_signin::auth::pkce::PkceChallenge;
    ///
    /// let pkce = PkceChallenge::generate();
    /// assert_eq!(pkce.verifier.len(), 43);
    /// assert_eq!(pkce.method, "S256");
    /// ```
    pub fn generate() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
            method: "S256",
        }
    }
}

/// Computes the S256 challenge of `verifier`.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

// ---------------------------------------------------------------------------
// State nonces
// ---------------------------------------------------------------------------

/// A random `state` value: 16 bytes, base64url without padding.
pub fn generate_state() -> String {
    random_urlsafe(16)
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
