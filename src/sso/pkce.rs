//! PKCE (Proof Key for Code Exchange) values for OAuth 2.0.
//!
//! RFC 7636 with the S256 challenge method.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A PKCE verifier/challenge pair
#[derive(Debug, Clone)]
pub struct Pkce {
    /// The code verifier (random base64url string)
    pub verifier: String,
    /// The code challenge (base64url-encoded SHA256 of the verifier)
    pub challenge: String,
}

impl Pkce {
    /// Generate a new pair from cryptographically secure random bytes
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut verifier_bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(verifier_bytes))
    }

    /// Build the pair from an existing verifier
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());
        Self { verifier, challenge }
    }
}
