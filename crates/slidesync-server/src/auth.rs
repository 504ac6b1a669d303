//! Controller credential verification.
//!
//! The session controller only asks "does this secret grant control?"; the
//! mechanism behind the answer lives here and can be replaced without
//! touching the hub or dispatcher.

use sha2::{Digest, Sha256};

/// Decides whether a presented credential grants the controller role.
pub trait CredentialVerifier: Send + Sync {
    /// `true` if `presented` grants control.
    fn verify(&self, presented: &str) -> bool;
}

/// Compares against a single shared secret.
///
/// Only the SHA-256 digest of the secret is retained; comparisons are made
/// between digests so the comparison time does not depend on how much of the
/// plaintext matches.
pub struct SharedSecretVerifier {
    digest: Vec<u8>,
}

impl SharedSecretVerifier {
    /// Build a verifier for `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            digest: Sha256::digest(secret.as_bytes()).to_vec(),
        }
    }
}

impl CredentialVerifier for SharedSecretVerifier {
    fn verify(&self, presented: &str) -> bool {
        let presented = Sha256::digest(presented.as_bytes());
        presented
            .iter()
            .zip(&self.digest)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Rejects every credential. Used when no controller secret is configured.
pub struct DenyAllVerifier;

impl CredentialVerifier for DenyAllVerifier {
    fn verify(&self, _presented: &str) -> bool {
        false
    }
}
