//! Detached signature verification for downloaded packages.
//!
//! Uses minisign signatures; SHA-256 digests are logged alongside for auditing.

use minisign_verify::{PublicKey, Signature};
use sha2::{Digest, Sha256};

/// Pass/fail check of a detached signature against a payload.
pub trait Verifier: Send + Sync {
    /// `true` only when `signature` is present and valid for `payload`.
    fn verify(&self, signature: &str, payload: &[u8]) -> bool;
}

/// Minisign verifier bound to one public key.
#[derive(Debug, Clone)]
pub struct MinisignVerifier {
    public_key: String,
}

impl MinisignVerifier {
    /// `public_key` is the base64 key line of a minisign `.pub` file.
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
        }
    }

    fn check(&self, signature: &str, payload: &[u8]) -> anyhow::Result<()> {
        let public_key = PublicKey::from_base64(self.public_key.trim())
            .map_err(|e| anyhow::anyhow!("Invalid public key: {e}"))?;
        let signature = Signature::decode(signature.trim())
            .map_err(|e| anyhow::anyhow!("Invalid signature format: {e}"))?;
        public_key
            .verify(payload, &signature, false)
            .map_err(|e| anyhow::anyhow!("Signature mismatch: {e}"))
    }
}

impl Verifier for MinisignVerifier {
    fn verify(&self, signature: &str, payload: &[u8]) -> bool {
        if signature.trim().is_empty() {
            tracing::warn!("refusing to verify payload without a signature");
            return false;
        }
        match self.check(signature, payload) {
            Ok(()) => {
                tracing::debug!(sha256 = %compute_sha256_checksum(payload), "signature verified");
                true
            }
            Err(e) => {
                tracing::warn!("signature verification failed: {e:#}");
                false
            }
        }
    }
}

/// Hex-encoded SHA-256 digest of `content`.
pub fn compute_sha256_checksum(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
