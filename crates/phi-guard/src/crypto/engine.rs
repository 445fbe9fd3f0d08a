//! [`CipherEngine`]: key-aware encryption of single PHI values.

use std::sync::Arc;

use tracing::{debug, warn};

use super::cipher::{self, CipherError, Envelope};
use crate::keys::{KeyError, KeyManager};

/// Default upper bound on a single plaintext value (64 KiB).
pub const DEFAULT_MAX_PLAINTEXT_BYTES: usize = 64 * 1024;

impl From<KeyError> for CipherError {
    fn from(e: KeyError) -> Self {
        CipherError::KeyUnavailable(e.to_string())
    }
}

/// Encrypts and decrypts individual field values under the managed key ring.
///
/// Owns its [`KeyManager`]; construct one per key set and share it behind an
/// `Arc`. All methods take `&self` and are safe to call concurrently.
pub struct CipherEngine {
    keys: Arc<KeyManager>,
    max_plaintext_bytes: usize,
}

impl CipherEngine {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self {
            keys,
            max_plaintext_bytes: DEFAULT_MAX_PLAINTEXT_BYTES,
        }
    }

    /// Override the per-value plaintext size bound.
    pub fn with_max_plaintext_bytes(mut self, max: usize) -> Self {
        self.max_plaintext_bytes = max;
        self
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Fetch the key ring now instead of on the first request.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::KeyUnavailable`] if the secret store fails.
    pub async fn warm(&self) -> Result<(), CipherError> {
        self.keys.ring().await?;
        Ok(())
    }

    /// Encrypt `plaintext`, binding it to `associated_data`.
    ///
    /// Returns `base64(nonce ‖ ciphertext ‖ tag)`. Two calls with identical
    /// input yield different envelopes.
    ///
    /// # Errors
    ///
    /// - [`CipherError::PlaintextTooLarge`] above the configured bound.
    /// - [`CipherError::KeyUnavailable`] if the key cannot be resolved.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        associated_data: Option<&str>,
    ) -> Result<String, CipherError> {
        if plaintext.len() > self.max_plaintext_bytes {
            return Err(CipherError::PlaintextTooLarge {
                len: plaintext.len(),
                max: self.max_plaintext_bytes,
            });
        }
        let ring = self.keys.ring().await?;
        let aad = associated_data.unwrap_or_default();
        let envelope = cipher::seal(plaintext.as_bytes(), aad.as_bytes(), ring.current.as_bytes())?;

        debug!(
            data_length = plaintext.len(),
            has_aad = associated_data.is_some(),
            "PHI value encrypted"
        );
        Ok(envelope.to_base64())
    }

    /// Decrypt an envelope produced by [`CipherEngine::encrypt`].
    ///
    /// `associated_data` must equal the value given at encryption time. The
    /// current key is tried first, then each previous key.
    ///
    /// # Errors
    ///
    /// - [`CipherError::MalformedEnvelope`] if the envelope cannot be parsed.
    /// - [`CipherError::AuthenticationFailure`] if no key verifies the tag.
    /// - [`CipherError::KeyUnavailable`] if the key cannot be resolved.
    pub async fn decrypt(
        &self,
        envelope: &str,
        associated_data: Option<&str>,
    ) -> Result<String, CipherError> {
        let parsed = Envelope::from_base64(envelope)?;
        let ring = self.keys.ring().await?;
        let aad = associated_data.unwrap_or_default();

        for (index, key) in ring.decryption_order().enumerate() {
            if let Ok(bytes) = cipher::open(&parsed, aad.as_bytes(), key.as_bytes()) {
                let plaintext =
                    String::from_utf8(bytes).map_err(|_| CipherError::AuthenticationFailure)?;
                if index > 0 {
                    debug!(key_index = index, "PHI value opened with a superseded key");
                }
                debug!(
                    data_length = plaintext.len(),
                    has_aad = associated_data.is_some(),
                    "PHI value decrypted"
                );
                return Ok(plaintext);
            }
        }

        warn!(
            has_aad = associated_data.is_some(),
            "envelope failed authentication"
        );
        Err(CipherError::AuthenticationFailure)
    }

    /// SHA-256 of `identifier` as lowercase hex. Keyless and deterministic.
    pub fn hash_identifier(&self, identifier: &str) -> String {
        cipher::hash_identifier(identifier)
    }
}
