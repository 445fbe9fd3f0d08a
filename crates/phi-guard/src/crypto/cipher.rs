//! AES-256-GCM encryption and decryption of individual string values.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG. GCM nonce reuse
//! under one key breaks both confidentiality and authentication, so nonces are
//! never derived, counted, or accepted from callers.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// A parsed ciphertext envelope.
///
/// The storage representation is `base64(nonce ‖ ciphertext ‖ tag)` using the
/// standard alphabet with padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub sealed: Vec<u8>,
}

impl Envelope {
    /// Encode this envelope to its storage representation.
    pub fn to_base64(&self) -> String {
        let mut raw = Vec::with_capacity(NONCE_LEN + self.sealed.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.sealed);
        STANDARD.encode(raw)
    }

    /// Parse a stored envelope string.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MalformedEnvelope`] if the string is not valid
    /// base64 or is too short to hold a nonce and a tag.
    pub fn from_base64(s: &str) -> Result<Self, CipherError> {
        let raw = STANDARD
            .decode(s.trim())
            .map_err(|_| CipherError::MalformedEnvelope)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::MalformedEnvelope);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&raw[..NONCE_LEN]);
        Ok(Self {
            nonce,
            sealed: raw[NONCE_LEN..].to_vec(),
        })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// No usable key could be resolved from the secret store.
    #[error("encryption key unavailable: {0}")]
    KeyUnavailable(String),

    /// Tag verification failed. Deliberately carries no detail: wrong key,
    /// tampered bytes and mismatched associated data look identical.
    #[error("authentication failure")]
    AuthenticationFailure,

    /// The envelope is not base64 or is shorter than nonce + tag.
    #[error("malformed envelope")]
    MalformedEnvelope,

    /// The plaintext exceeds the configured per-field size bound.
    #[error("plaintext too large: {len} bytes exceeds limit of {max}")]
    PlaintextTooLarge { len: usize, max: usize },

    /// AES-GCM refused to seal the input (unreachable with a valid key).
    #[error("aead seal failed")]
    SealFailure,
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn seal(plaintext: &[u8], aad: &[u8], key: &[u8]) -> Result<Envelope, CipherError> {
    let cipher = build_cipher(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CipherError::SealFailure)?;

    Ok(Envelope { nonce, sealed })
}

/// Verify and decrypt an [`Envelope`] under `key` with the given `aad`.
///
/// # Errors
///
/// Returns [`CipherError::AuthenticationFailure`] if the tag does not verify.
pub fn open(envelope: &Envelope, aad: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: envelope.sealed.as_ref(),
                aad,
            },
        )
        .map_err(|_| CipherError::AuthenticationFailure)
}

/// One-way SHA-256 of an identifier, as 64 lowercase hex characters.
///
/// Lets audit records correlate events for the same patient without ever
/// holding the identifier itself.
pub fn hash_identifier(identifier: &str) -> String {
    format!("{:x}", Sha256::digest(identifier.as_bytes()))
}

/// Whether `value` has the exact shape produced by [`hash_identifier`].
pub fn is_identifier_hash(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Generate a fresh 256-bit key, base64-encoded for storage in the secret store.
pub fn generate_key() -> String {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    STANDARD.encode(&key[..])
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength);
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength)
}
