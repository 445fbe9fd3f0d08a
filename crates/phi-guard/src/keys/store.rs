//! [`KeyCache`]: lazily populated, lock-free cache for the key ring.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::KEY_LEN;

/// Errors produced while resolving key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The secret store could not be reached or the secret does not exist.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// The secret value is not valid base64.
    #[error("secret value is not valid base64")]
    InvalidEncoding,

    /// The decoded key material has an unexpected length.
    #[error("key has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Zeroed on drop; never printed.
#[derive(Clone)]
pub struct KeyBytes(Zeroizing<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Copy `raw` into a new key buffer.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidLength`] if `raw` is not [`KEY_LEN`] bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self, KeyError> {
        if raw.len() != KEY_LEN {
            return Err(KeyError::InvalidLength(raw.len()));
        }
        let mut buf = Zeroizing::new([0u8; KEY_LEN]);
        buf.copy_from_slice(raw);
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl PartialEq for KeyBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for KeyBytes {}

impl Zeroize for KeyBytes {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl ZeroizeOnDrop for KeyBytes {}

impl std::fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// The active key plus any keys it superseded.
///
/// Encryption always uses [`KeyRing::current`]; decryption tries `current`
/// first and then each entry of [`KeyRing::previous`] in order.
#[derive(Debug, Clone)]
pub struct KeyRing {
    pub current: KeyBytes,
    pub previous: Vec<KeyBytes>,
}

impl KeyRing {
    pub fn new(current: KeyBytes) -> Self {
        Self {
            current,
            previous: Vec::new(),
        }
    }

    /// All keys in decryption trial order.
    pub fn decryption_order(&self) -> impl Iterator<Item = &KeyBytes> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }

    /// Build the ring that results from `fresh` replacing `self`.
    ///
    /// If the current key changed, the old current key is demoted to the front
    /// of the previous list so existing envelopes stay readable.
    fn superseded_by(&self, mut fresh: KeyRing) -> KeyRing {
        if fresh.current != self.current && !fresh.previous.contains(&self.current) {
            fresh.previous.insert(0, self.current.clone());
        }
        for old in &self.previous {
            if *old != fresh.current && !fresh.previous.contains(old) {
                fresh.previous.push(old.clone());
            }
        }
        fresh
    }
}

/// Thread-safe cache for the [`KeyRing`].
///
/// Reads are lock-free once populated. Population is serialised by an async
/// mutex so that concurrent first callers trigger a single fetch; a failed
/// fetch leaves the cache empty and the next caller tries again.
#[derive(Debug, Default)]
pub struct KeyCache {
    ring: ArcSwapOption<KeyRing>,
    fetch_lock: Mutex<()>,
}

impl KeyCache {
    /// Create a new, empty [`KeyCache`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a key ring is currently cached.
    pub fn is_ready(&self) -> bool {
        self.ring.load().is_some()
    }

    /// Return the cached ring, running `load` to populate it on first use.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<KeyRing>, KeyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<KeyRing, KeyError>>,
    {
        if let Some(ring) = self.ring.load_full() {
            return Ok(ring);
        }
        let _guard = self.fetch_lock.lock().await;
        if let Some(ring) = self.ring.load_full() {
            return Ok(ring);
        }
        let ring = Arc::new(load().await?);
        self.ring.store(Some(ring.clone()));
        Ok(ring)
    }

    /// Replace the cached ring with `fresh`, demoting the old current key.
    ///
    /// Returns `true` if the current key changed.
    pub async fn replace(&self, fresh: KeyRing) -> bool {
        let _guard = self.fetch_lock.lock().await;
        let (next, rotated) = match self.ring.load_full() {
            Some(existing) => {
                let rotated = existing.current != fresh.current;
                (existing.superseded_by(fresh), rotated)
            }
            None => (fresh, false),
        };
        self.ring.store(Some(Arc::new(next)));
        rotated
    }
}
