//! Encryption key resolution, caching, and background reload.
//!
//! # Lifecycle
//!
//! 1. The first encrypt/decrypt call asks [`KeyManager::ring`] for the key ring.
//! 2. On a cold cache the manager fetches the configured secret through its
//!    [`KeySource`], base64-decodes it and requires exactly 32 bytes.
//! 3. The ring lives only in process memory inside a [`KeyCache`].
//! 4. Optionally, [`reload_task`] re-fetches on an interval; a changed secret
//!    becomes current and the old key is kept for decryption.
//!
//! # Security invariants
//!
//! - Key material is **never** written to disk, logged, or attached to spans.
//! - Without a configured secret store the manager falls back to a random
//!   per-process key. Data sealed under it is unrecoverable after restart.

pub mod store;

pub use store::{KeyBytes, KeyCache, KeyError, KeyRing};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::time;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditEventType, AuditLedger, AuditSeverity};

/// Name reported for the in-process fallback key.
pub const EPHEMERAL_SECRET_ID: &str = "ephemeral";

/// A store that holds base64-encoded key material under a name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the base64 string stored under `secret_id`.
    async fn fetch(&self, secret_id: &str) -> Result<String, KeyError>;
}

/// [`KeySource`] backed by AWS Secrets Manager.
///
/// The secret is expected in `SecretString`; a `SecretBinary` holding the same
/// base64 text is accepted as well.
#[derive(Clone)]
pub struct SecretsManagerKeySource {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerKeySource {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeySource for SecretsManagerKeySource {
    async fn fetch(&self, secret_id: &str) -> Result<String, KeyError> {
        let secret = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| KeyError::Unavailable(format!("get_secret_value failed: {e}")))?;

        if let Some(text) = secret.secret_string() {
            return Ok(text.to_owned());
        }
        match secret.secret_binary() {
            Some(blob) => String::from_utf8(blob.as_ref().to_vec())
                .map_err(|_| KeyError::InvalidEncoding),
            None => Err(KeyError::Unavailable(format!(
                "secret {secret_id} has no value"
            ))),
        }
    }
}

/// [`KeySource`] that serves one random key generated at construction.
pub struct EphemeralKeySource {
    encoded: Zeroizing<String>,
}

impl EphemeralKeySource {
    pub fn new() -> Self {
        Self {
            encoded: Zeroizing::new(crate::crypto::generate_key()),
        }
    }
}

impl Default for EphemeralKeySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeySource for EphemeralKeySource {
    async fn fetch(&self, _secret_id: &str) -> Result<String, KeyError> {
        Ok(self.encoded.as_str().to_owned())
    }
}

/// Resolves and caches the key ring for one [`crate::crypto::CipherEngine`].
pub struct KeyManager {
    source: Arc<dyn KeySource>,
    secret_id: String,
    previous_secret_id: Option<String>,
    cache: KeyCache,
}

impl KeyManager {
    /// Create a manager that reads `secret_id` (and optionally a superseded
    /// `previous_secret_id`) from `source`.
    pub fn new(
        source: Arc<dyn KeySource>,
        secret_id: impl Into<String>,
        previous_secret_id: Option<String>,
    ) -> Self {
        Self {
            source,
            secret_id: secret_id.into(),
            previous_secret_id,
            cache: KeyCache::new(),
        }
    }

    /// Create a manager holding a random per-process key.
    ///
    /// For development and tests only.
    pub fn ephemeral() -> Self {
        warn!("using an ephemeral per-process encryption key; NOT FOR PRODUCTION USE");
        Self::new(Arc::new(EphemeralKeySource::new()), EPHEMERAL_SECRET_ID, None)
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    pub fn is_ephemeral(&self) -> bool {
        self.secret_id == EPHEMERAL_SECRET_ID
    }

    /// Returns `true` once the key ring has been fetched.
    pub fn is_ready(&self) -> bool {
        self.cache.is_ready()
    }

    /// Return the cached key ring, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the current secret cannot be fetched or
    /// decoded. Nothing is cached in that case.
    pub async fn ring(&self) -> Result<Arc<KeyRing>, KeyError> {
        self.cache.get_or_load(|| self.fetch_ring()).await
    }

    /// Re-fetch the secrets and swap in the result.
    ///
    /// Returns `true` if the current key changed. On error the cached ring is
    /// left untouched.
    pub async fn reload(&self) -> Result<bool, KeyError> {
        let fresh = self.fetch_ring().await?;
        Ok(self.cache.replace(fresh).await)
    }

    async fn fetch_ring(&self) -> Result<KeyRing, KeyError> {
        let current = self.fetch_key(&self.secret_id).await?;
        let mut ring = KeyRing::new(current);

        if let Some(previous_id) = &self.previous_secret_id {
            match self.fetch_key(previous_id).await {
                Ok(previous) if previous != ring.current => ring.previous.push(previous),
                Ok(_) => {}
                Err(e) => warn!(
                    secret_id = %previous_id,
                    error = %e,
                    "previous encryption key unavailable; older envelopes may not decrypt"
                ),
            }
        }

        info!(
            secret_id = %self.secret_id,
            previous_keys = ring.previous.len(),
            "encryption key ring loaded"
        );
        Ok(ring)
    }

    async fn fetch_key(&self, secret_id: &str) -> Result<KeyBytes, KeyError> {
        let encoded = Zeroizing::new(self.source.fetch(secret_id).await?);
        decode_key(&encoded)
    }
}

/// Decode base64 key material into a [`KeyBytes`].
pub fn decode_key(encoded: &str) -> Result<KeyBytes, KeyError> {
    let raw = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyError::InvalidEncoding)?,
    );
    KeyBytes::from_slice(&raw)
}

/// Spawn a background task that periodically reloads the key ring.
///
/// The first reload fires after one full interval. Every reload is recorded
/// in the audit ledger as an `encryption_key_access` event; on failure the
/// previous ring is retained.
pub fn reload_task(
    keys: Arc<KeyManager>,
    ledger: Arc<AuditLedger>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; the startup fetch already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (severity, outcome) = match keys.reload().await {
                Ok(rotated) => {
                    info!(rotated, "encryption key ring reloaded");
                    (AuditSeverity::Info, serde_json::json!({ "rotated": rotated }))
                }
                Err(e) => {
                    warn!(error = %e, "encryption key reload failed; retaining previous ring");
                    (AuditSeverity::Error, serde_json::json!({ "error": e.to_string() }))
                }
            };
            let mut metadata = serde_json::Map::new();
            metadata.insert("trigger".into(), "reload".into());
            metadata.insert("secret_id".into(), keys.secret_id().into());
            metadata.insert("result".into(), outcome);
            if let Err(e) = ledger
                .log_security_event(
                    AuditEventType::EncryptionKeyAccess,
                    severity,
                    "key_reload",
                    None,
                    None,
                    metadata,
                )
                .await
            {
                warn!(error = %e, "failed to audit key reload");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use mockall::predicate::eq;

    fn encoded(byte: u8) -> String {
        STANDARD.encode([byte; KEY_LEN])
    }

    #[tokio::test]
    async fn fetches_current_key_once() {
        let mut source = MockKeySource::new();
        source
            .expect_fetch()
            .with(eq("phi-encryption-key"))
            .times(1)
            .returning(|_| Ok(encoded(0x11)));
        let keys = KeyManager::new(Arc::new(source), "phi-encryption-key", None);

        let first = keys.ring().await.unwrap();
        let second = keys.ring().await.unwrap();
        assert_eq!(first.current, second.current);
        assert!(keys.is_ready());
    }

    #[tokio::test]
    async fn concurrent_first_access_fetches_once() {
        let mut source = MockKeySource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(encoded(0x22)));
        let keys = Arc::new(KeyManager::new(Arc::new(source), "k", None));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let keys = keys.clone();
                tokio::spawn(async move { keys.ring().await.map(|r| r.current.clone()) })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn unavailable_store_is_surfaced_and_retried_next_call() {
        let mut source = MockKeySource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(KeyError::Unavailable("timeout".into())));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(encoded(0x33)));
        let keys = KeyManager::new(Arc::new(source), "k", None);

        assert!(matches!(keys.ring().await, Err(KeyError::Unavailable(_))));
        assert!(!keys.is_ready());
        assert!(keys.ring().await.is_ok());
    }

    #[tokio::test]
    async fn missing_previous_key_is_tolerated() {
        let mut source = MockKeySource::new();
        source
            .expect_fetch()
            .with(eq("current"))
            .returning(|_| Ok(encoded(0x01)));
        source
            .expect_fetch()
            .with(eq("previous"))
            .returning(|_| Err(KeyError::Unavailable("not found".into())));
        let keys = KeyManager::new(Arc::new(source), "current", Some("previous".into()));

        let ring = keys.ring().await.unwrap();
        assert!(ring.previous.is_empty());
    }

    #[tokio::test]
    async fn previous_key_joins_the_ring() {
        let mut source = MockKeySource::new();
        source
            .expect_fetch()
            .with(eq("current"))
            .returning(|_| Ok(encoded(0x02)));
        source
            .expect_fetch()
            .with(eq("previous"))
            .returning(|_| Ok(encoded(0x01)));
        let keys = KeyManager::new(Arc::new(source), "current", Some("previous".into()));

        let ring = keys.ring().await.unwrap();
        assert_eq!(ring.previous.len(), 1);
    }

    #[tokio::test]
    async fn reload_demotes_rotated_key() {
        let mut source = MockKeySource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(encoded(0x01)));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(encoded(0x02)));
        let keys = KeyManager::new(Arc::new(source), "k", None);

        keys.ring().await.unwrap();
        assert!(keys.reload().await.unwrap());
        let ring = keys.ring().await.unwrap();
        assert_eq!(ring.current, decode_key(&encoded(0x02)).unwrap());
        assert_eq!(ring.previous, vec![decode_key(&encoded(0x01)).unwrap()]);
    }

    #[tokio::test]
    async fn ephemeral_key_is_stable_for_the_process() {
        let keys = KeyManager::ephemeral();
        assert!(keys.is_ephemeral());
        let a = keys.ring().await.unwrap().current.clone();
        keys.reload().await.unwrap();
        let b = keys.ring().await.unwrap().current.clone();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn reload_task_audits_each_reload() {
        use crate::audit::{AuditEvent, MemoryObjectStore};

        let keys = Arc::new(KeyManager::ephemeral());
        keys.ring().await.unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = Arc::new(
            AuditLedger::builder()
                .durable_inline(store.clone(), Duration::from_secs(1))
                .build(),
        );

        let task = reload_task(keys, ledger, Duration::from_millis(20));
        for _ in 0..100 {
            if !store.names().await.is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        let names = store.names().await;
        let object = store.get(&names[0]).await.unwrap();
        let event: AuditEvent = serde_json::from_slice(&object.body).unwrap();
        assert_eq!(event.event_type, AuditEventType::EncryptionKeyAccess);
        assert_eq!(event.action, "key_reload");
        assert_eq!(event.metadata["trigger"], "reload");
        assert_eq!(event.metadata["result"]["rotated"], false);
    }

    #[test]
    fn decode_key_rejects_bad_input() {
        assert!(matches!(decode_key("***"), Err(KeyError::InvalidEncoding)));
        assert!(matches!(
            decode_key(&STANDARD.encode([0u8; 16])),
            Err(KeyError::InvalidLength(16))
        ));
    }
}
