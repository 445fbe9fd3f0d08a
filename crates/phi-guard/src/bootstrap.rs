//! Builds the key manager and audit ledger from [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::audit::{
    AuditEventType, AuditLedger, AuditSeverity, FsObjectStore, JsonLinesSink, MemoryObjectStore,
    ObjectStore, S3ObjectStore, TracingSink,
};
use crate::aws::AwsClients;
use crate::config::{AuditBackend, AuditDelivery, Config};
use crate::crypto::CipherEngine;
use crate::keys::{KeyManager, SecretsManagerKeySource};

/// Whether any configured component talks to AWS.
pub fn needs_aws(cfg: &Config) -> bool {
    cfg.key_secret_id.is_some() || cfg.audit_backend == AuditBackend::S3
}

/// Key manager for the configured secret, or an ephemeral one in development.
///
/// # Errors
///
/// Returns an error if a secret is configured but no AWS clients were built.
pub fn key_manager(cfg: &Config, aws: Option<&AwsClients>) -> Result<KeyManager> {
    match &cfg.key_secret_id {
        Some(secret_id) => {
            let aws = aws.context("AWS clients are required to resolve KEY_SECRET_ID")?;
            Ok(KeyManager::new(
                Arc::new(SecretsManagerKeySource::new(aws.secretsmanager.clone())),
                secret_id.clone(),
                cfg.previous_key_secret_id.clone(),
            ))
        }
        None => Ok(KeyManager::ephemeral()),
    }
}

/// Cipher engine around `keys` with the configured plaintext bound.
pub fn cipher_engine(cfg: &Config, keys: KeyManager) -> CipherEngine {
    CipherEngine::new(Arc::new(keys)).with_max_plaintext_bytes(cfg.max_plaintext_bytes)
}

/// Audit ledger with the configured local sinks and durable backend.
///
/// Background delivery spawns its worker, so this must run inside a Tokio
/// runtime.
///
/// # Errors
///
/// Returns an error if the local audit file cannot be opened or the S3
/// backend is selected without AWS clients.
pub fn audit_ledger(cfg: &Config, aws: Option<&AwsClients>) -> Result<AuditLedger> {
    let mut builder = AuditLedger::builder()
        .local_sink(TracingSink)
        .object_prefix(cfg.audit_prefix.clone())
        .unknown_actions(cfg.unknown_action_policy)
        .origin(cfg.service_name.clone(), cfg.environment.clone());

    if let Some(path) = &cfg.audit_local_file {
        let sink = JsonLinesSink::open(path)
            .with_context(|| format!("failed to open audit log file {path}"))?;
        builder = builder.local_sink(sink);
    }

    let store: Option<Arc<dyn ObjectStore>> = match cfg.audit_backend {
        AuditBackend::None => None,
        AuditBackend::Memory => {
            warn!("audit events are held in memory only; NOT FOR PRODUCTION USE");
            Some(Arc::new(MemoryObjectStore::new()))
        }
        AuditBackend::Filesystem => {
            let root = cfg
                .audit_fs_root
                .as_deref()
                .context("AUDIT_FS_ROOT is required for the filesystem backend")?;
            Some(Arc::new(FsObjectStore::new(root)))
        }
        AuditBackend::S3 => {
            let aws = aws.context("AWS clients are required for the s3 audit backend")?;
            let bucket = cfg
                .audit_s3_bucket
                .as_deref()
                .context("AUDIT_S3_BUCKET is required for the s3 backend")?;
            Some(Arc::new(
                S3ObjectStore::new(aws.s3.clone(), bucket)
                    .with_sse_kms(cfg.audit_sse_kms_key_id.clone())
                    .with_retention_days(cfg.audit_retention_days),
            ))
        }
    };

    if let Some(store) = store {
        info!(
            backend = store.kind(),
            delivery = ?cfg.audit_delivery,
            prefix = %cfg.audit_prefix,
            "durable audit backend configured"
        );
        builder = match cfg.audit_delivery {
            AuditDelivery::Inline => builder.durable_inline(store, cfg.audit_write_timeout()),
            AuditDelivery::Background => builder.durable_background(
                store,
                cfg.audit_queue_capacity,
                cfg.audit_retry_policy(),
            ),
        };
    } else {
        warn!("no durable audit backend configured; events are logged locally only");
    }

    Ok(builder.build())
}

/// Fetch the key ring and record the access in the ledger.
///
/// # Errors
///
/// Returns an error if the key cannot be fetched; the failure is audited first.
pub async fn load_keys(engine: &CipherEngine, ledger: &AuditLedger) -> Result<()> {
    let keys = engine.keys();
    let result = engine.warm().await;

    let mut metadata = Map::new();
    metadata.insert("trigger".into(), Value::String("startup".into()));
    metadata.insert("secret_id".into(), Value::String(keys.secret_id().into()));
    metadata.insert("ephemeral".into(), Value::Bool(keys.is_ephemeral()));
    let severity = match &result {
        Ok(()) => AuditSeverity::Info,
        Err(e) => {
            metadata.insert("error".into(), Value::String(e.to_string()));
            AuditSeverity::Critical
        }
    };
    ledger
        .log_security_event(
            AuditEventType::EncryptionKeyAccess,
            severity,
            "key_load",
            None,
            None,
            metadata,
        )
        .await
        .context("failed to audit encryption key access")?;

    result.context("failed to load encryption key")
}
