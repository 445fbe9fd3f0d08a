//! Create-only object stores for durable audit records.
//!
//! Every backend implements [`ObjectStore::put_new`], which must fail with
//! [`StoreError::AlreadyExists`] rather than overwrite an existing object.
//! That single rule is what makes the ledger append-only.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ObjectLockMode, ServerSideEncryption};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::event::AuditEvent;

/// Store-side metadata attached to every audit object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Errors from a durable object store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// An object with this name already exists and was left untouched.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// Any other failure: network, credentials, permissions, disk.
    #[error("object store error: {0}")]
    Backend(String),
}

/// A blob store supporting create-only writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `name`, failing if `name` already exists.
    async fn put_new(
        &self,
        name: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError>;

    /// Short backend label for logs and health output.
    fn kind(&self) -> &'static str;
}

/// Object name for `event`: `{prefix}{YYYY}/{MM}/{DD}/{event_id}.json`.
pub fn object_name(prefix: &str, event: &AuditEvent) -> String {
    format!(
        "{prefix}{}/{}.json",
        event.timestamp.format("%Y/%m/%d"),
        event.event_id
    )
}

/// Metadata mirrored onto the stored object for filtering without a read.
pub fn object_metadata(event: &AuditEvent) -> ObjectMetadata {
    let mut meta = ObjectMetadata::new();
    meta.insert("event_type".into(), event.event_type.as_str().into());
    meta.insert("severity".into(), event.severity.as_str().into());
    meta.insert(
        "user_id".into(),
        event
            .actor
            .user_id
            .clone()
            .unwrap_or_else(|| "anonymous".into()),
    );
    meta.insert("timestamp".into(), event.timestamp.to_rfc3339());
    meta
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// [`ObjectStore`] backed by an S3 bucket using conditional `PutObject`.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    sse_kms_key_id: Option<String>,
    retention_days: Option<u32>,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            sse_kms_key_id: None,
            retention_days: None,
        }
    }

    /// Encrypt objects server-side with the given KMS key.
    pub fn with_sse_kms(mut self, key_id: Option<String>) -> Self {
        self.sse_kms_key_id = key_id;
        self
    }

    /// Apply compliance-mode object lock for `days`. Requires a bucket with
    /// object lock enabled.
    pub fn with_retention_days(mut self, days: Option<u32>) -> Self {
        self.retention_days = days.filter(|d| *d > 0);
        self
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_new(
        &self,
        name: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .content_type("application/json")
            .if_none_match("*")
            .body(ByteStream::from(body));

        for (key, value) in metadata {
            req = req.metadata(key, header_value(value));
        }
        if let Some(key_id) = &self.sse_kms_key_id {
            req = req
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(key_id);
        }
        if let Some(days) = self.retention_days {
            let until = Utc::now() + chrono::Duration::days(i64::from(days));
            req = req
                .object_lock_mode(ObjectLockMode::Compliance)
                .object_lock_retain_until_date(aws_sdk_s3::primitives::DateTime::from_secs(
                    until.timestamp(),
                ));
        }

        match req.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let precondition_failed = e.code() == Some("PreconditionFailed")
                    || e.raw_response().map(|r| r.status().as_u16()) == Some(412);
                if precondition_failed {
                    Err(StoreError::AlreadyExists(name.to_owned()))
                } else {
                    Err(StoreError::Backend(DisplayErrorContext(&e).to_string()))
                }
            }
        }
    }

    fn kind(&self) -> &'static str {
        "s3"
    }
}

/// Encode a metadata value for an `x-amz-meta-*` header.
///
/// Printable ASCII passes through; anything else becomes an RFC 2047
/// encoded-word, which is how S3 itself returns non-ASCII metadata.
fn header_value(value: &str) -> String {
    if value.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        value.to_owned()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// [`ObjectStore`] that writes one file per object under a root directory.
///
/// Metadata is written alongside as `<name>.meta.json`. Both files are first
/// written and synced under hidden staging names, then the body is published
/// with a hard link (which fails if the name is taken) and the sidecar is
/// renamed into place. A failed call leaves neither file behind, so it can be
/// retried; [`StoreError::AlreadyExists`] means the body name was already taken.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(name);
        let normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if name.is_empty() || !normal {
            return Err(StoreError::Backend(format!("invalid object name: {name}")));
        }
        Ok(self.root.join(relative))
    }
}

/// Hidden sibling of `path` used while a write is in flight.
fn staging_path(path: &Path, stage: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file_name}.{stage}.tmp"))
}

async fn write_synced(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| StoreError::Backend(format!("open {}: {e}", path.display())))?;
    file.write_all(contents)
        .await
        .map_err(|e| StoreError::Backend(format!("write {}: {e}", path.display())))?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::Backend(format!("sync {}: {e}", path.display())))
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove audit staging file");
        }
    }
}

struct FsWrite<'a> {
    name: &'a str,
    body_path: PathBuf,
    meta_path: PathBuf,
    body_stage: PathBuf,
    meta_stage: PathBuf,
}

impl FsWrite<'_> {
    async fn publish(&self, body: &[u8], meta: &[u8]) -> Result<(), StoreError> {
        write_synced(&self.body_stage, body).await?;
        write_synced(&self.meta_stage, meta).await?;

        tokio::fs::hard_link(&self.body_stage, &self.body_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    StoreError::AlreadyExists(self.name.to_owned())
                }
                _ => StoreError::Backend(format!("link {}: {e}", self.body_path.display())),
            })?;

        // Body published; any orphaned sidecar is replaced.
        if let Err(e) = tokio::fs::rename(&self.meta_stage, &self.meta_path).await {
            remove_if_present(&self.body_path).await;
            return Err(StoreError::Backend(format!(
                "rename {}: {e}",
                self.meta_path.display()
            )));
        }

        if let Some(parent) = self.body_path.parent() {
            let synced = match tokio::fs::File::open(parent).await {
                Ok(dir) => dir.sync_all().await,
                Err(e) => Err(e),
            };
            if let Err(e) = synced {
                warn!(path = %parent.display(), error = %e, "failed to sync audit directory");
            }
        }
        Ok(())
    }

    async fn clean_up(&self) {
        remove_if_present(&self.body_stage).await;
        remove_if_present(&self.meta_stage).await;
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_new(
        &self,
        name: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(format!("mkdir {}: {e}", parent.display())))?;
        }
        let meta = serde_json::to_vec_pretty(metadata)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let stage = Uuid::new_v4().simple().to_string();
        let meta_path = path.with_extension("meta.json");
        let write = FsWrite {
            name,
            body_stage: staging_path(&path, &stage),
            meta_stage: staging_path(&meta_path, &stage),
            body_path: path,
            meta_path,
        };
        let result = write.publish(&body, &meta).await;
        write.clean_up().await;
        result
    }

    fn kind(&self) -> &'static str {
        "filesystem"
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// A stored object held by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

/// In-process [`ObjectStore`] for tests and local development.
///
/// [`MemoryObjectStore::set_offline`] simulates an unreachable backend.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    offline: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn get(&self, name: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_new(
        &self,
        name: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".into()));
        }
        let mut objects = self.objects.lock().await;
        if objects.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_owned()));
        }
        objects.insert(
            name.to_owned(),
            StoredObject {
                body,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
