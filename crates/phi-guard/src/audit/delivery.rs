//! Durable delivery of audit events to an [`ObjectStore`].
//!
//! Inline delivery awaits the write on the caller's task. Background delivery
//! hands the serialised event to a worker over a bounded channel and retries
//! transient failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, warn};

use super::event::AuditEvent;
use super::store::{object_metadata, object_name, ObjectMetadata, ObjectStore, StoreError};

/// Default bound on a single durable write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Why a durable write did not happen.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurableWriteFailure {
    #[error("audit object already exists: {0}")]
    AlreadyExists(String),

    #[error("audit backend error: {0}")]
    Backend(String),

    #[error("audit write timed out after {0:?}")]
    Timeout(Duration),

    #[error("audit queue is full")]
    QueueFull,

    #[error("failed to serialise audit event: {0}")]
    Serialize(String),
}

impl From<StoreError> for DurableWriteFailure {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists(name) => Self::AlreadyExists(name),
            StoreError::Backend(msg) => Self::Backend(msg),
        }
    }
}

impl DurableWriteFailure {
    /// Whether a later attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }
}

/// Receipt describing what `log_event` did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    /// No durable backend is configured.
    LocalOnly,
    /// The event was durably written before `log_event` returned.
    Persisted { object_name: String },
    /// The event was accepted by the background writer.
    Queued { object_name: String },
    /// The durable write failed; the event exists only in local sinks.
    Degraded {
        object_name: String,
        #[serde(serialize_with = "serialize_display")]
        failure: DurableWriteFailure,
    },
}

fn serialize_display<S: serde::Serializer>(
    failure: &DurableWriteFailure,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(failure)
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::Persisted { .. } => "persisted",
            Self::Queued { .. } => "queued",
            Self::Degraded { .. } => "degraded",
        }
    }
}

/// A serialised event ready to be written.
#[derive(Debug, Clone)]
pub struct DurableWrite {
    pub object_name: String,
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

impl DurableWrite {
    /// Serialise `event` as pretty JSON under `{prefix}{YYYY}/{MM}/{DD}/{id}.json`.
    pub fn for_event(prefix: &str, event: &AuditEvent) -> Result<Self, DurableWriteFailure> {
        let body = serde_json::to_vec_pretty(event)
            .map_err(|e| DurableWriteFailure::Serialize(e.to_string()))?;
        Ok(Self {
            object_name: object_name(prefix, event),
            body: Bytes::from(body),
            metadata: object_metadata(event),
        })
    }
}

/// One create-only write bounded by `timeout`.
pub async fn write_once(
    store: &dyn ObjectStore,
    job: &DurableWrite,
    timeout: Duration,
) -> Result<(), DurableWriteFailure> {
    match time::timeout(
        timeout,
        store.put_new(&job.object_name, job.body.clone(), &job.metadata),
    )
    .await
    {
        Ok(result) => result.map_err(DurableWriteFailure::from),
        Err(_) => Err(DurableWriteFailure::Timeout(timeout)),
    }
}

/// Retry schedule for background writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub write_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Handle to the background writer task.
#[derive(Debug, Clone)]
pub struct BackgroundWriter {
    tx: mpsc::Sender<DurableWrite>,
}

impl BackgroundWriter {
    /// Spawn the worker. It exits once every handle has been dropped and the
    /// queue has drained.
    pub fn spawn(
        store: Arc<dyn ObjectStore>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<DurableWrite>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                write_with_retry(store.as_ref(), &job, policy).await;
            }
            debug!("audit background writer stopped");
        });
        (Self { tx }, handle)
    }

    /// Queue `job` without waiting.
    pub fn try_enqueue(&self, job: DurableWrite) -> Result<(), DurableWriteFailure> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DurableWriteFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                DurableWriteFailure::Backend("audit background writer stopped".into())
            }
        })
    }
}

async fn write_with_retry(store: &dyn ObjectStore, job: &DurableWrite, policy: RetryPolicy) {
    let mut attempt = 1;
    loop {
        match write_once(store, job, policy.write_timeout).await {
            Ok(()) => {
                debug!(object_name = %job.object_name, attempt, "audit event persisted");
                return;
            }
            Err(failure) if failure.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    object_name = %job.object_name,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %failure,
                    "audit write failed; retrying"
                );
                time::sleep(delay).await;
                attempt += 1;
            }
            Err(failure) => {
                error!(
                    object_name = %job.object_name,
                    attempt,
                    error = %failure,
                    "audit write abandoned"
                );
                return;
            }
        }
    }
}
