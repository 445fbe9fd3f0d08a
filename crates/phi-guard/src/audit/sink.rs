//! Local sinks.
//!
//! Every audit event is handed to each local sink, and awaited, before any
//! durable write is attempted. A sink failure fails the `log_event` call.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use super::event::AuditEvent;

/// Errors raised by a local sink.
#[derive(Debug, Error)]
pub enum LocalEmitError {
    #[error("local audit sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialise audit event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("local audit sink unavailable: {0}")]
    Unavailable(String),
}

/// A local destination for audit events.
///
/// Implementations that block (file I/O, fsync) must move that work off the
/// async worker threads.
#[async_trait]
pub trait LocalSink: Send + Sync {
    /// Emit `event`, returning only once it has been handed off.
    async fn emit(&self, event: &AuditEvent) -> Result<(), LocalEmitError>;
}

/// Emits each event as a structured `tracing` record on the `audit` target.
///
/// Only identifiers, hashes and enumerations are attached; metadata is not.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl LocalSink for TracingSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), LocalEmitError> {
        info!(
            target: "audit",
            event_id = %event.event_id,
            timestamp = %event.timestamp.to_rfc3339(),
            event_type = event.event_type.as_str(),
            severity = event.severity.as_str(),
            user_id = event.actor.user_id.as_deref(),
            role = event.actor.role.as_deref(),
            resource_type = event.resource.resource_type.as_deref(),
            resource_id = event.resource.resource_id.as_deref(),
            patient_id_hash = event.resource.patient_id_hash.as_deref(),
            action = %event.action,
            result = event.result.as_str(),
            reason = event.reason.as_deref(),
            "audit_event"
        );
        Ok(())
    }
}

/// Appends each event as one JSON line and syncs the file before returning.
///
/// The write and sync run on Tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    file: Arc<Mutex<File>>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LocalEmitError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

fn append_line(file: &Mutex<File>, line: &[u8]) -> Result<(), LocalEmitError> {
    let mut file = file
        .lock()
        .map_err(|_| LocalEmitError::Unavailable("audit file lock poisoned".into()))?;
    file.write_all(line)?;
    file.sync_data()?;
    Ok(())
}

#[async_trait]
impl LocalSink for JsonLinesSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), LocalEmitError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || append_line(&file, &line))
            .await
            .map_err(|e| LocalEmitError::Unavailable(format!("audit file writer failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{Actor, AuditEventType};

    #[tokio::test]
    async fn json_lines_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();

        let first = AuditEvent::new(AuditEventType::LoginSuccess, "authenticate")
            .with_actor(Actor::user("u1"));
        let second = AuditEvent::new(AuditEventType::Logout, "logout");
        sink.emit(&first).await.unwrap();
        sink.emit(&second).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.event_id, first.event_id);
    }

    #[tokio::test]
    async fn json_lines_sink_reopens_in_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        JsonLinesSink::open(&path)
            .unwrap()
            .emit(&AuditEvent::new(AuditEventType::Logout, "logout"))
            .await
            .unwrap();
        JsonLinesSink::open(&path)
            .unwrap()
            .emit(&AuditEvent::new(AuditEventType::Logout, "logout"))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JsonLinesSink::open(dir.path().join("nope/audit.jsonl")).is_err());
    }

    #[tokio::test]
    async fn tracing_sink_never_fails() {
        let event = AuditEvent::new(AuditEventType::SystemAccess, "startup");
        assert!(TracingSink.emit(&event).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_emits_are_serialised_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                let event = AuditEvent::new(AuditEventType::PhiView, format!("view-{i}"));
                sink.emit(&event).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 32);
        for line in text.lines() {
            serde_json::from_str::<AuditEvent>(line).unwrap();
        }
    }
}
