//! The append-only audit ledger.
//!
//! [`AuditLedger::log_event`] emits to every local sink first and fails if
//! any of them fails. Only then is the durable write attempted; its failures
//! are logged at `error` and reported in the returned [`Delivery`], never
//! raised.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use super::delivery::{write_once, BackgroundWriter, Delivery, DurableWrite, RetryPolicy};
use super::event::{
    Actor, AuditEvent, AuditEventType, AuditSeverity, InvalidPatientHash, Outcome,
    DEFAULT_ENVIRONMENT, DEFAULT_SERVICE_NAME,
};
use super::sink::{LocalEmitError, LocalSink, TracingSink};
use super::store::{object_name, ObjectStore};

/// Errors raised to callers of the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    LocalEmit(#[from] LocalEmitError),

    #[error("unrecognized PHI action: {0}")]
    UnrecognizedAction(String),

    #[error(transparent)]
    InvalidPatientHash(#[from] InvalidPatientHash),
}

/// What to do with a PHI action that has no event-type mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownActionPolicy {
    /// Record as `phi_view` and log a warning.
    #[default]
    DefaultToView,
    /// Fail with [`LedgerError::UnrecognizedAction`].
    Reject,
}

/// Map a PHI action verb to its event type, case-insensitively.
pub fn phi_event_type(action: &str) -> Option<AuditEventType> {
    match action.trim().to_ascii_lowercase().as_str() {
        "view" | "read" => Some(AuditEventType::PhiView),
        "create" => Some(AuditEventType::PhiCreate),
        "update" | "modify" => Some(AuditEventType::PhiUpdate),
        "delete" => Some(AuditEventType::PhiDelete),
        "export" => Some(AuditEventType::PhiExport),
        _ => None,
    }
}

/// Arguments for [`AuditLedger::log_phi_access`].
#[derive(Debug, Clone)]
pub struct PhiAccess {
    user_id: String,
    action: String,
    resource_type: String,
    resource_id: String,
    patient: Option<Patient>,
    result: Outcome,
    reason: Option<String>,
    severity: Option<AuditSeverity>,
    ip_address: Option<String>,
    metadata: Map<String, Value>,
}

impl PhiAccess {
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            patient: None,
            result: Outcome::Success,
            reason: None,
            severity: None,
            ip_address: None,
            metadata: Map::new(),
        }
    }

    /// The raw identifier is hashed before the event is built.
    pub fn patient_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.patient = Some(Patient::Identifier(identifier.into()));
        self
    }

    /// A hash already computed with [`crate::crypto::hash_identifier`].
    /// Checked when the access is logged.
    pub fn patient_id_hash(mut self, hash: impl Into<String>) -> Self {
        self.patient = Some(Patient::Hash(hash.into()));
        self
    }

    pub fn result(mut self, result: Outcome) -> Self {
        self.result = result;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Override the inferred severity.
    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone)]
enum Patient {
    Identifier(String),
    Hash(String),
}

enum DurableMode {
    Inline {
        store: Arc<dyn ObjectStore>,
        timeout: Duration,
    },
    Background {
        writer: BackgroundWriter,
        kind: &'static str,
    },
}

impl DurableMode {
    fn kind(&self) -> &'static str {
        match self {
            Self::Inline { store, .. } => store.kind(),
            Self::Background { kind, .. } => *kind,
        }
    }
}

/// Records audit events to local sinks and an optional create-only store.
pub struct AuditLedger {
    local: Vec<Box<dyn LocalSink>>,
    durable: Option<DurableMode>,
    prefix: String,
    unknown_actions: UnknownActionPolicy,
    service_name: String,
    environment: String,
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("local_sinks", &self.local.len())
            .field("durable", &self.durable_kind())
            .field("prefix", &self.prefix)
            .field("unknown_actions", &self.unknown_actions)
            .finish()
    }
}

impl Default for AuditLedger {
    /// Tracing sink only, no durable backend.
    fn default() -> Self {
        AuditLedgerBuilder::default().build()
    }
}

impl AuditLedger {
    pub fn builder() -> AuditLedgerBuilder {
        AuditLedgerBuilder::default()
    }

    pub fn has_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// Backend label (`s3`, `filesystem`, `memory`), if one is configured.
    pub fn durable_kind(&self) -> Option<&'static str> {
        self.durable.as_ref().map(DurableMode::kind)
    }

    /// A new event stamped with this ledger's service name and environment.
    pub fn event(&self, event_type: AuditEventType, action: impl Into<String>) -> AuditEvent {
        AuditEvent::new(event_type, action).with_origin(&self.service_name, &self.environment)
    }

    /// Record `event`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LocalEmit`] if any local sink fails. Durable failures
    /// are not errors; they yield [`Delivery::Degraded`].
    pub async fn log_event(&self, event: AuditEvent) -> Result<Delivery, LedgerError> {
        for sink in &self.local {
            sink.emit(&event).await?;
        }

        let Some(durable) = &self.durable else {
            return Ok(Delivery::LocalOnly);
        };

        let job = match DurableWrite::for_event(&self.prefix, &event) {
            Ok(job) => job,
            Err(failure) => {
                let name = object_name(&self.prefix, &event);
                error!(event_id = %event.event_id, error = %failure, "durable audit write failed");
                return Ok(Delivery::Degraded {
                    object_name: name,
                    failure,
                });
            }
        };
        let name = job.object_name.clone();

        let outcome = match durable {
            DurableMode::Inline { store, timeout } => write_once(store.as_ref(), &job, *timeout)
                .await
                .map(|()| Delivery::Persisted {
                    object_name: name.clone(),
                }),
            DurableMode::Background { writer, .. } => {
                writer.try_enqueue(job).map(|()| Delivery::Queued {
                    object_name: name.clone(),
                })
            }
        };

        Ok(outcome.unwrap_or_else(|failure| {
            error!(
                event_id = %event.event_id,
                object_name = %name,
                backend = durable.kind(),
                error = %failure,
                "durable audit write failed"
            );
            Delivery::Degraded {
                object_name: name,
                failure,
            }
        }))
    }

    /// Resolve a PHI action verb under the configured [`UnknownActionPolicy`].
    pub fn resolve_phi_action(&self, action: &str) -> Result<AuditEventType, LedgerError> {
        match (phi_event_type(action), self.unknown_actions) {
            (Some(event_type), _) => Ok(event_type),
            (None, UnknownActionPolicy::DefaultToView) => {
                warn!(action, "unrecognized PHI action recorded as phi_view");
                Ok(AuditEventType::PhiView)
            }
            (None, UnknownActionPolicy::Reject) => {
                Err(LedgerError::UnrecognizedAction(action.to_owned()))
            }
        }
    }

    /// Record access to protected health information.
    pub async fn log_phi_access(&self, access: PhiAccess) -> Result<Delivery, LedgerError> {
        let event_type = self.resolve_phi_action(&access.action)?;
        let severity = access.severity.unwrap_or(match access.result {
            Outcome::Success => AuditSeverity::Info,
            _ => AuditSeverity::Warning,
        });

        let mut actor = Actor::user(access.user_id);
        actor.ip_address = access.ip_address;

        let mut event = self
            .event(event_type, access.action)
            .with_severity(severity)
            .with_actor(actor)
            .with_resource(access.resource_type, access.resource_id)
            .with_result(access.result)
            .with_metadata(access.metadata);
        match access.patient {
            Some(Patient::Identifier(identifier)) => {
                event = event.with_patient_identifier(&identifier);
            }
            Some(Patient::Hash(hash)) => event = event.with_patient_id_hash(hash)?,
            None => {}
        }
        if let Some(reason) = access.reason {
            event = event.with_reason(reason);
        }
        self.log_event(event).await
    }

    /// Record a login attempt.
    pub async fn log_authentication(
        &self,
        user_id: &str,
        success: bool,
        ip_address: Option<&str>,
        reason: Option<&str>,
    ) -> Result<Delivery, LedgerError> {
        let (event_type, severity, result) = if success {
            (AuditEventType::LoginSuccess, AuditSeverity::Info, Outcome::Success)
        } else {
            (AuditEventType::LoginFailure, AuditSeverity::Warning, Outcome::Failure)
        };
        let mut actor = Actor::user(user_id);
        actor.ip_address = ip_address.map(str::to_owned);

        let mut event = self
            .event(event_type, "authenticate")
            .with_severity(severity)
            .with_actor(actor)
            .with_result(result);
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        self.log_event(event).await
    }

    /// Record a security-relevant observation. The outcome is always `detected`.
    pub async fn log_security_event(
        &self,
        event_type: AuditEventType,
        severity: AuditSeverity,
        action: &str,
        user_id: Option<&str>,
        ip_address: Option<&str>,
        metadata: Map<String, Value>,
    ) -> Result<Delivery, LedgerError> {
        let actor = Actor {
            user_id: user_id.map(str::to_owned),
            ip_address: ip_address.map(str::to_owned),
            ..Actor::default()
        };
        let event = self
            .event(event_type, action)
            .with_severity(severity)
            .with_actor(actor)
            .with_result(Outcome::Detected)
            .with_metadata(metadata);
        self.log_event(event).await
    }
}

/// Builder for [`AuditLedger`].
pub struct AuditLedgerBuilder {
    local: Vec<Box<dyn LocalSink>>,
    durable: Option<DurableMode>,
    prefix: String,
    unknown_actions: UnknownActionPolicy,
    service_name: String,
    environment: String,
}

impl Default for AuditLedgerBuilder {
    fn default() -> Self {
        Self {
            local: Vec::new(),
            durable: None,
            prefix: String::new(),
            unknown_actions: UnknownActionPolicy::default(),
            service_name: DEFAULT_SERVICE_NAME.into(),
            environment: DEFAULT_ENVIRONMENT.into(),
        }
    }
}

impl AuditLedgerBuilder {
    /// Add a local sink. Without any, a [`TracingSink`] is used.
    pub fn local_sink(mut self, sink: impl LocalSink + 'static) -> Self {
        self.local.push(Box::new(sink));
        self
    }

    /// Write durably on the caller's task, bounded by `timeout`.
    pub fn durable_inline(mut self, store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        self.durable = Some(DurableMode::Inline { store, timeout });
        self
    }

    /// Write durably from a background worker. Must be called inside a Tokio
    /// runtime.
    pub fn durable_background(
        mut self,
        store: Arc<dyn ObjectStore>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> Self {
        let kind = store.kind();
        let (writer, _worker) = BackgroundWriter::spawn(store, capacity, policy);
        self.durable = Some(DurableMode::Background { writer, kind });
        self
    }

    /// Prepended verbatim to every object name, e.g. `"audit-logs/"`.
    pub fn object_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn unknown_actions(mut self, policy: UnknownActionPolicy) -> Self {
        self.unknown_actions = policy;
        self
    }

    pub fn origin(mut self, service_name: impl Into<String>, environment: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self.environment = environment.into();
        self
    }

    pub fn build(mut self) -> AuditLedger {
        if self.local.is_empty() {
            self.local.push(Box::new(TracingSink));
        }
        AuditLedger {
            local: self.local,
            durable: self.durable,
            prefix: self.prefix,
            unknown_actions: self.unknown_actions,
            service_name: self.service_name,
            environment: self.environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::delivery::DurableWriteFailure;
    use crate::audit::store::{MemoryObjectStore, MockObjectStore, StoreError};
    use crate::crypto::hash_identifier;
    use std::io;
    use std::sync::Mutex;

    /// Local sink that records events in memory, optionally failing.
    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<AuditEvent>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl LocalSink for RecordingSink {
        async fn emit(&self, event: &AuditEvent) -> Result<(), LocalEmitError> {
            if self.fail {
                return Err(LocalEmitError::Unavailable("log pipeline down".into()));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn inline_ledger(store: Arc<dyn ObjectStore>, sink: RecordingSink) -> AuditLedger {
        AuditLedger::builder()
            .local_sink(sink)
            .durable_inline(store, Duration::from_secs(1))
            .build()
    }

    #[tokio::test]
    async fn persists_under_date_partitioned_name() {
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = inline_ledger(store.clone(), RecordingSink::default());
        let event = ledger.event(AuditEventType::PhiView, "view");
        let expected = object_name("", &event);

        let delivery = ledger.log_event(event.clone()).await.unwrap();
        assert_eq!(
            delivery,
            Delivery::Persisted {
                object_name: expected.clone()
            }
        );

        let stored = store.get(&expected).await.unwrap();
        let body: AuditEvent = serde_json::from_slice(&stored.body).unwrap();
        assert_eq!(body, event);
        assert_eq!(stored.metadata["event_type"], "phi_view");
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected_without_raising() {
        let store = Arc::new(MemoryObjectStore::new());
        let sink = RecordingSink::default();
        let ledger = inline_ledger(store.clone(), sink.clone());
        let event = ledger.event(AuditEventType::PhiUpdate, "update");

        ledger.log_event(event.clone()).await.unwrap();
        let mut tampered = event.clone();
        tampered.action = "overwrite".into();
        let delivery = ledger.log_event(tampered).await.unwrap();

        assert!(matches!(
            delivery,
            Delivery::Degraded {
                failure: DurableWriteFailure::AlreadyExists(_),
                ..
            }
        ));
        let stored = store.get(&object_name("", &event)).await.unwrap();
        let body: AuditEvent = serde_json::from_slice(&stored.body).unwrap();
        assert_eq!(body.action, "update");
        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_backend_still_returns_normally() {
        let store = Arc::new(MemoryObjectStore::new());
        store.set_offline(true);
        let sink = RecordingSink::default();
        let ledger = inline_ledger(store, sink.clone());

        let delivery = ledger
            .log_authentication("u1", false, Some("10.0.0.1"), Some("bad password"))
            .await
            .unwrap();
        assert_eq!(delivery.as_str(), "degraded");
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_sink_failure_is_raised_before_durable_write() {
        let mut store = MockObjectStore::new();
        store.expect_put_new().never();
        store.expect_kind().return_const("mock");
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let ledger = inline_ledger(Arc::new(store), sink);

        let err = ledger
            .log_event(ledger.event(AuditEventType::Logout, "logout"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LocalEmit(_)));
    }

    #[tokio::test]
    async fn backend_error_is_degraded() {
        let mut store = MockObjectStore::new();
        store
            .expect_put_new()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Backend("access denied".into())));
        store.expect_kind().return_const("mock");
        let ledger = inline_ledger(Arc::new(store), RecordingSink::default());

        let delivery = ledger
            .log_event(ledger.event(AuditEventType::ConfigChange, "update_config"))
            .await
            .unwrap();
        assert!(matches!(
            delivery,
            Delivery::Degraded {
                failure: DurableWriteFailure::Backend(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn without_backend_delivery_is_local_only() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder().local_sink(sink.clone()).build();
        assert!(!ledger.has_durable());
        let delivery = ledger
            .log_event(ledger.event(AuditEventType::SystemAccess, "startup"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::LocalOnly);
    }

    #[tokio::test]
    async fn background_mode_queues_and_persists() {
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = AuditLedger::builder()
            .local_sink(RecordingSink::default())
            .durable_background(store.clone(), 16, RetryPolicy::default())
            .object_prefix("audit-logs/")
            .build();
        assert_eq!(ledger.durable_kind(), Some("memory"));

        let delivery = ledger
            .log_event(ledger.event(AuditEventType::PhiExport, "export"))
            .await
            .unwrap();
        let Delivery::Queued { object_name } = delivery else {
            panic!("expected queued delivery, got {delivery:?}");
        };
        assert!(object_name.starts_with("audit-logs/"));

        for _ in 0..100 {
            if store.get(&object_name).await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background writer never persisted {object_name}");
    }

    #[test]
    fn action_mapping_is_case_insensitive() {
        assert_eq!(phi_event_type("VIEW"), Some(AuditEventType::PhiView));
        assert_eq!(phi_event_type("read"), Some(AuditEventType::PhiView));
        assert_eq!(phi_event_type("Create"), Some(AuditEventType::PhiCreate));
        assert_eq!(phi_event_type("modify"), Some(AuditEventType::PhiUpdate));
        assert_eq!(phi_event_type("delete"), Some(AuditEventType::PhiDelete));
        assert_eq!(phi_event_type("export"), Some(AuditEventType::PhiExport));
        assert_eq!(phi_event_type("print"), None);
    }

    #[tokio::test]
    async fn unknown_action_defaults_to_view() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder().local_sink(sink.clone()).build();
        ledger
            .log_phi_access(PhiAccess::new("u1", "print", "encounter", "enc_1"))
            .await
            .unwrap();
        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].event_type, AuditEventType::PhiView);
        assert_eq!(events[0].action, "print");
    }

    #[tokio::test]
    async fn unknown_action_rejected_under_strict_policy() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder()
            .local_sink(sink.clone())
            .unknown_actions(UnknownActionPolicy::Reject)
            .build();
        let err = ledger
            .log_phi_access(PhiAccess::new("u1", "print", "encounter", "enc_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnrecognizedAction(a) if a == "print"));
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn severity_inference() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder().local_sink(sink.clone()).build();

        ledger
            .log_phi_access(PhiAccess::new("u1", "view", "encounter", "e1"))
            .await
            .unwrap();
        ledger
            .log_phi_access(PhiAccess::new("u1", "delete", "encounter", "e1").result(Outcome::Denied))
            .await
            .unwrap();
        ledger
            .log_phi_access(
                PhiAccess::new("u1", "export", "encounter", "e1").severity(AuditSeverity::Critical),
            )
            .await
            .unwrap();
        ledger.log_authentication("u1", true, None, None).await.unwrap();
        ledger
            .log_authentication("u1", false, None, Some("mfa failed"))
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        let severities: Vec<_> = events.iter().map(|e| e.severity).collect();
        assert_eq!(
            severities,
            vec![
                AuditSeverity::Info,
                AuditSeverity::Warning,
                AuditSeverity::Critical,
                AuditSeverity::Info,
                AuditSeverity::Warning,
            ]
        );
        assert_eq!(events[3].event_type, AuditEventType::LoginSuccess);
        assert_eq!(events[4].event_type, AuditEventType::LoginFailure);
        assert_eq!(events[4].action, "authenticate");
        assert_eq!(events[4].result, Outcome::Failure);
    }

    #[tokio::test]
    async fn security_events_are_detected_and_stamped() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder()
            .local_sink(sink.clone())
            .origin("scribe-api", "staging")
            .build();
        let mut metadata = Map::new();
        metadata.insert("path".into(), "/v1/fields/decrypt".into());
        ledger
            .log_security_event(
                AuditEventType::SecurityViolation,
                AuditSeverity::Error,
                "decrypt",
                Some("svc"),
                Some("10.1.2.3"),
                metadata,
            )
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].result, Outcome::Detected);
        assert_eq!(events[0].service_name, "scribe-api");
        assert_eq!(events[0].environment, "staging");
        assert_eq!(events[0].actor.ip_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(events[0].metadata["path"], "/v1/fields/decrypt");
    }

    #[tokio::test]
    async fn phi_access_accepts_precomputed_hash() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder().local_sink(sink.clone()).build();
        let hash = hash_identifier("PATIENT-12345");
        ledger
            .log_phi_access(
                PhiAccess::new("dr_smith", "export", "encounter", "enc_1")
                    .patient_id_hash(hash.clone()),
            )
            .await
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].event_type, AuditEventType::PhiExport);
        assert_eq!(events[0].resource.patient_id_hash, Some(hash));
    }

    #[tokio::test]
    async fn phi_access_rejects_raw_identifier_as_hash() {
        let sink = RecordingSink::default();
        let ledger = AuditLedger::builder().local_sink(sink.clone()).build();
        let err = ledger
            .log_phi_access(
                PhiAccess::new("dr_smith", "view", "encounter", "enc_1")
                    .patient_id_hash("PATIENT-12345"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidPatientHash(_)));
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn phi_view_log_carries_hash_not_patient_identifier() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let ledger = AuditLedger::default();
        ledger
            .log_phi_access(
                PhiAccess::new("dr_smith", "view", "encounter", "enc_abcdef123456")
                    .patient_identifier("PATIENT-12345"),
            )
            .await
            .unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("phi_view"));
        assert!(output.contains("dr_smith"));
        assert!(output.contains("success"));
        assert!(output.contains(&hash_identifier("PATIENT-12345")));
        assert!(!output.contains("PATIENT-12345"));
    }
}
