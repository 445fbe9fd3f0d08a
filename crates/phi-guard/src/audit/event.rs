//! Audit event model.
//!
//! An [`AuditEvent`] is built once and never mutated after it reaches the
//! ledger. Patient identity is carried only as a SHA-256 hash.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{hash_identifier, is_identifier_hash};

/// Default `service_name` stamped on events.
pub const DEFAULT_SERVICE_NAME: &str = "phi-guard";

/// Default `environment` stamped on events.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Kinds of auditable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Authentication
    LoginSuccess,
    LoginFailure,
    Logout,
    MfaChallenge,

    // PHI access
    PhiView,
    PhiCreate,
    PhiUpdate,
    PhiDelete,
    PhiExport,

    // System
    SystemAccess,
    ConfigChange,
    PermissionChange,

    // Security
    SecurityViolation,
    UnauthorizedAccess,
    EncryptionKeyAccess,

    // Clinical workflow
    TranscriptionStart,
    TranscriptionComplete,
    SoapNoteGenerated,
    Icd10Lookup,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 19] = [
        Self::LoginSuccess,
        Self::LoginFailure,
        Self::Logout,
        Self::MfaChallenge,
        Self::PhiView,
        Self::PhiCreate,
        Self::PhiUpdate,
        Self::PhiDelete,
        Self::PhiExport,
        Self::SystemAccess,
        Self::ConfigChange,
        Self::PermissionChange,
        Self::SecurityViolation,
        Self::UnauthorizedAccess,
        Self::EncryptionKeyAccess,
        Self::TranscriptionStart,
        Self::TranscriptionComplete,
        Self::SoapNoteGenerated,
        Self::Icd10Lookup,
    ];

    /// The snake_case wire name, e.g. `"phi_view"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::LoginFailure => "login_failure",
            Self::Logout => "logout",
            Self::MfaChallenge => "mfa_challenge",
            Self::PhiView => "phi_view",
            Self::PhiCreate => "phi_create",
            Self::PhiUpdate => "phi_update",
            Self::PhiDelete => "phi_delete",
            Self::PhiExport => "phi_export",
            Self::SystemAccess => "system_access",
            Self::ConfigChange => "config_change",
            Self::PermissionChange => "permission_change",
            Self::SecurityViolation => "security_violation",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::EncryptionKeyAccess => "encryption_key_access",
            Self::TranscriptionStart => "transcription_start",
            Self::TranscriptionComplete => "transcription_complete",
            Self::SoapNoteGenerated => "soap_note_generated",
            Self::Icd10Lookup => "icd10_lookup",
        }
    }

    pub fn is_phi_access(self) -> bool {
        matches!(
            self,
            Self::PhiView | Self::PhiCreate | Self::PhiUpdate | Self::PhiDelete | Self::PhiExport
        )
    }
}

/// Severity levels for audit events, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    pub const ALL: [AuditSeverity; 4] = [Self::Info, Self::Warning, Self::Error, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// What happened to the audited action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Success,
    Failure,
    Denied,
    /// A security condition was observed (used by security events).
    Detected,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [Self::Success, Self::Failure, Self::Denied, Self::Detected];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
            Self::Detected => "detected",
        }
    }
}

/// A supplied patient hash is not a SHA-256 hex digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("patient_id_hash must be 64 lowercase hex characters")]
pub struct InvalidPatientHash;

/// Error returned when parsing an enumerated audit value from its wire name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseAuditValueError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum_traits {
    ($ty:ty, $kind:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseAuditValueError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                <$ty>::ALL
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| ParseAuditValueError {
                        kind: $kind,
                        value: s.to_owned(),
                    })
            }
        }
    };
}

wire_enum_traits!(AuditEventType, "event type");
wire_enum_traits!(AuditSeverity, "severity");
wire_enum_traits!(Outcome, "outcome");

/// Who performed the action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }
}

/// What the action was performed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// e.g. `"encounter"`, `"soap_note"`, `"audio"`.
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// SHA-256 of the patient identifier, for correlation only.
    pub patient_id_hash: Option<String>,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    #[serde(flatten)]
    pub actor: Actor,
    #[serde(flatten)]
    pub resource: Resource,
    pub action: String,
    pub result: Outcome,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub service_name: String,
    pub environment: String,
}

impl AuditEvent {
    /// Start a new event with a fresh id and timestamp.
    pub fn new(event_type: AuditEventType, action: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: next_timestamp(),
            event_type,
            severity: AuditSeverity::Info,
            actor: Actor::default(),
            resource: Resource::default(),
            action: action.into(),
            result: Outcome::Success,
            reason: None,
            metadata: serde_json::Map::new(),
            service_name: DEFAULT_SERVICE_NAME.into(),
            environment: DEFAULT_ENVIRONMENT.into(),
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource.resource_type = Some(resource_type.into());
        self.resource.resource_id = Some(resource_id.into());
        self
    }

    /// Attach a patient by hashing `identifier`. The raw value is dropped.
    pub fn with_patient_identifier(mut self, identifier: &str) -> Self {
        self.resource.patient_id_hash = Some(hash_identifier(identifier));
        self
    }

    /// Attach a patient by a hash computed elsewhere.
    ///
    /// # Errors
    ///
    /// [`InvalidPatientHash`] unless `hash` is 64 lowercase hex characters,
    /// which keeps raw identifiers from being smuggled in through this field.
    pub fn with_patient_id_hash(
        mut self,
        hash: impl Into<String>,
    ) -> Result<Self, InvalidPatientHash> {
        let hash = hash.into();
        if !is_identifier_hash(&hash) {
            return Err(InvalidPatientHash);
        }
        self.resource.patient_id_hash = Some(hash);
        Ok(self)
    }

    pub fn with_result(mut self, result: Outcome) -> Self {
        self.result = result;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_origin(mut self, service_name: &str, environment: &str) -> Self {
        self.service_name = service_name.to_owned();
        self.environment = environment.to_owned();
        self
    }
}

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current UTC time, strictly increasing across calls within this process.
///
/// Two events created in the same microsecond are spread one microsecond apart.
pub fn next_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    let now_micros = now.timestamp_micros();
    let mut last = LAST_TIMESTAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now_micros.max(last.saturating_add(1));
        match LAST_TIMESTAMP_MICROS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or(now),
            Err(actual) => last = actual,
        }
    }
}
