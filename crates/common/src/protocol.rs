//! Request and response types exchanged between components.
//!
//! These types are serialised as JSON over the sidecar HTTP API. Collaborators
//! in other processes depend on this crate instead of re-declaring the shapes.

use serde::{Deserialize, Serialize};

/// A flat key-value record, e.g. one encounter row about to be persisted.
pub type Record = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Field-level endpoints
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/fields/encrypt` and `POST /v1/fields/decrypt`.
///
/// When `fields` is omitted the field list is taken from the profile named in
/// the profile header (`X-Field-Profile` by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsRequest {
    /// Record whose listed fields are transformed.
    pub record: Record,
    /// Explicit list of sensitive field names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// Successful response body for the field-level endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsResponse {
    /// The transformed copy of the input record.
    pub record: Record,
}

// ---------------------------------------------------------------------------
// Single-value endpoints
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/values/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptValueRequest {
    pub plaintext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_data: Option<String>,
}

/// Response body for `POST /v1/values/encrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptValueResponse {
    /// `base64(nonce ‖ ciphertext ‖ tag)`.
    pub envelope: String,
}

/// Request body for `POST /v1/values/decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptValueRequest {
    pub envelope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_data: Option<String>,
}

/// Response body for `POST /v1/values/decrypt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptValueResponse {
    pub plaintext: String,
}

// ---------------------------------------------------------------------------
// Identifier hashing
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/identifiers/hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashIdentifierRequest {
    pub identifier: String,
}

/// Response body for `POST /v1/identifiers/hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashIdentifierResponse {
    /// 64 lowercase hex characters (SHA-256).
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Audit endpoint
// ---------------------------------------------------------------------------

/// Request body for `POST /v1/audit/events`.
///
/// Enumerated values travel as their snake_case wire names, e.g.
/// `event_type = "phi_view"`, `severity = "warning"`, `result = "denied"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEventRequest {
    pub event_type: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Raw patient identifier. Hashed on receipt and never stored or logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_identifier: Option<String>,
    /// Pre-computed SHA-256 of the patient identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id_hash: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Response body for `POST /v1/audit/events` (status 202).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditAccepted {
    pub event_id: String,
    /// One of `local_only`, `persisted`, `queued`, `degraded`.
    pub delivery: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::ServiceError> for ErrorResponse {
    fn from(err: &crate::ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether the encryption key is currently loaded.
    pub key_ready: bool,
    /// Whether a durable audit backend is configured.
    pub durable_audit: bool,
    /// Number of field profiles currently cached.
    pub profiles_loaded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fields_request_without_field_list() {
        let req: FieldsRequest =
            serde_json::from_value(json!({"record": {"name": "Alice", "age": 45}})).unwrap();
        assert!(req.fields.is_none());
        assert_eq!(req.record["age"], 45);
    }

    #[test]
    fn audit_request_defaults() {
        let req: AuditEventRequest =
            serde_json::from_value(json!({"event_type": "phi_view", "action": "view"})).unwrap();
        assert_eq!(req.event_type, "phi_view");
        assert!(req.metadata.is_empty());
        assert!(req.patient_identifier.is_none());
    }

    #[test]
    fn error_response_from_service_error() {
        let e = ErrorResponse::from(&crate::ServiceError::AuthenticationFailed);
        assert_eq!(e.code, "authentication_failed");
        assert_eq!(e.message, "authentication failed");
    }

    #[test]
    fn value_request_omits_missing_context() {
        let req = EncryptValueRequest {
            plaintext: "x".into(),
            associated_data: None,
        };
        let text = serde_json::to_string(&req).unwrap();
        assert!(!text.contains("associated_data"));
    }
}
