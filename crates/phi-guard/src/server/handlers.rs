//! Axum request handlers for all service endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    AuditAccepted, AuditEventRequest, DecryptValueRequest, DecryptValueResponse,
    EncryptValueRequest, EncryptValueResponse, ErrorResponse, FieldsRequest, FieldsResponse,
    HashIdentifierRequest, HashIdentifierResponse, HealthResponse,
};
use common::ServiceError;
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::middleware::client_ip;
use super::state::AppState;
use crate::audit::{Actor, AuditEvent, AuditEventType, AuditSeverity, LedgerError, Outcome};
use crate::crypto::CipherError;

/// Error returned by handlers, rendered as `{code, message}`.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl From<CipherError> for ApiError {
    fn from(e: CipherError) -> Self {
        Self(match e {
            CipherError::AuthenticationFailure => ServiceError::AuthenticationFailed,
            CipherError::MalformedEnvelope | CipherError::PlaintextTooLarge { .. } => {
                ServiceError::BadRequest(e.to_string())
            }
            CipherError::KeyUnavailable(detail) => {
                error!(error = %detail, "encryption key unavailable");
                ServiceError::Unavailable("encryption key unavailable".into())
            }
            CipherError::InvalidKeyLength | CipherError::SealFailure => {
                error!(error = %e, "encryption failed");
                ServiceError::EncryptionFailure("encryption failed".into())
            }
        })
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::LocalEmit(inner) => {
                error!(error = %inner, "local audit sink failed");
                Self(ServiceError::Unavailable("audit log unavailable".into()))
            }
            LedgerError::UnrecognizedAction(action) => {
                Self(ServiceError::BadRequest(format!("unrecognized PHI action: {action}")))
            }
            LedgerError::InvalidPatientHash(e) => Self(ServiceError::BadRequest(e.to_string())),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `POST /v1/fields/encrypt`
///
/// The field list comes from the body or, when absent, from the profile named
/// in the profile header.
pub async fn encrypt_fields(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FieldsRequest>,
) -> ApiResult<Json<FieldsResponse>> {
    let fields = resolve_fields(&state, &headers, req.fields)?;
    let record = state.engine.encrypt_fields(&req.record, &fields).await?;
    Ok(Json(FieldsResponse { record }))
}

/// `POST /v1/fields/decrypt`
///
/// A record that fails authentication is reported as a security violation.
pub async fn decrypt_fields(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FieldsRequest>,
) -> ApiResult<Json<FieldsResponse>> {
    let fields = resolve_fields(&state, &headers, req.fields)?;
    match state.engine.decrypt_fields(&req.record, &fields).await {
        Ok(record) => Ok(Json(FieldsResponse { record })),
        Err(CipherError::AuthenticationFailure) => {
            report_tampering(&state, &headers, "/v1/fields/decrypt").await;
            Err(CipherError::AuthenticationFailure.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// `POST /v1/values/encrypt`
pub async fn encrypt_value(
    State(state): State<AppState>,
    Json(req): Json<EncryptValueRequest>,
) -> ApiResult<Json<EncryptValueResponse>> {
    let envelope = state
        .engine
        .encrypt(&req.plaintext, req.associated_data.as_deref())
        .await?;
    Ok(Json(EncryptValueResponse { envelope }))
}

/// `POST /v1/values/decrypt`
pub async fn decrypt_value(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DecryptValueRequest>,
) -> ApiResult<Json<DecryptValueResponse>> {
    match state
        .engine
        .decrypt(&req.envelope, req.associated_data.as_deref())
        .await
    {
        Ok(plaintext) => Ok(Json(DecryptValueResponse { plaintext })),
        Err(CipherError::AuthenticationFailure) => {
            report_tampering(&state, &headers, "/v1/values/decrypt").await;
            Err(CipherError::AuthenticationFailure.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// `POST /v1/identifiers/hash`
pub async fn hash_identifier(
    State(state): State<AppState>,
    Json(req): Json<HashIdentifierRequest>,
) -> Json<HashIdentifierResponse> {
    Json(HashIdentifierResponse {
        hash: state.engine.hash_identifier(&req.identifier),
    })
}

/// `POST /v1/audit/events`: record an event on behalf of a caller.
///
/// Returns `202 Accepted` once every local sink has the event, whatever
/// happened to the durable write.
pub async fn record_audit_event(
    State(state): State<AppState>,
    Json(req): Json<AuditEventRequest>,
) -> ApiResult<Response> {
    let event = event_from_request(&state, req)?;
    let event_id = event.event_id.to_string();
    let delivery = state.ledger.log_event(event).await?;
    let body = AuditAccepted {
        event_id,
        delivery: delivery.as_str().into(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` once the key ring is loaded, `503` before.
pub async fn health(State(state): State<AppState>) -> Response {
    let key_ready = state.engine.keys().is_ready();

    let (status_code, status_str) = if key_ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        key_ready,
        durable_audit: state.ledger.has_durable(),
        profiles_loaded: state.profiles.len(),
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn resolve_fields(
    state: &AppState,
    headers: &HeaderMap,
    explicit: Option<Vec<String>>,
) -> Result<Vec<String>, ApiError> {
    if let Some(fields) = explicit {
        return Ok(fields);
    }
    let header = state.profile_header_name.as_str();
    let name = match headers.get(header) {
        Some(v) => v.to_str().map_err(|_| {
            ServiceError::BadRequest(format!("{header} header contains non-ASCII characters"))
        })?,
        None => {
            return Err(ServiceError::BadRequest(format!(
                "request must list fields or name a profile in the {header} header"
            ))
            .into())
        }
    };
    let profile = state
        .profiles
        .get(name)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    Ok(profile.to_vec())
}

async fn report_tampering(state: &AppState, headers: &HeaderMap, endpoint: &str) {
    let mut metadata = Map::new();
    metadata.insert("endpoint".into(), Value::String(endpoint.into()));
    metadata.insert("error".into(), Value::String("authentication_failure".into()));
    let ip = client_ip(headers);
    if let Err(e) = state
        .ledger
        .log_security_event(
            AuditEventType::SecurityViolation,
            AuditSeverity::Error,
            "decrypt",
            None,
            ip.as_deref(),
            metadata,
        )
        .await
    {
        warn!(error = %e, "failed to audit decryption failure");
    }
}

fn event_from_request(state: &AppState, req: AuditEventRequest) -> Result<AuditEvent, ApiError> {
    let bad_request = |e: crate::audit::event::ParseAuditValueError| {
        ApiError(ServiceError::BadRequest(e.to_string()))
    };
    let event_type: AuditEventType = req.event_type.parse().map_err(bad_request)?;
    if req.action.trim().is_empty() {
        return Err(ServiceError::BadRequest("action must not be empty".into()).into());
    }

    let mut event = state.ledger.event(event_type, req.action).with_actor(Actor {
        user_id: req.user_id,
        username: req.username,
        role: req.role,
        session_id: req.session_id,
        ip_address: req.ip_address,
        user_agent: req.user_agent,
    });

    let result = match req.result.as_deref() {
        Some(r) => r.parse().map_err(bad_request)?,
        None => Outcome::Success,
    };
    let severity = match req.severity.as_deref() {
        Some(s) => s.parse().map_err(bad_request)?,
        None if result != Outcome::Success => AuditSeverity::Warning,
        None => AuditSeverity::Info,
    };
    event = event
        .with_result(result)
        .with_severity(severity)
        .with_metadata(req.metadata);

    event.resource.resource_type = req.resource_type;
    event.resource.resource_id = req.resource_id;
    if let Some(identifier) = req.patient_identifier.as_deref() {
        event = event.with_patient_identifier(identifier);
    } else if let Some(hash) = req.patient_id_hash {
        event = event
            .with_patient_id_hash(hash)
            .map_err(|e| ApiError(ServiceError::BadRequest(e.to_string())))?;
    }
    if let Some(reason) = req.reason {
        event = event.with_reason(reason);
    }
    Ok(event)
}
