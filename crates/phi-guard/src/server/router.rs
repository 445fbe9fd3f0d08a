//! Axum router construction.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/v1/fields/encrypt", post(handlers::encrypt_fields))
        .route("/v1/fields/decrypt", post(handlers::decrypt_fields))
        .route("/v1/values/encrypt", post(handlers::encrypt_value))
        .route("/v1/values/decrypt", post(handlers::decrypt_value))
        .route("/v1/identifiers/hash", post(handlers::hash_identifier))
        .route("/v1/audit/events", post(handlers::record_audit_event))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(middleware::MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}
