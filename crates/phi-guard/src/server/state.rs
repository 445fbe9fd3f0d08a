//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::audit::AuditLedger;
use crate::crypto::CipherEngine;
use crate::keys::KeyManager;
use crate::profiles::ProfileCache;

/// Application state shared across all request handlers.
///
/// Every field is `Arc`-backed so Axum can clone the state per request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CipherEngine>,
    pub ledger: Arc<AuditLedger>,
    /// Lock-free cache of named field profiles.
    pub profiles: ProfileCache,
    /// Header naming the field profile for the field-level endpoints.
    pub profile_header_name: Arc<String>,
}

impl AppState {
    pub fn new(
        engine: Arc<CipherEngine>,
        ledger: Arc<AuditLedger>,
        profiles: ProfileCache,
        profile_header_name: String,
    ) -> Self {
        Self {
            engine,
            ledger,
            profiles,
            profile_header_name: Arc::new(profile_header_name),
        }
    }
}

impl Default for AppState {
    /// Ephemeral key (not yet fetched), tracing-only ledger and no profiles.
    /// Suitable for tests.
    fn default() -> Self {
        Self::new(
            Arc::new(CipherEngine::new(Arc::new(KeyManager::ephemeral()))),
            Arc::new(AuditLedger::default()),
            ProfileCache::new(),
            "X-Field-Profile".into(),
        )
    }
}
