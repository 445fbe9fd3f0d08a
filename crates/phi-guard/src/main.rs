//! `phi-guard` binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (JSON logs, optional OTLP).
//! 3. Initialise AWS SDK clients when a secret or S3 backend is configured.
//! 4. Build the audit ledger.
//! 5. Fetch the key ring and audit the key access.
//! 6. Load field profiles.
//! 7. Spawn the key reload task, if enabled.
//! 8. Build the Axum router and serve (TLS when a certificate is configured).
//!
//! `phi-guard generate-key` prints a fresh base64 key and exits.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use phi_guard::aws::AwsClients;
use phi_guard::config::Config;
use phi_guard::profiles::{self, ProfileCache};
use phi_guard::server::{self, state::AppState};
use phi_guard::{bootstrap, keys, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("generate-key") {
        println!("{}", phi_guard::generate_key());
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(
        cfg.otel_exporter_otlp_endpoint.as_deref(),
        &cfg.log_level,
        &cfg.service_name,
        &cfg.environment,
    )?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %cfg.environment,
        listen_port = cfg.listen_port,
        "phi-guard starting"
    );

    // -----------------------------------------------------------------------
    // 3. AWS clients
    // -----------------------------------------------------------------------
    let aws = if bootstrap::needs_aws(&cfg) {
        Some(AwsClients::init(cfg.aws_endpoint_url.as_deref()).await)
    } else {
        None
    };

    // -----------------------------------------------------------------------
    // 4. Audit ledger
    // -----------------------------------------------------------------------
    let ledger = Arc::new(bootstrap::audit_ledger(&cfg, aws.as_ref())?);

    // -----------------------------------------------------------------------
    // 5. Key ring
    // -----------------------------------------------------------------------
    let key_manager = bootstrap::key_manager(&cfg, aws.as_ref())?;
    let engine = Arc::new(bootstrap::cipher_engine(&cfg, key_manager));
    bootstrap::load_keys(&engine, &ledger).await?;

    // -----------------------------------------------------------------------
    // 6. Field profiles
    // -----------------------------------------------------------------------
    let profile_cache = ProfileCache::new();
    profiles::load(cfg.field_profiles_path.as_deref().map(Path::new), &profile_cache).await?;

    // -----------------------------------------------------------------------
    // 7. Background tasks
    // -----------------------------------------------------------------------
    let _key_reload = cfg
        .key_reload_interval()
        .map(|interval| keys::reload_task(engine.keys().clone(), ledger.clone(), interval));

    // -----------------------------------------------------------------------
    // 8. HTTP server
    // -----------------------------------------------------------------------
    let tls_paths = cfg.tls_paths();
    let state = AppState::new(engine, ledger, profile_cache, cfg.profile_header_name.clone());
    server::run(state, cfg.listen_port, tls_paths).await
}
