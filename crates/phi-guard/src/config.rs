//! Configuration loading and validation.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any variable is missing or invalid.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audit::delivery::RetryPolicy;
use crate::audit::UnknownActionPolicy;

/// Environment name under which a missing key secret falls back to an
/// ephemeral in-process key.
pub const DEVELOPMENT_ENVIRONMENT: &str = "development";

/// Where durable audit records are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    /// Local sinks only.
    #[default]
    None,
    S3,
    Filesystem,
    Memory,
}

/// How durable audit writes are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDelivery {
    #[default]
    Inline,
    Background,
}

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Secrets Manager id of the base64 data key. Required outside development.
    #[serde(default)]
    pub key_secret_id: Option<String>,

    /// Secret id of the key being rotated out; still accepted for decryption.
    #[serde(default)]
    pub previous_key_secret_id: Option<String>,

    /// Seconds between key ring reloads. `0` disables reloading.
    #[serde(default)]
    pub key_reload_interval_secs: u64,

    #[serde(default = "default_max_plaintext_bytes")]
    pub max_plaintext_bytes: usize,

    #[serde(default)]
    pub audit_backend: AuditBackend,

    /// Bucket for the `s3` audit backend.
    #[serde(default)]
    pub audit_s3_bucket: Option<String>,

    /// Prepended to every audit object name, e.g. `audit-logs/`.
    #[serde(default)]
    pub audit_prefix: String,

    /// Root directory for the `filesystem` audit backend.
    #[serde(default)]
    pub audit_fs_root: Option<String>,

    #[serde(default)]
    pub audit_sse_kms_key_id: Option<String>,

    /// Object-lock retention applied to S3 audit objects.
    #[serde(default)]
    pub audit_retention_days: Option<u32>,

    #[serde(default)]
    pub audit_delivery: AuditDelivery,

    #[serde(default = "default_audit_write_timeout_ms")]
    pub audit_write_timeout_ms: u64,

    #[serde(default = "default_audit_queue_capacity")]
    pub audit_queue_capacity: usize,

    #[serde(default = "default_audit_max_attempts")]
    pub audit_max_attempts: u32,

    #[serde(default = "default_audit_retry_base_ms")]
    pub audit_retry_base_ms: u64,

    /// Optional JSON-lines file every audit event is appended to.
    #[serde(default)]
    pub audit_local_file: Option<String>,

    #[serde(default)]
    pub unknown_action_policy: UnknownActionPolicy,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_environment")]
    pub environment: String,

    /// YAML file of additional field profiles.
    #[serde(default)]
    pub field_profiles_path: Option<String>,

    /// HTTP header naming the field profile to apply.
    #[serde(default = "default_profile_header")]
    pub profile_header_name: String,

    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// PEM certificate chain. TLS is enabled when both paths are set.
    #[serde(default)]
    pub tls_cert_path: Option<String>,

    #[serde(default)]
    pub tls_key_path: Option<String>,

    /// OTLP/gRPC collector endpoint. Spans are exported only when set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Endpoint override for every AWS client (LocalStack and similar).
    #[serde(default)]
    pub aws_endpoint_url: Option<String>,
}

fn default_max_plaintext_bytes() -> usize {
    crate::crypto::DEFAULT_MAX_PLAINTEXT_BYTES
}
fn default_audit_write_timeout_ms() -> u64 {
    5_000
}
fn default_audit_queue_capacity() -> usize {
    1024
}
fn default_audit_max_attempts() -> u32 {
    5
}
fn default_audit_retry_base_ms() -> u64 {
    200
}
fn default_service_name() -> String {
    crate::audit::event::DEFAULT_SERVICE_NAME.into()
}
fn default_environment() -> String {
    crate::audit::event::DEFAULT_ENVIRONMENT.into()
}
fn default_profile_header() -> String {
    "X-Field-Profile".into()
}
fn default_listen_port() -> u16 {
    8443
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(env)
            .build()
            .context("failed to build configuration from environment")?;

        let mut c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.normalise();
        c.validate()?;
        Ok(c)
    }

    /// Treat empty optional values as unset.
    fn normalise(&mut self) {
        for value in [
            &mut self.key_secret_id,
            &mut self.previous_key_secret_id,
            &mut self.audit_s3_bucket,
            &mut self.audit_fs_root,
            &mut self.audit_sse_kms_key_id,
            &mut self.audit_local_file,
            &mut self.field_profiles_path,
            &mut self.tls_cert_path,
            &mut self.tls_key_path,
            &mut self.otel_exporter_otlp_endpoint,
            &mut self.aws_endpoint_url,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            }
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.key_secret_id.is_none() && !self.is_development() {
            anyhow::bail!(
                "KEY_SECRET_ID is required unless ENVIRONMENT={DEVELOPMENT_ENVIRONMENT}"
            );
        }
        if self.max_plaintext_bytes == 0 {
            anyhow::bail!("MAX_PLAINTEXT_BYTES must be > 0");
        }
        match self.audit_backend {
            AuditBackend::S3 if self.audit_s3_bucket.is_none() => {
                anyhow::bail!("AUDIT_S3_BUCKET is required when AUDIT_BACKEND=s3")
            }
            AuditBackend::Filesystem if self.audit_fs_root.is_none() => {
                anyhow::bail!("AUDIT_FS_ROOT is required when AUDIT_BACKEND=filesystem")
            }
            _ => {}
        }
        if self.audit_write_timeout_ms == 0 {
            anyhow::bail!("AUDIT_WRITE_TIMEOUT_MS must be > 0");
        }
        if self.audit_queue_capacity == 0 {
            anyhow::bail!("AUDIT_QUEUE_CAPACITY must be > 0");
        }
        if self.audit_max_attempts == 0 {
            anyhow::bail!("AUDIT_MAX_ATTEMPTS must be >= 1");
        }
        ensure_non_empty(&self.service_name, "SERVICE_NAME")?;
        ensure_non_empty(&self.environment, "ENVIRONMENT")?;
        ensure_non_empty(&self.profile_header_name, "PROFILE_HEADER_NAME")?;
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together");
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case(DEVELOPMENT_ENVIRONMENT)
    }

    /// Certificate and key paths, when TLS is configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.into(), key.into())),
            _ => None,
        }
    }

    pub fn key_reload_interval(&self) -> Option<Duration> {
        (self.key_reload_interval_secs > 0)
            .then(|| Duration::from_secs(self.key_reload_interval_secs))
    }

    pub fn audit_write_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_write_timeout_ms)
    }

    pub fn audit_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.audit_max_attempts,
            base_delay: Duration::from_millis(self.audit_retry_base_ms),
            write_timeout: self.audit_write_timeout(),
        }
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_environment(config::Environment::default().source(Some(source)))
    }

    #[test]
    fn defaults_are_correct() {
        let cfg = load(&[("KEY_SECRET_ID", "phi/data-key")]).unwrap();
        assert_eq!(cfg.key_secret_id.as_deref(), Some("phi/data-key"));
        assert_eq!(cfg.max_plaintext_bytes, 65_536);
        assert_eq!(cfg.audit_backend, AuditBackend::None);
        assert_eq!(cfg.audit_delivery, AuditDelivery::Inline);
        assert_eq!(cfg.audit_write_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.audit_queue_capacity, 1024);
        assert_eq!(cfg.audit_retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.unknown_action_policy, UnknownActionPolicy::DefaultToView);
        assert_eq!(cfg.service_name, "phi-guard");
        assert_eq!(cfg.environment, "production");
        assert_eq!(cfg.profile_header_name, "X-Field-Profile");
        assert_eq!(cfg.listen_port, 8443);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.key_reload_interval().is_none());
        assert!(cfg.tls_paths().is_none());
    }

    #[test]
    fn parses_enums_and_numbers() {
        let cfg = load(&[
            ("KEY_SECRET_ID", "k"),
            ("AUDIT_BACKEND", "s3"),
            ("AUDIT_S3_BUCKET", "audit-bucket"),
            ("AUDIT_DELIVERY", "background"),
            ("AUDIT_RETENTION_DAYS", "2555"),
            ("UNKNOWN_ACTION_POLICY", "reject"),
            ("KEY_RELOAD_INTERVAL_SECS", "3600"),
        ])
        .unwrap();
        assert_eq!(cfg.audit_backend, AuditBackend::S3);
        assert_eq!(cfg.audit_delivery, AuditDelivery::Background);
        assert_eq!(cfg.audit_retention_days, Some(2555));
        assert_eq!(cfg.unknown_action_policy, UnknownActionPolicy::Reject);
        assert_eq!(cfg.key_reload_interval(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn key_secret_required_outside_development() {
        assert!(load(&[]).is_err());
        assert!(load(&[("KEY_SECRET_ID", "  ")]).is_err());
        let dev = load(&[("ENVIRONMENT", "development")]).unwrap();
        assert!(dev.key_secret_id.is_none());
        assert!(dev.is_development());
    }

    #[test]
    fn backend_requires_its_location() {
        assert!(load(&[("KEY_SECRET_ID", "k"), ("AUDIT_BACKEND", "s3")]).is_err());
        assert!(load(&[("KEY_SECRET_ID", "k"), ("AUDIT_BACKEND", "filesystem")]).is_err());
        assert!(load(&[
            ("KEY_SECRET_ID", "k"),
            ("AUDIT_BACKEND", "filesystem"),
            ("AUDIT_FS_ROOT", "/var/lib/phi-guard/audit"),
        ])
        .is_ok());
    }

    #[test]
    fn tls_paths_must_be_paired() {
        assert!(load(&[("KEY_SECRET_ID", "k"), ("TLS_CERT_PATH", "/tls/cert.pem")]).is_err());
        let cfg = load(&[
            ("KEY_SECRET_ID", "k"),
            ("TLS_CERT_PATH", "/tls/cert.pem"),
            ("TLS_KEY_PATH", "/tls/key.pem"),
        ])
        .unwrap();
        let (cert, key) = cfg.tls_paths().unwrap();
        assert_eq!(cert, PathBuf::from("/tls/cert.pem"));
        assert_eq!(key, PathBuf::from("/tls/key.pem"));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(load(&[("KEY_SECRET_ID", "k"), ("AUDIT_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("KEY_SECRET_ID", "k"), ("AUDIT_QUEUE_CAPACITY", "0")]).is_err());
        assert!(load(&[("KEY_SECRET_ID", "k"), ("MAX_PLAINTEXT_BYTES", "0")]).is_err());
    }
}
