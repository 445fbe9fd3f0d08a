//! `phi-guard`: field-level encryption and an append-only audit ledger for
//! protected health information.
//!
//! - [`crypto::CipherEngine`] seals individual values with AES-256-GCM, using
//!   the field name as associated data so ciphertexts cannot be moved between
//!   fields.
//! - [`audit::AuditLedger`] records every PHI access, authentication and
//!   security event to local sinks and, once, to a date-partitioned object
//!   store.
//!
//! The binary wraps both behind a small HTTP API ([`server`]).

pub mod audit;
pub mod aws;
pub mod bootstrap;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod profiles;
pub mod server;
pub mod telemetry;

pub use audit::{AuditLedger, PhiAccess};
pub use crypto::{generate_key, hash_identifier, CipherEngine, CipherError};
pub use keys::KeyManager;
