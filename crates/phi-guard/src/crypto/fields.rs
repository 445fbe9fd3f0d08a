//! Field-level encryption of key-value records.
//!
//! Each listed field is sealed with its own name as associated data, so a
//! ciphertext copied from `diagnosis` into `chief_complaint` fails to decrypt.
//! Records are never modified in place; callers get a transformed copy.

use std::collections::HashSet;

use common::protocol::Record;
use serde_json::Value;
use tracing::debug;

use super::cipher::CipherError;
use super::engine::CipherEngine;

impl CipherEngine {
    /// Return a copy of `record` with every listed, non-empty field encrypted.
    ///
    /// String values are encrypted verbatim; other values are encrypted as
    /// their JSON text. Absent, null and empty fields are left untouched, as
    /// are fields not listed.
    ///
    /// # Errors
    ///
    /// Propagates the first [`CipherError`]; no partial record is returned.
    pub async fn encrypt_fields<S: AsRef<str>>(
        &self,
        record: &Record,
        fields: &[S],
    ) -> Result<Record, CipherError> {
        let mut out = record.clone();
        for field in unique(fields) {
            let Some(value) = out.get(field) else { continue };
            if is_empty(value) {
                continue;
            }
            let sealed = self.encrypt(&plaintext_of(value), Some(field)).await?;
            out.insert(field.to_owned(), Value::String(sealed));
            debug!(field, "field encrypted");
        }
        Ok(out)
    }

    /// Return a copy of `record` with every listed, non-empty field decrypted.
    ///
    /// # Errors
    ///
    /// - [`CipherError::MalformedEnvelope`] if a listed field holds a non-string.
    /// - [`CipherError::AuthenticationFailure`] if any field fails to verify.
    pub async fn decrypt_fields<S: AsRef<str>>(
        &self,
        record: &Record,
        fields: &[S],
    ) -> Result<Record, CipherError> {
        let mut out = record.clone();
        for field in unique(fields) {
            let Some(value) = out.get(field) else { continue };
            if is_empty(value) {
                continue;
            }
            let Value::String(envelope) = value else {
                return Err(CipherError::MalformedEnvelope);
            };
            let plaintext = self.decrypt(envelope, Some(field)).await?;
            out.insert(field.to_owned(), Value::String(plaintext));
            debug!(field, "field decrypted");
        }
        Ok(out)
    }
}

/// Field names in first-seen order with duplicates removed.
fn unique<S: AsRef<str>>(fields: &[S]) -> Vec<&str> {
    let mut seen = HashSet::new();
    fields
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| seen.insert(*f))
        .collect()
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn plaintext_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
