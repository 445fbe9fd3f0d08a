//! Field profiles: named sets of sensitive field names.
//!
//! A profile lets callers say "encrypt a `soap_note`" instead of listing the
//! fields on every request. Built-in profiles are always present; a YAML file
//! may add profiles or replace built-in ones:
//!
//! ```yaml
//! encounter:
//!   - transcription
//!   - chief_complaint
//! lab_result:
//!   - result_text
//! ```

pub mod cache;

pub use cache::{FieldList, ProfileCache, ProfileError};

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Sensitive fields of a clinical encounter.
pub const ENCOUNTER_FIELDS: [&str; 4] = [
    "transcription",
    "chief_complaint",
    "primary_diagnosis",
    "audio_file_path",
];

/// Sensitive fields of a generated SOAP note.
pub const SOAP_NOTE_FIELDS: [&str; 6] = [
    "subjective",
    "objective",
    "assessment",
    "plan",
    "icd10_codes",
    "cpt_codes",
];

pub fn builtin_profiles() -> BTreeMap<String, Vec<String>> {
    let owned = |fields: &[&str]| -> Vec<String> { fields.iter().map(|f| (*f).to_owned()).collect() };
    BTreeMap::from([
        ("encounter".to_owned(), owned(&ENCOUNTER_FIELDS)),
        ("soap_note".to_owned(), owned(&SOAP_NOTE_FIELDS)),
    ])
}

/// Parse a YAML profile document.
///
/// # Errors
///
/// Returns an error if the text is not a mapping of names to string lists, or
/// if any profile is empty.
pub fn parse_profiles(text: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let parsed: BTreeMap<String, Vec<String>> =
        serde_yaml::from_str(text).context("field profiles must map names to field lists")?;
    if let Some((name, _)) = parsed.iter().find(|(_, fields)| fields.is_empty()) {
        anyhow::bail!("field profile {name} has no fields");
    }
    Ok(parsed)
}

/// Load the built-in profiles plus those in `path`, if any, into `cache`.
///
/// # Errors
///
/// Returns an error if `path` is set and cannot be read or parsed; the cache
/// is left unchanged in that case.
pub async fn load(path: Option<&Path>, cache: &ProfileCache) -> Result<()> {
    let mut profiles = builtin_profiles();
    if let Some(path) = path {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read field profiles from {}", path.display()))?;
        let from_file = parse_profiles(&text)
            .with_context(|| format!("invalid field profiles in {}", path.display()))?;
        info!(path = %path.display(), count = from_file.len(), "loaded field profiles");
        profiles.extend(from_file);
    }
    cache.replace_all(profiles);
    info!(count = cache.len(), "field profile cache refreshed");
    Ok(())
}
