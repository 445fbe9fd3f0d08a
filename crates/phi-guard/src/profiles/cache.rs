//! In-memory cache of field profiles, keyed by profile name.
//!
//! Reads are lock-free via `arc-swap`; a reload swaps in a whole new map.

use std::{collections::BTreeMap, sync::Arc};

use arc_swap::ArcSwap;
use thiserror::Error;

/// Ordered list of sensitive field names for one record type.
pub type FieldList = Arc<[String]>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("unknown field profile: {0}")]
    UnknownProfile(String),
}

/// Shared cache of field profiles.
#[derive(Clone, Debug)]
pub struct ProfileCache {
    inner: Arc<ArcSwap<BTreeMap<String, FieldList>>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Profile names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.inner.load().keys().cloned().collect()
    }

    /// Look up a profile by name.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::UnknownProfile`] if `name` is not present.
    pub fn get(&self, name: &str) -> Result<FieldList, ProfileError> {
        self.inner
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| ProfileError::UnknownProfile(name.to_owned()))
    }

    /// Atomically replace every profile.
    pub fn replace_all(&self, profiles: BTreeMap<String, Vec<String>>) {
        let map = profiles
            .into_iter()
            .map(|(name, fields)| (name, FieldList::from(fields)))
            .collect();
        self.inner.store(Arc::new(map));
    }
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}
