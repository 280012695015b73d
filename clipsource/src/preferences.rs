//! User preferences consumed by the selection pool and the session builder.
//!
//! Preferences are persisted elsewhere; the engine only reads a snapshot.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Collections the user enabled, in display order.
    pub enabled_collections: Vec<String>,
    /// Identifiers the user pinned explicitly.
    pub pinned_identifiers: Vec<String>,
    /// Always start clips at 0s instead of a random offset.
    #[serde(default)]
    pub start_at_beginning: bool,
}

impl Preferences {
    pub fn new<C, P>(collections: C, pinned: P) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            enabled_collections: collections.into_iter().map(Into::into).collect(),
            pinned_identifiers: pinned.into_iter().map(Into::into).collect(),
            start_at_beginning: false,
        }
    }

    /// Hash of everything that shapes the selection pool.
    pub fn selection_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for collection in &self.enabled_collections {
            hasher.update(b"c:");
            hasher.update(collection.as_bytes());
            hasher.update(b"\n");
        }
        for identifier in &self.pinned_identifiers {
            hasher.update(b"i:");
            hasher.update(identifier.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

pub trait PreferenceStore: Send + Sync {
    fn snapshot(&self) -> Preferences;

    fn preference_hash(&self) -> String {
        self.snapshot().selection_hash()
    }
}

/// In-process preference store.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    inner: RwLock<Preferences>,
}

impl MemoryPreferences {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            inner: RwLock::new(preferences),
        }
    }

    pub fn set(&self, preferences: Preferences) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = preferences;
    }

    pub fn update(&self, f: impl FnOnce(&mut Preferences)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl PreferenceStore for MemoryPreferences {
    fn snapshot(&self) -> Preferences {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
