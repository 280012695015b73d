//! Round-robin selection pool.
//!
//! The pool draws from the user's enabled collections and pinned identifiers
//! without repetition: every key is returned once before any key comes back.
//! A key is either `collection:<name>` (resolved to a random identifier of
//! the collection through the archive) or `identifier:<id>`.
//!
//! State is persisted through a [`PoolStore`] and reused after a restart as
//! long as the preferences did not change.

use crate::persistence::PoolStore;
use async_trait::async_trait;
use clipsource::{
    ArchiveClient, FallbackPool, FetchError, IdentifierSource, PreferenceStore, Preferences,
    Weighting,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Persistence key of the pool state.
pub const STATE_KEY: &str = "selection_pool";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolKey {
    Collection(String),
    Identifier(String),
}

impl PoolKey {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(name) = raw.strip_prefix("collection:") {
            return Some(Self::Collection(name.to_string()));
        }
        raw.strip_prefix("identifier:")
            .map(|id| Self::Identifier(id.to_string()))
    }

    fn from_preferences(prefs: &Preferences) -> BTreeSet<Self> {
        prefs
            .enabled_collections
            .iter()
            .map(|c| Self::Collection(c.clone()))
            .chain(
                prefs
                    .pinned_identifiers
                    .iter()
                    .map(|i| Self::Identifier(i.clone())),
            )
            .collect()
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collection(name) => write!(f, "collection:{name}"),
            Self::Identifier(id) => write!(f, "identifier:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub available: usize,
    pub used: usize,
    /// Round-robin resets since the pool was built.
    pub resets: u64,
    pub draws: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedPool {
    available: Vec<String>,
    used: Vec<String>,
    preference_hash: String,
    #[serde(default)]
    resets: u64,
    #[serde(default)]
    draws: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    available: BTreeSet<PoolKey>,
    used: BTreeSet<PoolKey>,
    hash: Option<String>,
    resets: u64,
    draws: u64,
}

impl PoolState {
    fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available.len(),
            used: self.used.len(),
            resets: self.resets,
            draws: self.draws,
        }
    }

    fn to_persisted(&self) -> PersistedPool {
        PersistedPool {
            available: self.available.iter().map(ToString::to_string).collect(),
            used: self.used.iter().map(ToString::to_string).collect(),
            preference_hash: self.hash.clone().unwrap_or_default(),
            resets: self.resets,
            draws: self.draws,
        }
    }

    fn restore(persisted: PersistedPool) -> Self {
        let available: BTreeSet<PoolKey> = persisted
            .available
            .iter()
            .filter_map(|k| PoolKey::parse(k))
            .collect();
        let used = persisted
            .used
            .iter()
            .filter_map(|k| PoolKey::parse(k))
            .filter(|k| !available.contains(k))
            .collect();
        Self {
            available,
            used,
            hash: Some(persisted.preference_hash),
            resets: persisted.resets,
            draws: persisted.draws,
        }
    }

    fn take_random(&mut self) -> Option<PoolKey> {
        if self.available.is_empty() {
            if self.used.is_empty() {
                return None;
            }
            std::mem::swap(&mut self.available, &mut self.used);
            self.resets += 1;
            info!(
                keys = self.available.len(),
                resets = self.resets,
                "Selection pool exhausted, starting a new round"
            );
        }

        let index = rand::rng().random_range(0..self.available.len());
        let key = self.available.iter().nth(index).cloned()?;
        self.available.remove(&key);
        self.used.insert(key.clone());
        self.draws += 1;
        Some(key)
    }
}

pub struct SelectionPool {
    client: Arc<dyn ArchiveClient>,
    preferences: Arc<dyn PreferenceStore>,
    store: Arc<dyn PoolStore>,
    fallback: FallbackPool,
    weighting: Weighting,
    state: Mutex<PoolState>,
}

impl SelectionPool {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        preferences: Arc<dyn PreferenceStore>,
        store: Arc<dyn PoolStore>,
    ) -> Self {
        Self {
            client,
            preferences,
            store,
            fallback: FallbackPool::default(),
            weighting: Weighting::default(),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Unweighted identifier list used when no key can be resolved.
    pub fn with_fallback(mut self, fallback: FallbackPool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn fallback(&self) -> &FallbackPool {
        &self.fallback
    }

    /// Draws the next identifier.
    pub async fn select(&self, fallback: &FallbackPool) -> clipsource::Result<String> {
        let key = {
            let mut state = self.state.lock().await;
            self.ensure_current(&mut state).await;
            let key = state.take_random();
            if key.is_some() {
                self.persist(&state).await;
            }
            key
        };

        match key {
            None => {
                debug!("Selection pool has no keys, using fallback list");
                fallback.random().ok_or(FetchError::PoolExhausted)
            }
            Some(PoolKey::Identifier(id)) => {
                debug!(identifier = %id, "Pinned identifier selected");
                Ok(id)
            }
            Some(PoolKey::Collection(collection)) => {
                match self
                    .client
                    .select_random_identifier(&collection, self.weighting)
                    .await
                {
                    Ok(id) => {
                        debug!(collection = %collection, identifier = %id, "Collection draw");
                        Ok(id)
                    }
                    Err(e) => {
                        warn!(collection = %collection, "Collection draw failed, using fallback: {}", e);
                        fallback.random().ok_or(e)
                    }
                }
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let mut state = self.state.lock().await;
        self.ensure_current(&mut state).await;
        state.stats()
    }

    /// Forgets the in-memory and persisted state; the next draw rebuilds it.
    pub async fn reset(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        *state = PoolState::default();
        self.store.remove(STATE_KEY).await?;
        info!("Selection pool reset");
        Ok(())
    }

    /// Rebuilds the pool when the preferences changed since the last draw.
    async fn ensure_current(&self, state: &mut PoolState) {
        let hash = self.preferences.preference_hash();
        if state.hash.as_deref() == Some(hash.as_str()) {
            return;
        }

        if state.hash.is_none() {
            if let Some(restored) = self.load_persisted(&hash).await {
                *state = restored;
                info!(
                    available = state.available.len(),
                    used = state.used.len(),
                    "Selection pool restored"
                );
                return;
            }
        }

        let prefs = self.preferences.snapshot();
        *state = PoolState {
            available: PoolKey::from_preferences(&prefs),
            hash: Some(hash),
            ..PoolState::default()
        };
        info!(keys = state.available.len(), "Selection pool built");
        self.persist(state).await;
    }

    async fn load_persisted(&self, hash: &str) -> Option<PoolState> {
        let raw = match self.store.load(STATE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cannot load selection pool state: {:#}", e);
                return None;
            }
        };
        match serde_json::from_str::<PersistedPool>(&raw) {
            Ok(persisted) if persisted.preference_hash == hash => {
                Some(PoolState::restore(persisted))
            }
            Ok(_) => {
                info!("Preferences changed, discarding persisted selection pool");
                None
            }
            Err(e) => {
                warn!("Corrupt selection pool state ignored: {}", e);
                None
            }
        }
    }

    async fn persist(&self, state: &PoolState) {
        let raw = match serde_json::to_string(&state.to_persisted()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cannot serialize selection pool: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.save(STATE_KEY, &raw).await {
            warn!("Cannot persist selection pool: {:#}", e);
        }
    }
}

#[async_trait]
impl IdentifierSource for SelectionPool {
    async fn next_identifier(&self) -> clipsource::Result<String> {
        self.select(&self.fallback).await
    }
}
