//! In-memory collaborators.
//!
//! [`MemoryArchive`], [`SimulatedMediaOpener`] and [`SimulatedPlayer`] stand in
//! for the remote archive and the platform media stack. They are used by the
//! test suites of every crate of the workspace and by offline simulations.

use crate::client::{ArchiveClient, Weighting};
use crate::error::{FetchError, Result};
use crate::media::{BufferStatus, MediaAsset, MediaOpener, OpenOptions, PlaybackHandle, Player};
use crate::models::{FileRef, Metadata};
use crate::session::Session;
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::trace;
use url::Url;

const LOCATOR_BASE: &str = "https://archive.test/download";

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Archive backed by hash maps.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    items: RwLock<HashMap<String, Metadata>>,
    collections: RwLock<BTreeMap<String, Vec<String>>>,
    failures: RwLock<HashMap<String, FetchError>>,
    broken_locators: RwLock<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    metadata_calls: AtomicUsize,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an item and indexes it under each of its collections.
    pub fn insert_item(&self, metadata: Metadata) {
        {
            let mut collections = self
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for collection in &metadata.collections {
                let ids = collections.entry(collection.clone()).or_default();
                if !ids.contains(&metadata.identifier) {
                    ids.push(metadata.identifier.clone());
                }
            }
        }
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metadata.identifier.clone(), metadata);
    }

    /// Registers a single-file h.264 item of `seconds` length.
    pub fn insert_clip(&self, identifier: &str, collection: &str, seconds: f64) {
        let mut metadata = Metadata::new(identifier);
        metadata.title = format!("Clip {identifier}");
        metadata.collections = vec![collection.to_string()];
        metadata.files = vec![FileRef::new(format!("{identifier}.mp4"), "h.264")
            .with_length(seconds)
            .with_size(1_048_576)];
        self.insert_item(metadata);
    }

    /// Makes every metadata fetch of `identifier` fail with `error`.
    pub fn fail_identifier(&self, identifier: &str, error: FetchError) {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string(), error);
    }

    pub fn heal_identifier(&self, identifier: &str) {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }

    pub fn break_locator(&self, identifier: &str) {
        self.broken_locators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string());
    }

    /// Delay applied to every metadata fetch.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    /// All registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ArchiveClient for MemoryArchive {
    async fn fetch_metadata(&self, identifier: &str) -> Result<Metadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self
            .failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
        {
            return Err(error.clone());
        }

        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(identifier.to_string()))
    }

    async fn resolve_locator(&self, file: &FileRef, identifier: &str) -> Result<Url> {
        if self
            .broken_locators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identifier)
        {
            return Err(FetchError::UnresolvableLocator {
                identifier: identifier.to_string(),
                file: file.name.clone(),
                reason: "no byte-range server".into(),
            });
        }
        Url::parse(&format!("{LOCATOR_BASE}/{identifier}/{}", file.name)).map_err(|e| {
            FetchError::UnresolvableLocator {
                identifier: identifier.to_string(),
                file: file.name.clone(),
                reason: e.to_string(),
            }
        })
    }

    async fn select_random_identifier(
        &self,
        collection: &str,
        weighting: Weighting,
    ) -> Result<String> {
        trace!(collection, ?weighting, "Random identifier draw");
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .and_then(|ids| ids.choose(&mut rand::rng()).cloned())
            .ok_or_else(|| FetchError::NotFound(format!("collection {collection}")))
    }
}

/// Identifier embedded in a locator produced by [`MemoryArchive`].
fn identifier_of(locator: &Url) -> String {
    locator
        .path_segments()
        .and_then(|mut segments| {
            segments.next();
            segments.next()
        })
        .unwrap_or_default()
        .to_string()
}

struct SimulatedAsset {
    locator: Url,
    probe: std::result::Result<f64, String>,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaAsset for SimulatedAsset {
    fn locator(&self) -> &Url {
        &self.locator
    }

    async fn probe_duration(&self) -> Result<f64> {
        self.probe.clone().map_err(FetchError::ProbeFailed)
    }
}

impl Drop for SimulatedAsset {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Media opener that counts live assets.
#[derive(Debug, Default)]
pub struct SimulatedMediaOpener {
    live: Arc<AtomicUsize>,
    opened: AtomicUsize,
    fail_probe: AtomicBool,
    unsupported: RwLock<HashSet<String>>,
    last_options: Mutex<Option<OpenOptions>>,
}

impl SimulatedMediaOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assets currently alive.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    /// Opening any file of `identifier` fails as unsupported media.
    pub fn mark_unsupported(&self, identifier: &str) {
        self.unsupported
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string());
    }

    pub fn last_options(&self) -> Option<OpenOptions> {
        *lock(&self.last_options)
    }
}

#[async_trait]
impl MediaOpener for SimulatedMediaOpener {
    async fn open(&self, locator: &Url, options: OpenOptions) -> Result<Arc<dyn MediaAsset>> {
        let identifier = identifier_of(locator);
        if self
            .unsupported
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&identifier)
        {
            return Err(FetchError::UnsupportedMedia {
                identifier,
                reason: "unknown container".into(),
            });
        }

        *lock(&self.last_options) = Some(options);
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        let probe = if self.fail_probe.load(Ordering::SeqCst) {
            Err("truncated container".to_string())
        } else {
            Ok(120.0)
        };
        Ok(Arc::new(SimulatedAsset {
            locator: locator.clone(),
            probe,
            live: Arc::clone(&self.live),
        }))
    }
}

struct SimulatedHandle {
    script: Mutex<VecDeque<BufferStatus>>,
    polls: AtomicUsize,
    ready_after: usize,
    muted: AtomicBool,
    paused: AtomicBool,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl PlaybackHandle for SimulatedHandle {
    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    async fn seek(&self, _seconds: f64) -> Result<()> {
        Ok(())
    }

    fn buffer_status(&self) -> BufferStatus {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = lock(&self.script);
        if script.len() > 1 {
            if let Some(next) = script.pop_front() {
                return next;
            }
        }
        if let Some(last) = script.front() {
            return last.clone();
        }

        if polls >= self.ready_after {
            BufferStatus::Buffering {
                buffered_seconds: 5.0,
                likely_to_keep_up: true,
            }
        } else {
            BufferStatus::Buffering {
                buffered_seconds: polls as f64 * 0.5,
                likely_to_keep_up: false,
            }
        }
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Player whose buffer behaviour is scripted per identifier.
///
/// Without a script a handle reports "keeping up" from its `ready_after`-th
/// poll onwards. A script is replayed one status per poll and its last entry
/// sticks.
#[derive(Debug, Default)]
pub struct SimulatedPlayer {
    scripts: Mutex<HashMap<String, Vec<BufferStatus>>>,
    failing: RwLock<HashSet<String>>,
    ready_after: AtomicUsize,
    live: Arc<AtomicUsize>,
    prepared: Mutex<Vec<String>>,
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready_after(&self, polls: usize) {
        self.ready_after.store(polls, Ordering::SeqCst);
    }

    pub fn script(&self, identifier: &str, statuses: Vec<BufferStatus>) {
        lock(&self.scripts).insert(identifier.to_string(), statuses);
    }

    /// The handle of `identifier` never reports "keeping up".
    pub fn stall(&self, identifier: &str) {
        self.script(
            identifier,
            vec![BufferStatus::Buffering {
                buffered_seconds: 0.0,
                likely_to_keep_up: false,
            }],
        );
    }

    /// The handle of `identifier` reports a media failure.
    pub fn fail_media(&self, identifier: &str, reason: &str) {
        self.script(
            identifier,
            vec![BufferStatus::Failed {
                reason: reason.to_string(),
            }],
        );
    }

    /// Preparing `identifier` fails outright.
    pub fn fail_prepare(&self, identifier: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string());
    }

    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Identifiers passed to `prepare`, in call order.
    pub fn prepared(&self) -> Vec<String> {
        lock(&self.prepared).clone()
    }
}

#[async_trait]
impl Player for SimulatedPlayer {
    async fn prepare(&self, session: &Session) -> Result<Box<dyn PlaybackHandle>> {
        let identifier = session.identifier().to_string();
        lock(&self.prepared).push(identifier.clone());

        if self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&identifier)
        {
            return Err(FetchError::UnsupportedMedia {
                identifier,
                reason: "player rejected item".into(),
            });
        }

        let script: VecDeque<BufferStatus> = lock(&self.scripts)
            .get(&identifier)
            .cloned()
            .unwrap_or_default()
            .into();
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedHandle {
            script: Mutex::new(script),
            polls: AtomicUsize::new(0),
            ready_after: self.ready_after.load(Ordering::SeqCst),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            live: Arc::clone(&self.live),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_lookup_and_failures() {
        let archive = MemoryArchive::new();
        archive.insert_clip("a", "films", 300.0);

        let meta = archive.fetch_metadata("a").await.unwrap();
        assert_eq!(meta.primary_collection(), "films");
        assert!(archive.fetch_metadata("zzz").await.unwrap_err().is_structural());

        archive.fail_identifier("a", FetchError::Timeout);
        assert!(archive.fetch_metadata("a").await.unwrap_err().is_transient());
        archive.heal_identifier("a");
        assert!(archive.fetch_metadata("a").await.is_ok());
        assert_eq!(archive.metadata_calls(), 4);

        let id = archive
            .select_random_identifier("films", Weighting::Uniform)
            .await
            .unwrap();
        assert_eq!(id, "a");
        assert!(archive
            .select_random_identifier("empty", Weighting::Uniform)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_locator_roundtrips_identifier() {
        let archive = MemoryArchive::new();
        let file = FileRef::new("a.mp4", "h.264");
        let url = archive.resolve_locator(&file, "a").await.unwrap();
        assert_eq!(identifier_of(&url), "a");

        archive.break_locator("a");
        assert!(archive.resolve_locator(&file, "a").await.is_err());
    }

    #[tokio::test]
    async fn test_opener_counts_live_assets() {
        let opener = SimulatedMediaOpener::new();
        let url = Url::parse("https://archive.test/download/a/a.mp4").unwrap();
        let asset = opener.open(&url, OpenOptions::for_format(crate::models::MediaFormat::H264))
            .await
            .unwrap();
        assert_eq!(opener.live_handles(), 1);
        assert_eq!(asset.probe_duration().await.unwrap(), 120.0);
        drop(asset);
        assert_eq!(opener.live_handles(), 0);

        opener.mark_unsupported("a");
        let err = opener
            .open(&url, OpenOptions::for_format(crate::models::MediaFormat::H264))
            .await
            .err()
            .unwrap();
        assert!(err.is_content_failure());
    }
}
