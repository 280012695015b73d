//! Session building.
//!
//! A [`Session`] is one archive identifier turned into something the player
//! can start immediately: metadata, the chosen file, a byte-range locator, an
//! opened media asset and a safe random start offset.
//!
//! Building is a chain of slow steps (metadata fetch, listing, duration
//! estimates, locator resolution, opening, probing). The builder checks its
//! [`CancellationToken`] before and after every one of them so background
//! work can get out of the way of a foreground preload within one step.

use crate::client::ArchiveClient;
use crate::error::{FetchError, Result};
use crate::media::{MediaAsset, MediaOpener, OpenOptions};
use crate::models::{FileRef, MediaFormat};
use crate::preferences::PreferenceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Share of the clip kept out of the random start window.
pub const TAIL_RATIO: f64 = 0.2;
/// Minimum seconds kept out of the random start window.
pub const TAIL_MIN_SECS: f64 = 60.0;
/// Seconds of content that must remain after the start offset.
pub const TRAILING_MIN_SECS: f64 = 40.0;
/// Windows narrower than this start at 0.
pub const WINDOW_MIN_SECS: f64 = 10.0;

/// Range of acceptable random start offsets for a clip of `duration` seconds.
///
/// `None` means the clip must start at the beginning.
pub fn start_offset_window(duration: f64) -> Option<Range<f64>> {
    if !duration.is_finite() || duration <= 0.0 {
        return None;
    }
    let upper = (duration - (duration * TAIL_RATIO).max(TAIL_MIN_SECS))
        .min(duration - TRAILING_MIN_SECS);
    if upper < WINDOW_MIN_SECS {
        return None;
    }
    Some(0.0..upper)
}

pub fn pick_start_offset<R: Rng>(
    duration: f64,
    start_at_beginning: bool,
    rng: &mut R,
) -> f64 {
    if start_at_beginning {
        return 0.0;
    }
    match start_offset_window(duration) {
        Some(window) => rng.random_range(window),
        None => 0.0,
    }
}

/// A fully prepared, playable clip.
///
/// Everything is immutable once built except the favorite timestamp. The
/// media asset is owned by the session; a pending duration probe is aborted
/// when the session is dropped.
pub struct Session {
    instance_id: Uuid,
    identifier: String,
    collection: String,
    title: String,
    description: String,
    file_name: String,
    format: MediaFormat,
    locator: Url,
    media: Arc<dyn MediaAsset>,
    start_offset: f64,
    duration: f64,
    file_count: usize,
    built_at: Instant,
    favorited_at: Mutex<Option<DateTime<Utc>>>,
    probed_duration: Arc<OnceLock<f64>>,
    probe: Option<JoinHandle<()>>,
}

impl Session {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn format(&self) -> MediaFormat {
        self.format
    }

    pub fn locator(&self) -> &Url {
        &self.locator
    }

    pub fn media(&self) -> &Arc<dyn MediaAsset> {
        &self.media
    }

    /// Seconds into the file where playback starts.
    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Estimated duration used to compute the start offset.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Duration reported by the background probe, once it completed.
    pub fn probed_duration(&self) -> Option<f64> {
        self.probed_duration.get().copied()
    }

    /// Distinct media files of the identifier (at least 1).
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn age(&self) -> std::time::Duration {
        self.built_at.elapsed()
    }

    pub fn favorited_at(&self) -> Option<DateTime<Utc>> {
        *self
            .favorited_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_favorited_at(&self, at: Option<DateTime<Utc>>) {
        *self
            .favorited_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.identifier)
            .field("collection", &self.collection)
            .field("file_name", &self.file_name)
            .field("start_offset", &self.start_offset)
            .field("duration", &self.duration)
            .field("file_count", &self.file_count)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
    }
}

/// Something that turns an identifier into a [`Session`].
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn build(&self, identifier: &str, cancel: &CancellationToken) -> Result<Session>;
}

/// Something that hands out the next identifier to fetch.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    async fn next_identifier(&self) -> Result<String>;
}

fn checkpoint(cancel: &CancellationToken, stage: &'static str) -> Result<()> {
    if cancel.is_cancelled() {
        debug!(stage, "Session build cancelled");
        return Err(FetchError::Cancelled(stage));
    }
    Ok(())
}

/// Builds sessions from the archive, a media opener and the user preferences.
#[derive(Clone)]
pub struct SessionBuilder {
    client: Arc<dyn ArchiveClient>,
    opener: Arc<dyn MediaOpener>,
    preferences: Arc<dyn PreferenceStore>,
}

impl SessionBuilder {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        opener: Arc<dyn MediaOpener>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            client,
            opener,
            preferences,
        }
    }

    pub fn client(&self) -> &Arc<dyn ArchiveClient> {
        &self.client
    }

    /// Builds a session for `identifier`.
    ///
    /// Returns [`FetchError::Cancelled`] as soon as `cancel` is observed at a
    /// step boundary; anything opened so far is released.
    pub async fn build(&self, identifier: &str, cancel: &CancellationToken) -> Result<Session> {
        checkpoint(cancel, "start")?;
        let metadata = self.client.fetch_metadata(identifier).await?;
        checkpoint(cancel, "metadata")?;

        let listed = self.client.list_playable_files(&metadata).await?;
        checkpoint(cancel, "file listing")?;

        let candidates: Vec<FileRef> = listed.into_iter().filter(FileRef::is_playable).collect();
        if candidates.is_empty() {
            return Err(FetchError::NoPlayableFile(identifier.to_string()));
        }

        let (file, duration) = self.select_file(&candidates).await;
        checkpoint(cancel, "file selection")?;

        let locator = self.client.resolve_locator(&file, identifier).await?;
        checkpoint(cancel, "locator")?;

        let format = file.media_format();
        let media = self
            .opener
            .open(&locator, OpenOptions::for_format(format))
            .await?;
        checkpoint(cancel, "open")?;

        let start_at_beginning = self.preferences.snapshot().start_at_beginning;
        let start_offset = pick_start_offset(duration, start_at_beginning, &mut rand::rng());
        checkpoint(cancel, "probe")?;

        let probed_duration = Arc::new(OnceLock::new());
        let probe = spawn_probe(identifier, Arc::clone(&media), Arc::clone(&probed_duration));

        let session = Session {
            instance_id: Uuid::new_v4(),
            identifier: metadata.identifier.clone(),
            collection: metadata.primary_collection().to_string(),
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            file_name: file.name.clone(),
            format,
            locator,
            media,
            start_offset,
            duration,
            file_count: metadata.distinct_media_files(),
            built_at: Instant::now(),
            favorited_at: Mutex::new(None),
            probed_duration,
            probe: Some(probe),
        };

        debug!(
            identifier = session.identifier(),
            file = session.file_name(),
            start_offset = session.start_offset(),
            duration = session.duration(),
            "Session built"
        );
        Ok(session)
    }

    /// Picks the longest candidate; equally long candidates are drawn at random.
    async fn select_file(&self, candidates: &[FileRef]) -> (FileRef, f64) {
        let mut scored = Vec::with_capacity(candidates.len());
        for file in candidates {
            let duration = match self.client.estimate_duration(file).await {
                Ok(d) if d.is_finite() && d > 0.0 => d,
                Ok(_) => 0.0,
                Err(e) => {
                    debug!(file = %file.name, "No duration estimate: {}", e);
                    0.0
                }
            };
            scored.push((file, duration));
        }

        let longest = scored
            .iter()
            .map(|(_, d)| d.round() as u64)
            .max()
            .unwrap_or(0);
        let best: Vec<&(&FileRef, f64)> = scored
            .iter()
            .filter(|(_, d)| d.round() as u64 == longest)
            .collect();

        match best.choose(&mut rand::rng()) {
            Some((file, duration)) => ((*file).clone(), *duration),
            None => (candidates[0].clone(), 0.0),
        }
    }
}

fn spawn_probe(
    identifier: &str,
    media: Arc<dyn MediaAsset>,
    slot: Arc<OnceLock<f64>>,
) -> JoinHandle<()> {
    let identifier = identifier.to_string();
    tokio::spawn(async move {
        match media.probe_duration().await {
            Ok(duration) => {
                let _ = slot.set(duration);
            }
            Err(e) => {
                warn!(identifier = %identifier, "Duration probe failed (non fatal): {}", e);
            }
        }
    })
}

#[async_trait]
impl SessionFactory for SessionBuilder {
    async fn build(&self, identifier: &str, cancel: &CancellationToken) -> Result<Session> {
        SessionBuilder::build(self, identifier, cancel).await
    }
}
