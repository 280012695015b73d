//! Pipeline de préchargement
//!
//! One [`PreloadSlot`] per swipe direction holds the session the user would
//! land on, together with a muted, paused playback handle seeked to the start
//! offset. A slot becomes *ready* after the handle reported "keeping up" on
//! consecutive polls; only ready slots are handed to the transition
//! controller.
//!
//! Every preload holds an arbiter ticket for its whole run, including when it
//! fails, times out or its task is aborted.

use crate::arbiter::{Arbiter, PreloadTicket};
use crate::config::PreloadConfig;
use crate::error::{FeedError, Result};
use crate::fill::FillWorker;
use crate::provider::FeedProvider;
use clipcache::PlaybackHistory;
use clipsource::{
    BufferStatus, FetchError, IdentifierSource, PlaybackHandle, Player, Session, SessionFactory,
};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Next, Direction::Previous];

    pub fn label(self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Next => Self::Previous,
            Self::Previous => Self::Next,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Metadata shown for a direction before its buffer is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionInfo {
    pub identifier: String,
    pub title: String,
    pub collection: String,
    pub file_name: String,
    pub file_count: usize,
}

impl DirectionInfo {
    pub fn from_session(session: &Session) -> Self {
        Self {
            identifier: session.identifier().to_string(),
            title: session.title().to_string(),
            collection: session.collection().to_string(),
            file_name: session.file_name().to_string(),
            file_count: session.file_count(),
        }
    }
}

/// Three-state status dot shown per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferIndicator {
    Empty,
    CachedNotReady,
    Ready,
}

/// A ready session handed over on a transition.
pub struct PreparedSession {
    pub session: Arc<Session>,
    pub handle: Box<dyn PlaybackHandle>,
    /// Time from preload start to readiness.
    pub latency: Option<Duration>,
}

impl fmt::Debug for PreparedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedSession")
            .field("identifier", &self.session.identifier())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    session: Option<Arc<Session>>,
    handle: Option<Box<dyn PlaybackHandle>>,
    ready: bool,
    buffered_seconds: f64,
    latency: Option<Duration>,
}

impl SlotState {
    fn reset(&mut self) {
        self.session = None;
        self.handle = None;
        self.ready = false;
        self.buffered_seconds = 0.0;
        self.latency = None;
    }
}

/// Preload state of one direction.
///
/// Each preload run works on a generation; once a newer run began (or the
/// slot was consumed) stale runs can no longer touch the slot.
pub struct PreloadSlot {
    direction: Direction,
    state: StdMutex<SlotState>,
    info: watch::Sender<Option<DirectionInfo>>,
}

impl PreloadSlot {
    pub fn new(direction: Direction) -> Self {
        let (info, _) = watch::channel(None);
        Self {
            direction,
            state: StdMutex::new(SlotState::default()),
            info,
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Resets the slot for a new run and returns its generation.
    fn begin(&self) -> u64 {
        let mut state = self.state();
        state.generation += 1;
        state.reset();
        self.info.send_replace(None);
        state.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state().generation == generation
    }

    fn install(
        &self,
        generation: u64,
        session: Arc<Session>,
        handle: Box<dyn PlaybackHandle>,
    ) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            return false;
        }
        state.session = Some(session);
        state.handle = Some(handle);
        true
    }

    fn publish(&self, generation: u64, info: DirectionInfo) {
        if self.is_current(generation) {
            self.info.send_replace(Some(info));
        }
    }

    /// Polls the installed handle; `None` once the run is stale.
    fn poll(&self, generation: u64) -> Option<BufferStatus> {
        let mut state = self.state();
        if state.generation != generation {
            return None;
        }
        let status = state.handle.as_ref()?.buffer_status();
        state.buffered_seconds = status.buffered_seconds();
        Some(status)
    }

    fn mark_ready(&self, generation: u64, latency: Duration) -> bool {
        let mut state = self.state();
        if state.generation != generation || state.handle.is_none() {
            return false;
        }
        state.ready = true;
        state.latency = Some(latency);
        true
    }

    /// Releases what a failed run installed.
    fn clear(&self, generation: u64) {
        let mut state = self.state();
        if state.generation == generation {
            state.reset();
            self.info.send_replace(None);
        }
    }

    /// Drops the slot content and makes every running preload stale.
    pub fn invalidate(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.reset();
        self.info.send_replace(None);
    }

    /// Hands over the ready session and empties the slot.
    pub fn take_ready(&self) -> Option<PreparedSession> {
        let mut state = self.state();
        if !state.ready {
            return None;
        }
        let session = state.session.take()?;
        let handle = state.handle.take()?;
        let latency = state.latency;
        state.generation += 1;
        state.reset();
        self.info.send_replace(None);
        Some(PreparedSession {
            session,
            handle,
            latency,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    pub fn has_session(&self) -> bool {
        self.state().session.is_some()
    }

    /// Session held by the slot, ready or not.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.state().session.clone()
    }

    pub fn ready_session(&self) -> Option<Arc<Session>> {
        let state = self.state();
        if state.ready {
            state.session.clone()
        } else {
            None
        }
    }

    pub fn holds(&self, identifier: &str) -> bool {
        self.state()
            .session
            .as_ref()
            .is_some_and(|s| s.identifier() == identifier)
    }

    pub fn latency(&self) -> Option<Duration> {
        self.state().latency
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.state().buffered_seconds
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DirectionInfo>> {
        self.info.subscribe()
    }
}

/// Returns the arbiter ticket on every exit path.
struct TicketGuard<'a> {
    arbiter: &'a Arbiter,
    ticket: Option<PreloadTicket>,
}

impl<'a> TicketGuard<'a> {
    fn take(arbiter: &'a Arbiter, direction: Direction) -> Self {
        Self {
            arbiter,
            ticket: Some(arbiter.set_preload_started(direction.label())),
        }
    }
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.arbiter.set_preload_complete(ticket);
        }
    }
}

pub struct Preloader {
    provider: Arc<dyn FeedProvider>,
    factory: Arc<dyn SessionFactory>,
    player: Arc<dyn Player>,
    arbiter: Arbiter,
    fill: Option<FillWorker>,
    history: Arc<Mutex<PlaybackHistory>>,
    config: PreloadConfig,
    next: PreloadSlot,
    previous: PreloadSlot,
    shutdown: CancellationToken,
}

impl Preloader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn FeedProvider>,
        factory: Arc<dyn SessionFactory>,
        player: Arc<dyn Player>,
        arbiter: Arbiter,
        fill: Option<FillWorker>,
        history: Arc<Mutex<PlaybackHistory>>,
        config: PreloadConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            factory,
            player,
            arbiter,
            fill,
            history,
            config,
            next: PreloadSlot::new(Direction::Next),
            previous: PreloadSlot::new(Direction::Previous),
            shutdown,
        }
    }

    pub fn slot(&self, direction: Direction) -> &PreloadSlot {
        match direction {
            Direction::Next => &self.next,
            Direction::Previous => &self.previous,
        }
    }

    pub async fn preload_next(&self) -> Result<bool> {
        self.preload(Direction::Next).await
    }

    pub async fn preload_previous(&self) -> Result<bool> {
        self.preload(Direction::Previous).await
    }

    /// Prepares the session of `direction` until it is ready.
    ///
    /// Returns `Ok(true)` once the slot is ready, `Ok(false)` when there is
    /// nothing to preload or a newer run took over the slot.
    pub async fn preload(&self, direction: Direction) -> Result<bool> {
        if self.shutdown.is_cancelled() {
            return Err(FeedError::NotRunning);
        }

        let guard = TicketGuard::take(&self.arbiter, direction);
        let generation = self.slot(direction).begin();
        let started = Instant::now();
        debug!(direction = %direction, generation, "Preload started");

        let timeout = self.config.timeout();
        let outcome = tokio::time::timeout(timeout, self.run(direction, generation, started)).await;
        drop(guard);

        let result = match outcome {
            Ok(Ok(ready)) => Ok(ready),
            Ok(Err(e)) => {
                warn!(direction = %direction, "Preload failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    direction = %direction,
                    "Preload not ready after {:.1}s, releasing hard block",
                    timeout.as_secs_f64()
                );
                Err(FeedError::PreloadTimeout(timeout.as_secs_f64()))
            }
        };

        if let Some(fill) = &self.fill {
            // detached: the task reports through the arbiter and the logs
            let _ = fill.ensure_filled().await;
        }
        result
    }

    async fn run(&self, direction: Direction, generation: u64, started: Instant) -> Result<bool> {
        let slot = self.slot(direction);
        let mut skip = 0usize;

        loop {
            if !slot.is_current(generation) {
                return Ok(false);
            }

            let session = match self.resolve(direction, skip).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    debug!(direction = %direction, "Nothing to preload");
                    return Ok(false);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if e.is_content_failure() => {
                    warn!(direction = %direction, "Skipping unplayable session: {}", e);
                    skip += 1;
                    continue;
                }
                Err(e) => {
                    warn!(direction = %direction, "Preload build failed, retrying: {}", e);
                    tokio::time::sleep(self.config.retry_delay()).await;
                    continue;
                }
            };

            match self.prepare(slot, generation, &session, started).await {
                Ok(ready) => return Ok(ready),
                Err(e) if e.is_content_failure() => {
                    warn!(
                        direction = %direction,
                        identifier = session.identifier(),
                        "Content failure, skipping forward: {}", e
                    );
                    self.drop_content(session.identifier()).await;
                    skip += 1;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(direction = %direction, "Preparing playback failed, retrying: {}", e);
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    /// Picks the session of `direction` without consuming anything.
    ///
    /// History comes first. `next` then looks into the cache window (never
    /// the current session); both directions end with a fresh build for
    /// feeds that can grow. Bounded feeds build the neighbour of their list
    /// position, `skip` entries further.
    async fn resolve(&self, direction: Direction, skip: usize) -> Result<Option<Arc<Session>>> {
        if let Some(list) = self.provider.bounded_history() {
            let Some(identifier) = list.neighbour(direction, skip) else {
                return Ok(None);
            };
            return self.build(&identifier).await.map(Some);
        }

        let (current, peeked) = {
            let history = self.history.lock().await;
            let peeked = match direction {
                Direction::Next => history.peek_next(),
                Direction::Previous => history.peek_previous(),
            };
            (history.current(), peeked)
        };
        if let Some(session) = peeked {
            trace!(direction = %direction, identifier = session.identifier(), "Preloading from history");
            return Ok(Some(session));
        }

        let Some(caching) = self.provider.general_caching() else {
            return Ok(None);
        };

        let current_id = current.as_ref().map(|s| s.identifier().to_string());
        if direction == Direction::Next {
            let cached = caching
                .cache()
                .snapshot()
                .await
                .into_iter()
                .find(|s| current_id.as_deref() != Some(s.identifier()));
            if let Some(session) = cached {
                trace!(identifier = session.identifier(), "Preloading from cache");
                return Ok(Some(session));
            }
        }

        let identifier = caching.selection().next_identifier().await?;
        if current_id.as_deref() == Some(identifier.as_str()) {
            return Err(FetchError::other(format!("{identifier} is already playing")).into());
        }
        if self.slot(direction.opposite()).holds(&identifier) {
            return Err(FetchError::other(format!("{identifier} is already preloaded")).into());
        }
        self.build(&identifier).await.map(Some)
    }

    async fn build(&self, identifier: &str) -> Result<Arc<Session>> {
        let token = self.shutdown.child_token();
        let session = self.factory.build(identifier, &token).await?;
        Ok(Arc::new(session))
    }

    async fn prepare(
        &self,
        slot: &PreloadSlot,
        generation: u64,
        session: &Arc<Session>,
        started: Instant,
    ) -> Result<bool> {
        let handle = self.player.prepare(session).await?;
        handle.set_muted(true);
        handle.pause();
        handle.seek(session.start_offset()).await?;

        if !slot.install(generation, Arc::clone(session), handle) {
            return Ok(false);
        }
        slot.publish(generation, DirectionInfo::from_session(session));

        let needed = self.config.ready_confirmations.max(1);
        let mut confirmations = 0usize;
        loop {
            match slot.poll(generation) {
                None => return Ok(false),
                Some(BufferStatus::Failed { reason }) => {
                    slot.clear(generation);
                    return Err(FetchError::UnsupportedMedia {
                        identifier: session.identifier().to_string(),
                        reason,
                    }
                    .into());
                }
                Some(status) if status.is_keeping_up() => {
                    confirmations += 1;
                    if confirmations >= needed {
                        let latency = started.elapsed();
                        if !slot.mark_ready(generation, latency) {
                            return Ok(false);
                        }
                        info!(
                            direction = %slot.direction(),
                            identifier = session.identifier(),
                            latency_ms = latency.as_millis() as u64,
                            buffered = status.buffered_seconds(),
                            "Preload ready"
                        );
                        return Ok(true);
                    }
                }
                Some(status) => {
                    confirmations = 0;
                    trace!(buffered = status.buffered_seconds(), "Buffer not keeping up yet");
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Forgets an unplayable session everywhere it may be picked again.
    pub async fn drop_content(&self, identifier: &str) {
        if let Some(caching) = self.provider.general_caching() {
            if caching.cache().remove(identifier).await.is_some() {
                debug!(identifier, "Unplayable session removed from cache");
            }
        }
        let removed = self.history.lock().await.remove(identifier);
        if removed > 0 {
            debug!(identifier, removed, "Unplayable session removed from history");
        }
    }

    /// Empties both slots; running preloads become stale.
    pub fn invalidate_all(&self) {
        self.next.invalidate();
        self.previous.invalidate();
    }
}
