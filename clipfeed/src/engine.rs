//! Feed engine: the surface the transition controller talks to.
//!
//! ```text
//!            ┌──────────────┐ peek/consume ┌────────────────┐
//!  swipe ──▶ │  FeedEngine  │ ───────────▶ │ PreloadSlot ×2 │
//!            └──────┬───────┘              └───────▲────────┘
//!                   │ advance_cache_window         │ preload
//!                   ▼                              │
//!            ┌──────────────┐   fill   ┌───────────┴──┐
//!            │  CacheStore  │ ◀─────── │  FillWorker  │
//!            └──────────────┘          └──────────────┘
//! ```
//!
//! The engine owns one instance of each collaborator; nothing is global.

use crate::arbiter::Arbiter;
use crate::config::FeedConfig;
use crate::error::{FeedError, Result};
use crate::fill::FillWorker;
use crate::preload::{
    BufferIndicator, Direction, DirectionInfo, PreloadSlot, PreparedSession, Preloader,
};
use crate::provider::FeedProvider;
use chrono::{DateTime, Utc};
use clipcache::{PlaybackHistory, WindowReport};
use clipsource::{IdentifierSource, Player, Session, SessionFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Inner {
    config: FeedConfig,
    provider: Arc<dyn FeedProvider>,
    factory: Arc<dyn SessionFactory>,
    arbiter: Arbiter,
    fill: Option<FillWorker>,
    preloader: Arc<Preloader>,
    history: Arc<Mutex<PlaybackHistory>>,
    tasks: StdMutex<HashMap<Direction, AbortHandle>>,
    running: AtomicBool,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct FeedEngine {
    inner: Arc<Inner>,
}

impl FeedEngine {
    pub fn new(
        provider: Arc<dyn FeedProvider>,
        factory: Arc<dyn SessionFactory>,
        player: Arc<dyn Player>,
        config: FeedConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let arbiter = Arbiter::new(config.arbiter.watchdog());
        let history = Arc::new(Mutex::new(PlaybackHistory::new(
            config.history.max_sessions,
        )));

        let fill = provider.general_caching().map(|caching| {
            let source: Arc<dyn IdentifierSource> = caching.selection().clone();
            FillWorker::new(
                caching.cache().clone(),
                source,
                Arc::clone(&factory),
                arbiter.clone(),
                config.fill.clone(),
                shutdown.clone(),
            )
        });

        let preloader = Arc::new(Preloader::new(
            Arc::clone(&provider),
            Arc::clone(&factory),
            player,
            arbiter.clone(),
            fill.clone(),
            Arc::clone(&history),
            config.preload.clone(),
            shutdown.clone(),
        ));

        info!(feed = provider.name(), "Feed engine created");
        Self {
            inner: Arc::new(Inner {
                config,
                provider,
                factory,
                arbiter,
                fill,
                preloader,
                history,
                tasks: StdMutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.inner.arbiter
    }

    pub fn fill_worker(&self) -> Option<&FillWorker> {
        self.inner.fill.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Puts a first session on screen, then preloads both directions.
    ///
    /// The first session is obtained synchronously: from the cache after a
    /// startup fill for the main feed, from the list position for bounded
    /// feeds.
    pub async fn start(&self) -> Result<Arc<Session>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(FeedError::NotRunning);
        }
        if self.is_running() {
            if let Some(current) = self.current().await {
                return Ok(current);
            }
        }

        let first = self.first_session().await?;
        self.inner.history.lock().await.push(Arc::clone(&first));
        self.inner.arbiter.set_first_session_ready();
        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            feed = self.inner.provider.name(),
            identifier = first.identifier(),
            "First session ready"
        );

        for direction in Direction::ALL {
            self.spawn_preload(direction);
        }
        Ok(first)
    }

    async fn first_session(&self) -> Result<Arc<Session>> {
        let attempts = self.inner.config.fill.startup_attempts.max(1);

        if let Some(caching) = self.inner.provider.general_caching() {
            if let Some(fill) = &self.inner.fill {
                // first session not ready yet: this never spawns a task
                let _ = fill.ensure_filled().await;
            }
            return caching
                .cache()
                .pop()
                .await
                .ok_or(FeedError::StartupFailed(attempts));
        }

        let Some(list) = self.inner.provider.bounded_history() else {
            return Err(FeedError::StartupFailed(0));
        };
        let token = self.inner.shutdown.child_token();
        for attempt in 1..=attempts {
            let Some(identifier) = list.identifier_at(list.position()) else {
                break;
            };
            match self.inner.factory.build(&identifier, &token).await {
                Ok(session) => return Ok(Arc::new(session)),
                Err(e) if e.is_content_failure() => {
                    warn!(identifier = %identifier, "Skipping unplayable list entry: {}", e);
                    if !list.step(Direction::Next) {
                        break;
                    }
                }
                Err(e) => {
                    warn!(attempt, identifier = %identifier, "First session build failed: {}", e);
                }
            }
        }
        Err(FeedError::StartupFailed(attempts))
    }

    /// Restarts the preload of `direction`, aborting the one in flight.
    pub fn spawn_preload(&self, direction: Direction) -> JoinHandle<Result<bool>> {
        let preloader = Arc::clone(&self.inner.preloader);
        let handle = tokio::spawn(async move { preloader.preload(direction).await });

        let previous = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(direction, handle.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
        handle
    }

    pub fn preload_next(&self) -> JoinHandle<Result<bool>> {
        self.spawn_preload(Direction::Next)
    }

    pub fn preload_previous(&self) -> JoinHandle<Result<bool>> {
        self.spawn_preload(Direction::Previous)
    }

    fn slot(&self, direction: Direction) -> &PreloadSlot {
        self.inner.preloader.slot(direction)
    }

    /// Ready session of the next direction, left in place.
    pub fn peek_next(&self) -> Option<Arc<Session>> {
        self.slot(Direction::Next).ready_session()
    }

    pub fn peek_previous(&self) -> Option<Arc<Session>> {
        self.slot(Direction::Previous).ready_session()
    }

    pub fn is_next_ready(&self) -> bool {
        self.slot(Direction::Next).is_ready()
    }

    pub fn is_previous_ready(&self) -> bool {
        self.slot(Direction::Previous).is_ready()
    }

    pub async fn consume_next(&self) -> Result<PreparedSession> {
        self.consume(Direction::Next).await
    }

    pub async fn consume_previous(&self) -> Result<PreparedSession> {
        self.consume(Direction::Previous).await
    }

    /// Hands over the ready session of `direction` and makes it current.
    ///
    /// Fails with [`FeedError::NotReady`] while the slot is not ready; the
    /// caller keeps the current session on screen.
    async fn consume(&self, direction: Direction) -> Result<PreparedSession> {
        if !self.is_running() {
            return Err(FeedError::NotRunning);
        }
        let prepared = self
            .slot(direction)
            .take_ready()
            .ok_or(FeedError::NotReady(direction))?;

        {
            let mut history = self.inner.history.lock().await;
            let identifier = prepared.session.identifier();
            let same = |s: Option<Arc<Session>>| s.is_some_and(|s| s.identifier() == identifier);
            if same(history.peek_next()) {
                history.forward();
            } else if same(history.peek_previous()) {
                history.back();
            } else {
                match direction {
                    Direction::Next => history.push(Arc::clone(&prepared.session)),
                    Direction::Previous => history.push_behind(Arc::clone(&prepared.session)),
                }
            }
        }
        if let Some(list) = self.inner.provider.bounded_history() {
            // unplayable entries may have been skipped
            match list.locate(direction, prepared.session.identifier()) {
                Some(index) => list.set_position(index),
                None => {
                    list.step(direction);
                }
            }
        }

        info!(
            direction = %direction,
            identifier = prepared.session.identifier(),
            latency_ms = prepared.latency.map(|l| l.as_millis() as u64),
            "Transition"
        );
        for direction in Direction::ALL {
            self.spawn_preload(direction);
        }
        Ok(prepared)
    }

    /// Slides the cache window after a transition.
    ///
    /// When the current session is the oldest cached entry the window
    /// advances (eviction then refill); otherwise a cached copy of the current
    /// session is dropped and the window is only topped up, so unwatched
    /// entries survive backward swipes. `None` for feeds without a cache.
    pub async fn advance_cache_window(&self) -> Option<WindowReport> {
        let caching = self.inner.provider.general_caching()?;
        let cache = caching.cache();
        let source: &dyn IdentifierSource = &**caching.selection();
        let factory = self.inner.factory.as_ref();
        let token = self.inner.shutdown.child_token();

        let current = self.current().await;
        let at_front = match (&current, cache.peek().await) {
            (Some(current), Some(front)) => current.identifier() == front.identifier(),
            _ => false,
        };

        let report = if at_front {
            cache.advance_window(source, factory, &token).await
        } else {
            if let Some(current) = &current {
                if cache.remove(current.identifier()).await.is_some() {
                    debug!(identifier = current.identifier(), "Current session left the cache");
                }
            }
            cache.top_up(source, factory, &token).await
        };
        Some(report)
    }

    pub async fn buffer_indicator(&self, direction: Direction) -> BufferIndicator {
        let slot = self.slot(direction);
        if slot.is_ready() {
            return BufferIndicator::Ready;
        }
        if slot.has_session() {
            return BufferIndicator::CachedNotReady;
        }
        if direction == Direction::Next {
            if let Some(caching) = self.inner.provider.general_caching() {
                if caching.cache().count().await > 0 {
                    return BufferIndicator::CachedNotReady;
                }
            }
        }
        BufferIndicator::Empty
    }

    pub async fn current(&self) -> Option<Arc<Session>> {
        self.inner.history.lock().await.current()
    }

    /// Marks the current session as favorite and returns the timestamp.
    pub async fn favorite_current(&self) -> Option<DateTime<Utc>> {
        let current = self.current().await?;
        let now = Utc::now();
        current.set_favorited_at(Some(now));
        info!(identifier = current.identifier(), "Session added to favorites");
        Some(now)
    }

    /// Drops an unplayable session from the cache, the history and any slot
    /// holding it; affected directions are preloaded again.
    pub async fn report_content_failure(&self, identifier: &str) {
        warn!(identifier, "Content failure reported");
        self.inner.preloader.drop_content(identifier).await;

        for direction in Direction::ALL {
            let slot = self.slot(direction);
            if slot.holds(identifier) {
                slot.invalidate();
                if self.is_running() {
                    self.spawn_preload(direction);
                }
            }
        }
    }

    pub fn subscribe(&self, direction: Direction) -> watch::Receiver<Option<DirectionInfo>> {
        self.slot(direction).subscribe()
    }

    pub fn preload_latency(&self, direction: Direction) -> Option<Duration> {
        self.slot(direction).latency()
    }

    pub async fn history_len(&self) -> usize {
        self.inner.history.lock().await.len()
    }

    /// Stops every task and releases the prepared handles.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();

        let tasks: Vec<AbortHandle> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.inner.preloader.invalidate_all();
        info!(feed = self.inner.provider.name(), "Feed engine stopped");
    }
}
