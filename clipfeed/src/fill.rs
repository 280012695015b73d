//! Background fill worker.
//!
//! Keeps the cache window topped up between transitions. The worker yields to
//! preloads: it only starts once the first session is on screen and every
//! preload has settled, and it stops with [`FeedError::PreloadInProgress`] as
//! soon as the arbiter cancels its token.

use crate::arbiter::Arbiter;
use crate::config::FillConfig;
use crate::error::{FeedError, Result};
use clipcache::{CacheError, CacheStore};
use clipsource::{IdentifierSource, SessionFactory};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Idle,
    Filling,
    Full,
    /// Stopped because a preload took the hard block.
    Blocked,
}

impl fmt::Display for FillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Filling => "filling",
            Self::Full => "full",
            Self::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

/// How a fill task ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The window reached capacity.
    Full,
    /// The engine is shutting down.
    Stopped,
}

struct Inner {
    cache: CacheStore,
    source: Arc<dyn IdentifierSource>,
    factory: Arc<dyn SessionFactory>,
    arbiter: Arbiter,
    config: FillConfig,
    state: Mutex<FillState>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct FillWorker {
    inner: Arc<Inner>,
}

impl FillWorker {
    pub fn new(
        cache: CacheStore,
        source: Arc<dyn IdentifierSource>,
        factory: Arc<dyn SessionFactory>,
        arbiter: Arbiter,
        config: FillConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let worker = Self {
            inner: Arc::new(Inner {
                cache,
                source,
                factory,
                arbiter,
                config,
                state: Mutex::new(FillState::Idle),
                shutdown,
            }),
        };

        // weak: the arbiter must not keep the worker alive
        let weak: Weak<Inner> = Arc::downgrade(&worker.inner);
        worker.inner.arbiter.set_resume_hook(Arc::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let worker = FillWorker { inner };
            debug!("Hard block force-released, resuming background fill");
            tokio::spawn(async move {
                worker.ensure_filled().await;
            });
        }));
        worker
    }

    pub fn state(&self) -> FillState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: FillState) {
        let mut current = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            debug!(from = %*current, to = %state, "Fill state changed");
            *current = state;
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Makes sure the cache holds something, then starts a background fill
    /// when the arbiter allows it.
    ///
    /// An empty cache gets up to `startup_attempts` synchronous builds first.
    /// Returns the handle of the spawned task, `None` when no task was
    /// started.
    pub async fn ensure_filled(&self) -> Option<JoinHandle<Result<FillOutcome>>> {
        if self.inner.shutdown.is_cancelled() {
            return None;
        }

        if self.inner.cache.is_empty().await {
            self.fill_startup().await;
        }

        if !self.inner.arbiter.can_fill() {
            debug!(arbiter = ?self.inner.arbiter.snapshot(), "Background fill not allowed yet");
            return None;
        }
        if self.inner.cache.is_full().await {
            self.set_state(FillState::Full);
            return None;
        }

        let token = self.inner.shutdown.child_token();
        let Some(fill_id) = self.inner.arbiter.register_fill(token.clone()) else {
            debug!("Background fill already running or blocked");
            return None;
        };

        self.set_state(FillState::Filling);
        let worker = self.clone();
        Some(tokio::spawn(async move {
            let result = worker.run(&token).await;
            worker.inner.arbiter.clear_fill(fill_id);
            match &result {
                Ok(FillOutcome::Full) => worker.set_state(FillState::Full),
                Ok(FillOutcome::Stopped) => worker.set_state(FillState::Idle),
                Err(e) if e.is_cancelled() => worker.set_state(FillState::Blocked),
                Err(_) => worker.set_state(FillState::Idle),
            }
            result
        }))
    }

    /// Synchronous builds used while the cache is empty.
    ///
    /// Before the first session is on screen nothing can preload, afterwards
    /// these builds yield to the hard block like the background task.
    async fn fill_startup(&self) -> bool {
        let attempts = self.inner.config.startup_attempts.max(1);
        let token = self.inner.shutdown.child_token();
        let yield_to_preload = self.inner.arbiter.is_first_session_ready();

        for attempt in 1..=attempts {
            match self.build_one(&token, yield_to_preload).await {
                Ok(count) => {
                    info!(attempt, count, "Startup fill cached a session");
                    return true;
                }
                Err(e) if e.is_cancelled() => return false,
                Err(e) => {
                    warn!(attempt, attempts, "Startup fill attempt failed: {}", e);
                }
            }
        }
        warn!("Startup fill gave up after {} attempts", attempts);
        false
    }

    async fn run(&self, token: &CancellationToken) -> Result<FillOutcome> {
        let mut failures = 0usize;
        let count = self.inner.cache.count().await;
        info!(count, "Background fill started");

        loop {
            if self.inner.shutdown.is_cancelled() {
                return Ok(FillOutcome::Stopped);
            }
            if token.is_cancelled() || self.inner.arbiter.is_preload_in_progress() {
                info!("Background fill stopped: preloading in progress");
                return Err(FeedError::PreloadInProgress);
            }
            if self.inner.cache.is_full().await {
                let count = self.inner.cache.count().await;
                info!(count, "Cache full");
                return Ok(FillOutcome::Full);
            }

            match self.build_one(token, true).await {
                Ok(count) => {
                    failures = 0;
                    debug!(count, "Background fill cached a session");
                }
                // the loop head reports why
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    failures += 1;
                    warn!(failures, "Background fill step failed: {}", e);
                    if failures >= self.inner.config.failure_threshold.max(1) {
                        warn!(
                            "{} consecutive fill failures, pausing {:?}",
                            failures,
                            self.inner.config.failure_pause()
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.inner.config.failure_pause()) => {}
                            _ = token.cancelled() => {}
                        }
                        failures = 0;
                    }
                }
            }
        }
    }

    /// Draws, builds and appends one session; returns the new cache count.
    ///
    /// With `yield_to_preload` the hard block is checked once more before
    /// the append so a preload started mid-build never sees the store move.
    async fn build_one(
        &self,
        token: &CancellationToken,
        yield_to_preload: bool,
    ) -> Result<usize> {
        let blocked = |token: &CancellationToken| {
            token.is_cancelled()
                || (yield_to_preload && self.inner.arbiter.is_preload_in_progress())
        };

        if blocked(token) {
            return Err(FeedError::PreloadInProgress);
        }
        let identifier = self.inner.source.next_identifier().await?;
        if blocked(token) {
            return Err(FeedError::PreloadInProgress);
        }
        if self.inner.cache.contains(&identifier).await {
            return Err(CacheError::Duplicate(identifier).into());
        }

        let session = self.inner.factory.build(&identifier, token).await?;

        if blocked(token) {
            debug!(identifier = %identifier, "Built session discarded, preload in progress");
            return Err(FeedError::PreloadInProgress);
        }
        Ok(self.inner.cache.append(Arc::new(session)).await?)
    }
}
