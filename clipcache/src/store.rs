//! CacheStore : fenêtre FIFO bornée de sessions prêtes à jouer
//!
//! The store keeps up to `capacity` sessions, oldest first. All readers and
//! mutators go through one async mutex, and no two entries ever share an
//! identifier. [`CacheStore::advance_window`] slides the window by one entry
//! and tops it up, [`CacheStore::top_up`] only refills; both are serialized
//! against each other.

use crate::error::{CacheError, Result};
use clipsource::{IdentifierSource, Session, SessionFactory};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of cached sessions.
pub const DEFAULT_CAPACITY: usize = 3;
/// Default ceiling on draws during one window advance.
pub const DEFAULT_MAX_ATTEMPTS: usize = 20;

/// What one [`CacheStore::advance_window`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowReport {
    /// Duplicate entries dropped before advancing.
    pub duplicates_removed: usize,
    /// Identifier of the entry evicted from the front.
    pub evicted: Option<String>,
    /// Entries missing after eviction.
    pub needed: usize,
    pub added: usize,
    /// Identifiers drawn (including skipped and failed ones).
    pub attempts: usize,
}

impl WindowReport {
    pub fn is_short(&self) -> bool {
        self.added < self.needed
    }
}

struct Inner {
    capacity: usize,
    max_attempts: usize,
    entries: Mutex<VecDeque<Arc<Session>>>,
    advance: Mutex<()>,
}

/// Shared handle on the session window.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_max_attempts(capacity, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(capacity: usize, max_attempts: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity.max(1),
                max_attempts: max_attempts.max(1),
                entries: Mutex::new(VecDeque::with_capacity(capacity)),
                advance: Mutex::new(()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn max_attempts(&self) -> usize {
        self.inner.max_attempts
    }

    /// Oldest entry, left in place.
    pub async fn peek(&self) -> Option<Arc<Session>> {
        self.inner.entries.lock().await.front().cloned()
    }

    /// Removes and returns the oldest entry.
    pub async fn pop(&self) -> Option<Arc<Session>> {
        let session = self.inner.entries.lock().await.pop_front();
        if let Some(s) = &session {
            debug!(identifier = s.identifier(), "Session popped from cache");
        }
        session
    }

    /// Appends `session` at the back and returns the new count.
    ///
    /// Fails without touching the store when the identifier is already
    /// cached or the window is full.
    pub async fn append(&self, session: Arc<Session>) -> Result<usize> {
        let mut entries = self.inner.entries.lock().await;
        if entries
            .iter()
            .any(|s| s.identifier() == session.identifier())
        {
            return Err(CacheError::Duplicate(session.identifier().to_string()));
        }
        if entries.len() >= self.inner.capacity {
            return Err(CacheError::Full(self.inner.capacity));
        }
        debug!(
            identifier = session.identifier(),
            position = entries.len(),
            "Session cached"
        );
        entries.push_back(session);
        Ok(entries.len())
    }

    /// Removes the entry for `identifier`, wherever it is.
    pub async fn remove(&self, identifier: &str) -> Option<Arc<Session>> {
        let mut entries = self.inner.entries.lock().await;
        let index = entries.iter().position(|s| s.identifier() == identifier)?;
        entries.remove(index)
    }

    pub async fn count(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.count().await == 0
    }

    pub async fn is_full(&self) -> bool {
        self.count().await >= self.inner.capacity
    }

    pub async fn contains(&self, identifier: &str) -> bool {
        self.inner
            .entries
            .lock()
            .await
            .iter()
            .any(|s| s.identifier() == identifier)
    }

    /// Cached identifiers, oldest first.
    pub async fn identifiers(&self) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .await
            .iter()
            .map(|s| s.identifier().to_string())
            .collect()
    }

    /// Drops every entry whose identifier already appeared earlier.
    pub async fn deduplicate(&self) -> usize {
        let mut entries = self.inner.entries.lock().await;
        dedup_entries(&mut entries)
    }

    /// Cached sessions, oldest first.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.entries.lock().await.iter().cloned().collect()
    }

    /// Slides the window: dedup, evict the oldest entry, then refill.
    ///
    /// Builds run outside the store lock; `cancel` aborts the refill loop.
    pub async fn advance_window(
        &self,
        source: &dyn IdentifierSource,
        factory: &dyn SessionFactory,
        cancel: &CancellationToken,
    ) -> WindowReport {
        let _serial = self.inner.advance.lock().await;
        let mut report = WindowReport::default();

        {
            let mut entries = self.inner.entries.lock().await;
            report.duplicates_removed = dedup_entries(&mut entries);
            report.evicted = entries.pop_front().map(|s| s.identifier().to_string());
            report.needed = self.inner.capacity.saturating_sub(entries.len());
        }
        if let Some(evicted) = &report.evicted {
            debug!(identifier = %evicted, "Evicted oldest cached session");
        }

        self.refill(&mut report, source, factory, cancel).await;
        report
    }

    /// Refills the window up to capacity without evicting anything.
    pub async fn top_up(
        &self,
        source: &dyn IdentifierSource,
        factory: &dyn SessionFactory,
        cancel: &CancellationToken,
    ) -> WindowReport {
        let _serial = self.inner.advance.lock().await;
        let mut report = WindowReport::default();

        {
            let mut entries = self.inner.entries.lock().await;
            report.duplicates_removed = dedup_entries(&mut entries);
            report.needed = self.inner.capacity.saturating_sub(entries.len());
        }

        self.refill(&mut report, source, factory, cancel).await;
        report
    }

    async fn refill(
        &self,
        report: &mut WindowReport,
        source: &dyn IdentifierSource,
        factory: &dyn SessionFactory,
        cancel: &CancellationToken,
    ) {
        while report.added < report.needed && report.attempts < self.inner.max_attempts {
            if cancel.is_cancelled() {
                debug!("Window refill cancelled");
                break;
            }
            report.attempts += 1;

            let identifier = match source.next_identifier().await {
                Ok(id) => id,
                Err(e) => {
                    warn!("Window refill: no identifier: {}", e);
                    continue;
                }
            };
            if self.contains(&identifier).await {
                debug!(identifier = %identifier, "Duplicate draw skipped");
                continue;
            }

            let session = match factory.build(&identifier, cancel).await {
                Ok(session) => Arc::new(session),
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!(identifier = %identifier, "Window refill build failed: {}", e);
                    continue;
                }
            };

            match self.append(session).await {
                Ok(_) => report.added += 1,
                Err(CacheError::Duplicate(id)) => {
                    debug!(identifier = %id, "Built session already cached, dropped");
                }
                Err(CacheError::Full(_)) => {
                    debug!("Cache filled concurrently, stopping refill");
                    break;
                }
            }
        }

        if report.is_short() && !self.is_full().await {
            warn!(
                "Window advance could only add {} of {} sessions",
                report.added, report.needed
            );
        } else if report.needed > 0 {
            info!(
                added = report.added,
                attempts = report.attempts,
                "Cache window advanced"
            );
        }
    }
}

fn dedup_entries(entries: &mut VecDeque<Arc<Session>>) -> usize {
    let mut seen = HashSet::new();
    let before = entries.len();
    entries.retain(|s| {
        if seen.insert(s.identifier().to_string()) {
            true
        } else {
            warn!(identifier = s.identifier(), "Duplicate cache entry dropped");
            false
        }
    });
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsource::memory::{MemoryArchive, SimulatedMediaOpener};
    use clipsource::{MemoryPreferences, SessionBuilder};

    async fn session(builder: &SessionBuilder, identifier: &str) -> Arc<Session> {
        Arc::new(
            builder
                .build(identifier, &CancellationToken::new())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_dedup_keeps_first_occurrence() {
        let archive = Arc::new(MemoryArchive::new());
        for id in ["a", "b"] {
            archive.insert_clip(id, "films", 300.0);
        }
        let builder = SessionBuilder::new(
            archive,
            Arc::new(SimulatedMediaOpener::new()),
            Arc::new(MemoryPreferences::default()),
        );

        let store = CacheStore::new(3);
        let first_a = session(&builder, "a").await;
        {
            // append() refuses duplicates, so corrupt the window by hand
            let mut entries = store.inner.entries.lock().await;
            entries.push_back(first_a.clone());
            entries.push_back(session(&builder, "b").await);
            entries.push_back(session(&builder, "a").await);
        }

        assert_eq!(store.deduplicate().await, 1);
        assert_eq!(store.identifiers().await, vec!["a", "b"]);
        let head = store.peek().await.unwrap();
        assert_eq!(head.instance_id(), first_a.instance_id());
    }
}
