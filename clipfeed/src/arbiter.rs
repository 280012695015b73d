//! Arbitrage entre préchargement et remplissage
//!
//! Preload always wins, fill always yields. Every preload takes a ticket;
//! while at least one ticket is held the hard block is set and any running
//! fill task is cancelled. When the last ticket is returned the arbiter is
//! "settled" and the fill worker may run again.
//!
//! A watchdog returns tickets that were held longer than the configured delay
//! so a stuck preload cannot starve the cache forever. When such a forced
//! release settles the arbiter, the resume hook (installed by the fill worker)
//! restarts the background fill.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Proof that a preload holds the hard block.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a ticket must be returned with set_preload_complete"]
pub struct PreloadTicket {
    id: u64,
    label: &'static str,
}

impl PreloadTicket {
    pub fn label(&self) -> &'static str {
        self.label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterSnapshot {
    pub first_session_ready: bool,
    pub preload_in_progress: bool,
    pub preload_settled: bool,
    pub active_tickets: usize,
    pub fill_running: bool,
}

#[derive(Debug, Default)]
struct State {
    first_session_ready: bool,
    settled: bool,
    tickets: HashMap<u64, (&'static str, Instant)>,
    next_ticket: u64,
    fill: Option<(u64, CancellationToken)>,
    next_fill: u64,
    forced_releases: u64,
}

/// Called after a forced release settled the arbiter.
pub type ResumeHook = Arc<dyn Fn() + Send + Sync>;

struct Inner {
    watchdog: Duration,
    state: Mutex<State>,
    resume: Mutex<Option<ResumeHook>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes a ticket.
    ///
    /// `None` when the ticket was already gone, otherwise whether it was the
    /// last one. Forced releases are only counted when the ticket was still
    /// held.
    fn release(&self, id: u64, forced: bool) -> Option<bool> {
        let mut state = self.state();
        state.tickets.remove(&id)?;
        if forced {
            state.forced_releases += 1;
        }
        if state.tickets.is_empty() {
            state.settled = true;
            Some(true)
        } else {
            Some(false)
        }
    }

    fn resume_hook(&self) -> Option<ResumeHook> {
        self.resume
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<Inner>,
}

impl Arbiter {
    pub fn new(watchdog: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                watchdog,
                state: Mutex::new(State {
                    settled: true,
                    ..State::default()
                }),
                resume: Mutex::new(None),
            }),
        }
    }

    /// Installs the callback run when the watchdog settles the arbiter.
    pub fn set_resume_hook(&self, hook: ResumeHook) {
        *self
            .inner
            .resume
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub fn set_first_session_ready(&self) {
        self.inner.state().first_session_ready = true;
    }

    pub fn is_first_session_ready(&self) -> bool {
        self.inner.state().first_session_ready
    }

    /// Sets the hard block and cancels the running fill task, if any.
    pub fn set_preload_started(&self, label: &'static str) -> PreloadTicket {
        let (id, fill) = {
            let mut state = self.inner.state();
            let id = state.next_ticket;
            state.next_ticket += 1;
            state.tickets.insert(id, (label, Instant::now()));
            state.settled = false;
            (id, state.fill.take())
        };

        if let Some((_, token)) = fill {
            debug!(preload = label, "Cancelling background fill");
            token.cancel();
        }
        self.spawn_watchdog(id, label);
        debug!(preload = label, ticket = id, "Preload started");
        PreloadTicket { id, label }
    }

    /// Returns a ticket. The hard block is lifted once no ticket remains.
    ///
    /// Returns true when this call settled the arbiter.
    pub fn set_preload_complete(&self, ticket: PreloadTicket) -> bool {
        let settled = self.inner.release(ticket.id, false).unwrap_or(false);
        debug!(preload = ticket.label, ticket = ticket.id, settled, "Preload complete");
        settled
    }

    pub fn is_preload_in_progress(&self) -> bool {
        !self.inner.state().tickets.is_empty()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.state().settled
    }

    /// First session ready, nothing preloading, previous preloads settled.
    pub fn can_fill(&self) -> bool {
        let state = self.inner.state();
        state.first_session_ready && state.settled && state.tickets.is_empty()
    }

    /// Registers the cancellation token of a new fill task.
    ///
    /// Refused while the hard block is set or another fill task is running.
    pub fn register_fill(&self, token: CancellationToken) -> Option<u64> {
        let mut state = self.inner.state();
        if !state.tickets.is_empty() {
            return None;
        }
        if let Some((_, running)) = &state.fill {
            if !running.is_cancelled() {
                return None;
            }
        }
        let id = state.next_fill;
        state.next_fill += 1;
        state.fill = Some((id, token));
        Some(id)
    }

    /// Forgets the fill token registered as `id` once its task ended.
    pub fn clear_fill(&self, id: u64) {
        let mut state = self.inner.state();
        if state.fill.as_ref().is_some_and(|(current, _)| *current == id) {
            state.fill = None;
        }
    }

    pub fn is_fill_running(&self) -> bool {
        self.inner
            .state()
            .fill
            .as_ref()
            .is_some_and(|(_, t)| !t.is_cancelled())
    }

    /// Tickets removed by the watchdog so far.
    pub fn forced_releases(&self) -> u64 {
        self.inner.state().forced_releases
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        let state = self.inner.state();
        ArbiterSnapshot {
            first_session_ready: state.first_session_ready,
            preload_in_progress: !state.tickets.is_empty(),
            preload_settled: state.settled,
            active_tickets: state.tickets.len(),
            fill_running: state.fill.as_ref().is_some_and(|(_, t)| !t.is_cancelled()),
        }
    }

    fn spawn_watchdog(&self, id: u64, label: &'static str) {
        if self.inner.watchdog.is_zero() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = self.inner.watchdog;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let held = inner.state().tickets.get(&id).map(|(_, at)| at.elapsed());
            let Some(held) = held else {
                return;
            };
            let Some(settled) = inner.release(id, true) else {
                // returned in the meantime
                return;
            };
            warn!(
                preload = label,
                ticket = id,
                held_ms = held.as_millis() as u64,
                "Preload ticket held too long, releasing hard block"
            );
            if settled {
                if let Some(hook) = inner.resume_hook() {
                    hook();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hard_block_lifecycle() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        assert!(!arbiter.can_fill());
        arbiter.set_first_session_ready();
        assert!(arbiter.can_fill());

        let ticket = arbiter.set_preload_started("next");
        assert!(arbiter.is_preload_in_progress());
        assert!(!arbiter.is_settled());
        assert!(!arbiter.can_fill());

        assert!(arbiter.set_preload_complete(ticket));
        assert!(!arbiter.is_preload_in_progress());
        assert!(arbiter.is_settled());
        assert!(arbiter.can_fill());
    }

    #[tokio::test]
    async fn test_concurrent_tickets() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        arbiter.set_first_session_ready();

        let next = arbiter.set_preload_started("next");
        let previous = arbiter.set_preload_started("previous");
        assert_eq!(arbiter.snapshot().active_tickets, 2);

        assert!(!arbiter.set_preload_complete(next));
        assert!(arbiter.is_preload_in_progress());
        assert!(!arbiter.can_fill());

        assert!(arbiter.set_preload_complete(previous));
        assert!(arbiter.can_fill());
    }

    #[tokio::test]
    async fn test_preload_cancels_fill() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        arbiter.set_first_session_ready();

        let token = CancellationToken::new();
        let id = arbiter.register_fill(token.clone()).unwrap();
        assert!(arbiter.is_fill_running());
        // only one fill task at a time
        assert!(arbiter.register_fill(CancellationToken::new()).is_none());

        let ticket = arbiter.set_preload_started("next");
        assert!(token.is_cancelled());
        assert!(!arbiter.is_fill_running());
        assert!(arbiter.register_fill(CancellationToken::new()).is_none());

        arbiter.set_preload_complete(ticket);
        arbiter.clear_fill(id);
        assert!(arbiter.register_fill(CancellationToken::new()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_releases_stale_ticket() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        arbiter.set_first_session_ready();

        let ticket = arbiter.set_preload_started("next");
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(arbiter.is_preload_in_progress());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!arbiter.is_preload_in_progress());
        assert!(arbiter.can_fill());
        assert_eq!(arbiter.forced_releases(), 1);

        // late completion is a no-op
        assert!(!arbiter.set_preload_complete(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_runs_resume_hook_once_settled() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        let resumed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&resumed);
        arbiter.set_resume_hook(Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));

        let _next = arbiter.set_preload_started("next");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let _previous = arbiter.set_preload_started("previous");

        // first release leaves the other ticket in place
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(arbiter.forced_releases(), 1);
        assert_eq!(resumed.load(std::sync::atomic::Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(arbiter.forced_releases(), 2);
        assert!(arbiter.is_settled());
        assert_eq!(resumed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_ticket_is_not_counted_as_forced() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        let ticket = arbiter.set_preload_started("next");
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(arbiter.set_preload_complete(ticket));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(arbiter.forced_releases(), 0);
        assert!(arbiter.inner.release(0, true).is_none());
        assert_eq!(arbiter.forced_releases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_ignores_returned_ticket() {
        let arbiter = Arbiter::new(Duration::from_secs(3));
        let ticket = arbiter.set_preload_started("previous");
        arbiter.set_preload_complete(ticket);

        let second = arbiter.set_preload_started("next");
        tokio::time::sleep(Duration::from_millis(3100)).await;
        // only the ticket still held is force-released
        assert_eq!(arbiter.forced_releases(), 1);
        assert!(!arbiter.set_preload_complete(second));
    }
}
