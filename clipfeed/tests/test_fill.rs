use async_trait::async_trait;
use clipcache::CacheStore;
use clipfeed::config::FillConfig;
use clipfeed::{Arbiter, FeedError, FillOutcome, FillState, FillWorker};
use clipsource::memory::{MemoryArchive, SimulatedMediaOpener};
use clipsource::{FetchError, IdentifierSource, MemoryPreferences, SessionBuilder};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Hands out a fixed sequence of identifiers, cycling when exhausted.
struct ScriptedSource {
    script: Vec<String>,
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedSource {
    fn new(ids: &[&str]) -> Arc<Self> {
        let script: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        Arc::new(Self {
            queue: Mutex::new(script.iter().cloned().collect()),
            script,
        })
    }
}

#[async_trait]
impl IdentifierSource for ScriptedSource {
    async fn next_identifier(&self) -> clipsource::Result<String> {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            queue.extend(self.script.iter().cloned());
        }
        queue.pop_front().ok_or(FetchError::PoolExhausted)
    }
}

struct Fixture {
    archive: Arc<MemoryArchive>,
    builder: Arc<SessionBuilder>,
    cache: CacheStore,
    arbiter: Arbiter,
}

fn fixture() -> Fixture {
    let archive = Arc::new(MemoryArchive::new());
    for id in ["a", "b", "c", "d", "e"] {
        archive.insert_clip(id, "films", 300.0);
    }
    let builder = Arc::new(SessionBuilder::new(
        archive.clone(),
        Arc::new(SimulatedMediaOpener::new()),
        Arc::new(MemoryPreferences::default()),
    ));
    Fixture {
        archive,
        builder,
        cache: CacheStore::new(3),
        arbiter: Arbiter::new(Duration::from_secs(3)),
    }
}

impl Fixture {
    fn worker(&self, source: Arc<ScriptedSource>) -> FillWorker {
        FillWorker::new(
            self.cache.clone(),
            source,
            self.builder.clone(),
            self.arbiter.clone(),
            FillConfig::default(),
            CancellationToken::new(),
        )
    }
}

#[tokio::test]
async fn test_startup_fill_before_first_session() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "b", "c"]));

    // no background task until the first session is on screen
    assert!(worker.ensure_filled().await.is_none());
    assert_eq!(f.cache.count().await, 1);
    assert_eq!(f.cache.identifiers().await, vec!["a"]);
}

#[tokio::test]
async fn test_startup_fill_retries_three_times() {
    let f = fixture();
    f.archive.fail_identifier("broken1", FetchError::Timeout);
    f.archive.fail_identifier("broken2", FetchError::Network("reset".into()));
    let worker = f.worker(ScriptedSource::new(&["broken1", "broken2", "c"]));

    assert!(worker.ensure_filled().await.is_none());
    assert_eq!(f.cache.identifiers().await, vec!["c"]);
    assert_eq!(f.archive.metadata_calls(), 3);
}

#[tokio::test]
async fn test_startup_fill_gives_up() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["nope"]));

    assert!(worker.ensure_filled().await.is_none());
    assert!(f.cache.is_empty().await);
    assert_eq!(f.archive.metadata_calls(), 3);
}

#[tokio::test]
async fn test_background_fill_until_full() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "b", "c", "d"]));
    f.arbiter.set_first_session_ready();

    let task = worker.ensure_filled().await.expect("fill task spawned");
    assert_eq!(task.await.unwrap().unwrap(), FillOutcome::Full);
    assert_eq!(f.cache.identifiers().await, vec!["a", "b", "c"]);
    assert_eq!(worker.state(), FillState::Full);
    assert!(!f.arbiter.is_fill_running());

    // nothing left to do
    assert!(worker.ensure_filled().await.is_none());
}

#[tokio::test]
async fn test_duplicates_do_not_grow_the_cache() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "a", "b", "a", "c"]));
    f.arbiter.set_first_session_ready();

    let task = worker.ensure_filled().await.unwrap();
    assert_eq!(task.await.unwrap().unwrap(), FillOutcome::Full);
    assert_eq!(f.cache.identifiers().await, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_preload_started_mid_fetch_stops_fill() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "b", "c"]));
    f.arbiter.set_first_session_ready();
    f.archive.set_latency(Some(Duration::from_secs(1)));

    let task = worker.ensure_filled().await.unwrap();
    assert_eq!(f.cache.count().await, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(f.arbiter.is_fill_running());
    let ticket = f.arbiter.set_preload_started("next");

    let result = task.await.unwrap();
    assert!(matches!(result, Err(FeedError::PreloadInProgress)));
    assert_eq!(result.unwrap_err().to_string(), "preloading in progress");
    // the build in flight was dropped
    assert_eq!(f.cache.count().await, 1);
    assert_eq!(worker.state(), FillState::Blocked);

    f.arbiter.set_preload_complete(ticket);
    assert!(f.arbiter.can_fill());
}

#[tokio::test(start_paused = true)]
async fn test_no_fill_while_hard_block_held() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "b", "c"]));
    f.arbiter.set_first_session_ready();
    f.cache
        .append(Arc::new(
            f.builder
                .build("e", &CancellationToken::new())
                .await
                .unwrap(),
        ))
        .await
        .unwrap();

    let ticket = f.arbiter.set_preload_started("previous");
    for _ in 0..5 {
        assert!(worker.ensure_filled().await.is_none());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.cache.identifiers().await, vec!["e"]);
    }

    f.arbiter.set_preload_complete(ticket);
    let task = worker.ensure_filled().await.unwrap();
    assert_eq!(task.await.unwrap().unwrap(), FillOutcome::Full);
    assert_eq!(f.cache.count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_pause_after_consecutive_failures() {
    let f = fixture();
    f.archive.fail_identifier("bad", FetchError::Timeout);
    f.cache
        .append(Arc::new(
            f.builder
                .build("a", &CancellationToken::new())
                .await
                .unwrap(),
        ))
        .await
        .unwrap();
    let baseline = f.archive.metadata_calls();

    let worker = f.worker(ScriptedSource::new(&["bad"]));
    f.arbiter.set_first_session_ready();
    let task = worker.ensure_filled().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(f.archive.metadata_calls() - baseline, 5);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(f.archive.metadata_calls() - baseline, 10);

    // a preload interrupts the pause right away
    let _ticket = f.arbiter.set_preload_started("next");
    assert!(matches!(
        task.await.unwrap(),
        Err(FeedError::PreloadInProgress)
    ));
}

#[tokio::test]
async fn test_shutdown_stops_fill() {
    let f = fixture();
    let shutdown = CancellationToken::new();
    let worker = FillWorker::new(
        f.cache.clone(),
        ScriptedSource::new(&["a", "b", "c"]),
        f.builder.clone(),
        f.arbiter.clone(),
        FillConfig::default(),
        shutdown.clone(),
    );
    f.arbiter.set_first_session_ready();
    shutdown.cancel();

    assert!(worker.ensure_filled().await.is_none());
    assert!(f.cache.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_forced_release_resumes_fill() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "b", "c"]));
    f.arbiter.set_first_session_ready();
    f.cache
        .append(Arc::new(
            f.builder
                .build("e", &CancellationToken::new())
                .await
                .unwrap(),
        ))
        .await
        .unwrap();

    // a preload that never returns its ticket
    let _stuck = f.arbiter.set_preload_started("next");
    assert!(worker.ensure_filled().await.is_none());

    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(f.cache.count().await, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.arbiter.forced_releases(), 1);
    assert_eq!(f.cache.identifiers().await, vec!["e", "a", "b"]);
    assert_eq!(worker.state(), FillState::Full);
}

#[tokio::test]
async fn test_fill_driven_from_another_task() {
    let f = fixture();
    let worker = f.worker(ScriptedSource::new(&["a", "b", "c"]));
    f.arbiter.set_first_session_ready();

    let task = tokio::spawn(async move {
        let first = worker.ensure_filled().await;
        match first {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    });
    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Some(Ok(FillOutcome::Full))));
    assert_eq!(f.cache.count().await, 3);
}
