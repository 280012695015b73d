use clipsource::memory::{MemoryArchive, SimulatedMediaOpener};
use clipsource::{
    FetchError, FileRef, MediaFormat, MemoryPreferences, Metadata, OpenOptions, Preferences,
    SessionBuilder,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    archive: Arc<MemoryArchive>,
    opener: Arc<SimulatedMediaOpener>,
    preferences: Arc<MemoryPreferences>,
    builder: SessionBuilder,
}

fn fixture() -> Fixture {
    let archive = Arc::new(MemoryArchive::new());
    let opener = Arc::new(SimulatedMediaOpener::new());
    let preferences = Arc::new(MemoryPreferences::new(Preferences::new(
        ["prelinger"],
        Vec::<String>::new(),
    )));
    let builder = SessionBuilder::new(archive.clone(), opener.clone(), preferences.clone());
    Fixture {
        archive,
        opener,
        preferences,
        builder,
    }
}

fn item(identifier: &str, files: Vec<FileRef>) -> Metadata {
    let mut meta = Metadata::new(identifier);
    meta.title = format!("Item {identifier}");
    meta.collections = vec!["prelinger".to_string()];
    meta.files = files;
    meta
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_builds_longest_file() {
    let fx = fixture();
    fx.archive.insert_item(item(
        "reel",
        vec![
            FileRef::new("trailer.mp4", "h.264").with_length(60.0),
            FileRef::new("feature.mp4", "h.264").with_length(600.0),
            FileRef::new("poster.jpg", "JPEG"),
        ],
    ));

    let session = fx
        .builder
        .build("reel", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.identifier(), "reel");
    assert_eq!(session.collection(), "prelinger");
    assert_eq!(session.file_name(), "feature.mp4");
    assert_eq!(session.duration(), 600.0);
    assert_eq!(session.file_count(), 2);
    assert!(session.start_offset() >= 0.0 && session.start_offset() < 480.0);
    assert!(session.locator().as_str().ends_with("/reel/feature.mp4"));
}

#[tokio::test]
async fn test_equal_lengths_are_drawn_at_random() {
    let fx = fixture();
    fx.archive.insert_item(item(
        "twins",
        vec![
            FileRef::new("left.mp4", "h.264").with_length(300.2),
            FileRef::new("right.mp4", "h.264").with_length(299.9),
            FileRef::new("short.mp4", "h.264").with_length(100.0),
        ],
    ));

    let mut seen = HashSet::new();
    for _ in 0..60 {
        let session = fx
            .builder
            .build("twins", &CancellationToken::new())
            .await
            .unwrap();
        seen.insert(session.file_name().to_string());
    }

    assert!(seen.contains("left.mp4"));
    assert!(seen.contains("right.mp4"));
    assert!(!seen.contains("short.mp4"));
}

#[tokio::test]
async fn test_short_clip_starts_at_zero() {
    let fx = fixture();
    fx.archive.insert_clip("short", "prelinger", 50.0);

    let session = fx
        .builder
        .build("short", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.start_offset(), 0.0);
}

#[tokio::test]
async fn test_start_at_beginning_preference() {
    let fx = fixture();
    fx.archive.insert_clip("long", "prelinger", 3600.0);
    fx.preferences.update(|p| p.start_at_beginning = true);

    for _ in 0..5 {
        let session = fx
            .builder
            .build("long", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.start_offset(), 0.0);
    }
}

#[tokio::test]
async fn test_random_offset_leaves_enough_tail() {
    let fx = fixture();
    fx.archive.insert_clip("medium", "prelinger", 200.0);

    for _ in 0..20 {
        let session = fx
            .builder
            .build("medium", &CancellationToken::new())
            .await
            .unwrap();
        // 200 - max(40, 60) = 140
        assert!(session.start_offset() < 140.0);
        assert!(session.duration() - session.start_offset() >= 40.0);
    }
}

#[tokio::test]
async fn test_no_playable_file() {
    let fx = fixture();
    fx.archive.insert_item(item(
        "scans",
        vec![
            FileRef::new("page1.jpg", "JPEG"),
            FileRef::new("empty.mp4", "h.264").with_size(0),
        ],
    ));

    let err = fx
        .builder
        .build("scans", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NoPlayableFile(_)));
    assert!(err.is_structural());
    assert_eq!(fx.opener.opened(), 0);
}

#[tokio::test]
async fn test_unresolvable_locator_is_structural() {
    let fx = fixture();
    fx.archive.insert_clip("dark", "prelinger", 300.0);
    fx.archive.break_locator("dark");

    let err = fx
        .builder
        .build("dark", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_structural());
}

#[tokio::test]
async fn test_unsupported_media_is_content_failure() {
    let fx = fixture();
    fx.archive.insert_clip("odd", "prelinger", 300.0);
    fx.opener.mark_unsupported("odd");

    let err = fx
        .builder
        .build("odd", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_content_failure());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let fx = fixture();
    fx.archive.insert_clip("a", "prelinger", 300.0);

    let token = CancellationToken::new();
    token.cancel();
    let err = fx.builder.build("a", &token).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(fx.archive.metadata_calls(), 0);
    assert_eq!(fx.opener.live_handles(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_mid_build_leaks_nothing() {
    let fx = fixture();
    fx.archive.insert_clip("slow", "prelinger", 300.0);
    fx.archive.set_latency(Some(Duration::from_secs(2)));

    let token = CancellationToken::new();
    let builder = fx.builder.clone();
    let child = token.clone();
    let task = tokio::spawn(async move { builder.build("slow", &child).await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    token.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(FetchError::Cancelled(_))));
    assert_eq!(fx.archive.metadata_calls(), 1);
    assert_eq!(fx.opener.opened(), 0);
    assert_eq!(fx.opener.live_handles(), 0);
}

#[tokio::test]
async fn test_probe_failure_is_not_fatal() {
    let fx = fixture();
    fx.archive.insert_clip("broken_moov", "prelinger", 300.0);
    fx.opener.set_fail_probe(true);

    let session = fx
        .builder
        .build("broken_moov", &CancellationToken::new())
        .await
        .unwrap();
    settle().await;

    assert!(session.probed_duration().is_none());
    assert_eq!(session.duration(), 300.0);
}

#[tokio::test]
async fn test_probe_reports_duration() {
    let fx = fixture();
    fx.archive.insert_clip("a", "prelinger", 300.0);

    let session = fx
        .builder
        .build("a", &CancellationToken::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(session.probed_duration(), Some(120.0));
}

#[tokio::test]
async fn test_dropping_session_releases_asset() {
    let fx = fixture();
    fx.archive.insert_clip("a", "prelinger", 300.0);

    let session = fx
        .builder
        .build("a", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fx.opener.live_handles(), 1);

    drop(session);
    settle().await;
    assert_eq!(fx.opener.live_handles(), 0);
}

#[tokio::test]
async fn test_independent_sessions_for_same_identifier() {
    let fx = fixture();
    fx.archive.insert_clip("a", "prelinger", 900.0);

    let first = fx
        .builder
        .build("a", &CancellationToken::new())
        .await
        .unwrap();
    let second = fx
        .builder
        .build("a", &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(first.instance_id(), second.instance_id());
    assert_eq!(fx.opener.live_handles(), 2);
    for session in [&first, &second] {
        assert!(session.start_offset() < 720.0);
    }
}

#[tokio::test]
async fn test_open_options_follow_format() {
    let fx = fixture();
    fx.archive.insert_item(item(
        "theora",
        vec![FileRef::new("reel.ogv", "Ogg Video").with_length(300.0)],
    ));

    let session = fx
        .builder
        .build("theora", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.format(), MediaFormat::Ogg);
    assert_eq!(
        fx.opener.last_options(),
        Some(OpenOptions::for_format(MediaFormat::Ogg))
    );
}

#[tokio::test]
async fn test_favorite_timestamp() {
    let fx = fixture();
    fx.archive.insert_clip("a", "prelinger", 300.0);

    let session = fx
        .builder
        .build("a", &CancellationToken::new())
        .await
        .unwrap();
    assert!(session.favorited_at().is_none());

    let now = chrono::Utc::now();
    session.set_favorited_at(Some(now));
    assert_eq!(session.favorited_at(), Some(now));
}

#[tokio::test(start_paused = true)]
async fn test_age_follows_runtime_clock() {
    let fx = fixture();
    fx.archive.insert_clip("a", "prelinger", 300.0);

    let session = fx
        .builder
        .build("a", &CancellationToken::new())
        .await
        .unwrap();
    assert!(session.age() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(session.age() >= Duration::from_secs(90));
    assert!(session.age() < Duration::from_secs(91));
}
