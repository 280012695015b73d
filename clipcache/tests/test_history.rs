use clipcache::PlaybackHistory;
use clipsource::memory::{MemoryArchive, SimulatedMediaOpener};
use clipsource::{MemoryPreferences, Session, SessionBuilder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn sessions(ids: &[&str]) -> Vec<Arc<Session>> {
    let archive = Arc::new(MemoryArchive::new());
    for id in ids {
        archive.insert_clip(id, "films", 300.0);
    }
    let builder = SessionBuilder::new(
        archive,
        Arc::new(SimulatedMediaOpener::new()),
        Arc::new(MemoryPreferences::default()),
    );
    let mut out = Vec::new();
    for id in ids {
        out.push(Arc::new(
            builder.build(id, &CancellationToken::new()).await.unwrap(),
        ));
    }
    out
}

fn id(session: Option<Arc<Session>>) -> Option<String> {
    session.map(|s| s.identifier().to_string())
}

#[tokio::test]
async fn test_cursor_navigation() {
    let s = sessions(&["a", "b", "c"]).await;
    let mut history = PlaybackHistory::default();
    assert!(history.current().is_none());
    assert!(history.peek_previous().is_none());

    for session in &s {
        history.push(session.clone());
    }
    assert_eq!(id(history.current()), Some("c".into()));
    assert_eq!(id(history.peek_previous()), Some("b".into()));
    assert!(history.peek_next().is_none());
    assert!(history.is_at_end());

    assert_eq!(id(history.back()), Some("b".into()));
    assert_eq!(id(history.back()), Some("a".into()));
    assert!(history.back().is_none());
    assert_eq!(id(history.current()), Some("a".into()));
    assert_eq!(id(history.peek_next()), Some("b".into()));
    assert!(!history.is_at_end());

    assert_eq!(id(history.forward()), Some("b".into()));
    assert_eq!(id(history.forward()), Some("c".into()));
    assert!(history.forward().is_none());
}

#[tokio::test]
async fn test_push_discards_entries_ahead() {
    let s = sessions(&["a", "b", "c", "d"]).await;
    let mut history = PlaybackHistory::default();
    for session in &s[..3] {
        history.push(session.clone());
    }
    history.back();
    history.back();

    history.push(s[3].clone());
    assert_eq!(history.len(), 2);
    assert_eq!(id(history.current()), Some("d".into()));
    assert_eq!(id(history.peek_previous()), Some("a".into()));
}

#[tokio::test]
async fn test_bounded_length() {
    let s = sessions(&["a", "b", "c", "d", "e"]).await;
    let mut history = PlaybackHistory::new(3);
    for session in &s {
        history.push(session.clone());
    }

    assert_eq!(history.len(), 3);
    assert!(!history.contains("a"));
    assert!(!history.contains("b"));
    assert_eq!(id(history.current()), Some("e".into()));
    history.back();
    history.back();
    assert!(history.back().is_none());
    assert_eq!(id(history.current()), Some("c".into()));
}

#[tokio::test]
async fn test_remove_keeps_cursor_on_current() {
    let s = sessions(&["a", "b", "c", "d"]).await;
    let mut history = PlaybackHistory::default();
    for session in &s {
        history.push(session.clone());
    }
    history.back(); // current = c

    assert_eq!(history.remove("a"), 1);
    assert_eq!(id(history.current()), Some("c".into()));
    assert_eq!(id(history.peek_previous()), Some("b".into()));
    assert_eq!(id(history.peek_next()), Some("d".into()));

    // the current entry is never removed
    assert_eq!(history.remove("c"), 0);
    assert_eq!(history.remove("d"), 1);
    assert!(history.is_at_end());

    history.clear();
    assert!(history.is_empty());
    assert!(history.current().is_none());
}

#[tokio::test]
async fn test_push_behind_keeps_entries_ahead() {
    let s = sessions(&["a", "b", "p"]).await;
    let mut history = PlaybackHistory::default();
    history.push(s[0].clone());
    history.push(s[1].clone());
    history.back(); // current = a

    history.push_behind(s[2].clone());
    assert_eq!(id(history.current()), Some("p".into()));
    assert!(history.peek_previous().is_none());
    assert_eq!(id(history.forward()), Some("a".into()));
    assert_eq!(id(history.forward()), Some("b".into()));
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn test_push_behind_respects_bound() {
    let s = sessions(&["a", "b", "c", "d"]).await;

    // cursor on the last entry: the oldest entry expires
    let mut history = PlaybackHistory::new(2);
    history.push(s[0].clone());
    history.push(s[1].clone());
    history.push_behind(s[2].clone());
    assert_eq!(history.len(), 2);
    assert_eq!(id(history.current()), Some("c".into()));
    assert_eq!(id(history.peek_next()), Some("b".into()));
    assert!(!history.contains("a"));

    // cursor on the first entry: the farthest entry ahead expires
    assert!(history.back().is_none());
    history.push_behind(s[3].clone());
    assert_eq!(history.len(), 2);
    assert_eq!(id(history.current()), Some("d".into()));
    assert_eq!(id(history.peek_next()), Some("c".into()));
    assert!(!history.contains("b"));

    // empty history behaves like push
    let mut empty = PlaybackHistory::default();
    empty.push_behind(s[0].clone());
    assert_eq!(id(empty.current()), Some("a".into()));
}
