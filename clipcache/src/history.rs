//! Historique de lecture avec curseur
//!
//! Sessions the user already watched, oldest first, with a cursor on the one
//! currently shown. Swiping back moves the cursor behind; swiping forward
//! replays entries ahead of the cursor before new sessions are pushed.

use clipsource::Session;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MAX_SESSIONS: usize = 20;

#[derive(Debug)]
pub struct PlaybackHistory {
    entries: VecDeque<Arc<Session>>,
    cursor: Option<usize>,
    max_sessions: usize,
}

impl Default for PlaybackHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl PlaybackHistory {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: None,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.cursor.and_then(|i| self.entries.get(i)).cloned()
    }

    /// Entry right before the cursor.
    pub fn peek_previous(&self) -> Option<Arc<Session>> {
        let cursor = self.cursor?;
        cursor.checked_sub(1).and_then(|i| self.entries.get(i)).cloned()
    }

    /// Entry right after the cursor, if the user swiped back before.
    pub fn peek_next(&self) -> Option<Arc<Session>> {
        let cursor = self.cursor?;
        self.entries.get(cursor + 1).cloned()
    }

    /// True when no entry lies ahead of the cursor.
    pub fn is_at_end(&self) -> bool {
        match self.cursor {
            Some(cursor) => cursor + 1 >= self.entries.len(),
            None => true,
        }
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.iter().any(|s| s.identifier() == identifier)
    }

    /// Makes `session` the current entry.
    ///
    /// Entries ahead of the cursor are discarded; the oldest entries go once
    /// the history exceeds its bound.
    pub fn push(&mut self, session: Arc<Session>) {
        if let Some(cursor) = self.cursor {
            self.entries.truncate(cursor + 1);
        }
        self.entries.push_back(session);
        while self.entries.len() > self.max_sessions {
            if let Some(old) = self.entries.pop_front() {
                debug!(identifier = old.identifier(), "History entry expired");
            }
        }
        self.cursor = Some(self.entries.len() - 1);
    }

    /// Makes `session` the current entry, right behind the previous current.
    ///
    /// Used when swiping back lands on a session the user never watched.
    /// Entries ahead of the cursor are kept; once the bound is exceeded the
    /// entry farthest from the cursor goes.
    pub fn push_behind(&mut self, session: Arc<Session>) {
        let Some(cursor) = self.cursor else {
            self.push(session);
            return;
        };
        self.entries.insert(cursor, session);
        let mut cursor = cursor;
        while self.entries.len() > self.max_sessions {
            let expired = if cursor > 0 {
                cursor -= 1;
                self.entries.pop_front()
            } else {
                self.entries.pop_back()
            };
            if let Some(old) = expired {
                debug!(identifier = old.identifier(), "History entry expired");
            }
        }
        self.cursor = Some(cursor);
    }

    /// Moves the cursor one entry back and returns the new current session.
    pub fn back(&mut self) -> Option<Arc<Session>> {
        let previous = self.cursor?.checked_sub(1)?;
        self.cursor = Some(previous);
        self.current()
    }

    /// Moves the cursor one entry forward and returns the new current session.
    pub fn forward(&mut self) -> Option<Arc<Session>> {
        let next = self.cursor? + 1;
        if next >= self.entries.len() {
            return None;
        }
        self.cursor = Some(next);
        self.current()
    }

    /// Drops every entry of `identifier` except the current one.
    pub fn remove(&mut self, identifier: &str) -> usize {
        let current = self.cursor;
        let before = self.entries.len();
        let mut index = 0;
        let mut new_cursor = current;
        self.entries.retain(|s| {
            let keep = Some(index) == current || s.identifier() != identifier;
            if !keep {
                if let Some(c) = new_cursor {
                    if index < current.unwrap_or(0) {
                        new_cursor = Some(c - 1);
                    }
                }
            }
            index += 1;
            keep
        });
        self.cursor = new_cursor;
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}
