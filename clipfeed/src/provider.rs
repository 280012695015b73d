//! Feed providers and their capabilities.
//!
//! The engine never asks "which kind of feed is this"; it asks what the feed
//! can do. The main feed supports general caching (a cache window refilled
//! from the selection pool); favorites or search results expose a bounded,
//! ordered identifier list with a position instead.

use crate::config::CacheConfig;
use crate::preload::Direction;
use crate::selection::SelectionPool;
use clipcache::CacheStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Feed backed by a cache window and the selection pool.
pub trait SupportsGeneralCaching: Send + Sync {
    fn cache(&self) -> &CacheStore;
    fn selection(&self) -> &Arc<SelectionPool>;
}

/// Feed over a finite, ordered list of identifiers.
pub trait HasBoundedHistory: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn identifier_at(&self, index: usize) -> Option<String>;

    fn position(&self) -> usize;

    fn set_position(&self, index: usize);

    /// Identifier `1 + skip` entries away from the position.
    fn neighbour(&self, direction: Direction, skip: usize) -> Option<String> {
        let position = self.position();
        let index = match direction {
            Direction::Next => position.checked_add(1 + skip)?,
            Direction::Previous => position.checked_sub(1 + skip)?,
        };
        self.identifier_at(index)
    }

    /// Index of `identifier`, searched from the position towards `direction`.
    fn locate(&self, direction: Direction, identifier: &str) -> Option<usize> {
        let position = self.position();
        let matches = |i: &usize| self.identifier_at(*i).as_deref() == Some(identifier);
        match direction {
            Direction::Next => (position + 1..self.len()).find(matches),
            Direction::Previous => (0..position).rev().find(matches),
        }
    }

    /// Moves the position one step, returns false at either end.
    fn step(&self, direction: Direction) -> bool {
        let position = self.position();
        let target = match direction {
            Direction::Next => position + 1,
            Direction::Previous => match position.checked_sub(1) {
                Some(p) => p,
                None => return false,
            },
        };
        if target >= self.len() {
            return false;
        }
        self.set_position(target);
        true
    }
}

pub trait FeedProvider: Send + Sync {
    fn name(&self) -> &str;

    fn general_caching(&self) -> Option<&dyn SupportsGeneralCaching> {
        None
    }

    fn bounded_history(&self) -> Option<&dyn HasBoundedHistory> {
        None
    }
}

/// The endless main feed.
pub struct MainFeed {
    cache: CacheStore,
    selection: Arc<SelectionPool>,
}

impl MainFeed {
    pub fn new(cache: CacheStore, selection: Arc<SelectionPool>) -> Self {
        Self { cache, selection }
    }

    /// Sizes the cache window from the `feed.cache` block.
    pub fn from_config(config: &CacheConfig, selection: Arc<SelectionPool>) -> Self {
        Self::new(
            CacheStore::with_max_attempts(config.capacity, config.max_fill_attempts),
            selection,
        )
    }
}

impl SupportsGeneralCaching for MainFeed {
    fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn selection(&self) -> &Arc<SelectionPool> {
        &self.selection
    }
}

impl FeedProvider for MainFeed {
    fn name(&self) -> &str {
        "main"
    }

    fn general_caching(&self) -> Option<&dyn SupportsGeneralCaching> {
        Some(self)
    }
}

/// Favorites, search results or any other finite list.
pub struct ListFeed {
    name: String,
    identifiers: Vec<String>,
    position: AtomicUsize,
}

impl ListFeed {
    pub fn new<I, S>(name: impl Into<String>, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            position: AtomicUsize::new(0),
        }
    }

    /// Starts the feed at `index` instead of the first entry.
    pub fn starting_at(self, index: usize) -> Self {
        self.position
            .store(index.min(self.identifiers.len().saturating_sub(1)), Ordering::SeqCst);
        self
    }
}

impl HasBoundedHistory for ListFeed {
    fn len(&self) -> usize {
        self.identifiers.len()
    }

    fn identifier_at(&self, index: usize) -> Option<String> {
        self.identifiers.get(index).cloned()
    }

    fn position(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }

    fn set_position(&self, index: usize) {
        self.position.store(index, Ordering::SeqCst);
    }
}

impl FeedProvider for ListFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn bounded_history(&self) -> Option<&dyn HasBoundedHistory> {
        Some(self)
    }
}
