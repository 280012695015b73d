//! # clipfeed - Cache and preload coordination for a swipeable clip feed
//!
//! The engine keeps the next and previous clips of a feed prepared so a swipe
//! lands on a playing video without a loading screen:
//!
//! - [`SelectionPool`]: round-robin draws over collections and pinned
//!   identifiers, persisted across restarts
//! - [`FillWorker`]: keeps the cache window full while nothing is preloading
//! - [`Preloader`]: one muted, paused, buffered handle per direction
//! - [`Arbiter`]: preload always wins, fill always yields
//! - [`FeedEngine`]: the surface the transition controller calls
//!
//! ## Quick Start
//!
//! ```no_run
//! use clipcache::CacheStore;
//! use clipfeed::{FeedConfig, FeedEngine, MainFeed, MemoryPoolStore, SelectionPool};
//! use clipsource::memory::{MemoryArchive, SimulatedMediaOpener, SimulatedPlayer};
//! use clipsource::{MemoryPreferences, Preferences, SessionBuilder};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     clipfeed::init_logging();
//!
//!     let archive = Arc::new(MemoryArchive::new());
//!     archive.insert_clip("duck_and_cover", "prelinger", 562.0);
//!     archive.insert_clip("a_is_for_atom", "prelinger", 840.0);
//!     let prefs = Arc::new(MemoryPreferences::new(Preferences::new(
//!         ["prelinger"],
//!         Vec::<String>::new(),
//!     )));
//!
//!     let selection = Arc::new(SelectionPool::new(
//!         archive.clone(),
//!         prefs.clone(),
//!         Arc::new(MemoryPoolStore::new()),
//!     ));
//!     let builder = Arc::new(SessionBuilder::new(
//!         archive,
//!         Arc::new(SimulatedMediaOpener::new()),
//!         prefs,
//!     ));
//!     let engine = FeedEngine::new(
//!         Arc::new(MainFeed::new(CacheStore::new(3), selection)),
//!         builder,
//!         Arc::new(SimulatedPlayer::new()),
//!         FeedConfig::default(),
//!     );
//!
//!     let first = engine.start().await?;
//!     println!("Now playing {}", first.title());
//!     Ok(())
//! }
//! ```

pub mod arbiter;
pub mod config;
pub mod config_ext;
pub mod engine;
pub mod error;
pub mod fill;
pub mod logging;
pub mod persistence;
pub mod preload;
pub mod provider;
pub mod selection;

pub use arbiter::{Arbiter, ArbiterSnapshot, PreloadTicket, ResumeHook};
pub use config::FeedConfig;
pub use config_ext::FeedConfigExt;
pub use engine::FeedEngine;
pub use error::{FeedError, Result};
pub use fill::{FillOutcome, FillState, FillWorker};
pub use logging::{init_logging, init_logging_with, LoggingOptions};
pub use persistence::{pool_store_from_path, MemoryPoolStore, PoolStore, SqlitePoolStore};
pub use preload::{
    BufferIndicator, Direction, DirectionInfo, PreloadSlot, PreparedSession, Preloader,
};
pub use provider::{FeedProvider, HasBoundedHistory, ListFeed, MainFeed, SupportsGeneralCaching};
pub use selection::{PoolKey, PoolStats, SelectionPool};
