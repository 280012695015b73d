//! # clipcache - Session window and playback history
//!
//! - [`CacheStore`]: bounded FIFO of prepared sessions with unique
//!   identifiers, shared between the fill worker and the preload pipeline
//! - [`PlaybackHistory`]: the sessions already shown, with a cursor

pub mod error;
pub mod history;
pub mod store;

pub use error::{CacheError, Result};
pub use history::PlaybackHistory;
pub use store::{CacheStore, WindowReport};
