//! # clipsource - Archive collaborators and session building for ClipFeed
//!
//! `clipsource` holds everything between an archive identifier and a
//! playable [`Session`]:
//!
//! - **Archive access**: the [`ArchiveClient`] trait (metadata, file listing,
//!   byte-range locators, duration estimates, random draws per collection)
//! - **Media**: [`MediaOpener`], [`MediaAsset`] and the [`Player`] /
//!   [`PlaybackHandle`] pair used to warm up buffers
//! - **Preferences**: a read-only [`PreferenceStore`] snapshot
//! - **Session building**: [`SessionBuilder`], cancellable at every step
//!
//! ## Quick Start
//!
//! ```no_run
//! use clipsource::memory::{MemoryArchive, SimulatedMediaOpener};
//! use clipsource::{MemoryPreferences, Preferences, SessionBuilder};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let archive = Arc::new(MemoryArchive::new());
//!     archive.insert_clip("duck_and_cover", "prelinger", 562.0);
//!
//!     let builder = SessionBuilder::new(
//!         archive,
//!         Arc::new(SimulatedMediaOpener::new()),
//!         Arc::new(MemoryPreferences::new(Preferences::new(["prelinger"], Vec::<String>::new()))),
//!     );
//!
//!     let session = builder.build("duck_and_cover", &CancellationToken::new()).await?;
//!     println!("{} starts at {:.1}s", session.title(), session.start_offset());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod media;
pub mod memory;
pub mod models;
pub mod preferences;
pub mod session;

pub use client::{ArchiveClient, FallbackPool, Weighting};
pub use error::{ErrorKind, FetchError, Result};
pub use media::{BufferStatus, MediaAsset, MediaOpener, OpenOptions, PlaybackHandle, Player};
pub use models::{FileRef, MediaFormat, Metadata};
pub use preferences::{MemoryPreferences, PreferenceStore, Preferences};
pub use session::{
    pick_start_offset, start_offset_window, IdentifierSource, Session, SessionBuilder,
    SessionFactory,
};
