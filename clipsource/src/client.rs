//! Archive client interface.
//!
//! The remote archive is an external collaborator: the engine only needs
//! metadata lookup, file listing, locator resolution, duration estimates and
//! random identifier draws inside a collection. Concrete HTTP clients live
//! outside this workspace; [`crate::memory::MemoryArchive`] implements the
//! trait for tests and simulations.

use crate::error::{FetchError, Result};
use crate::models::{FileRef, Metadata};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use url::Url;

/// How a random identifier is drawn inside a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weighting {
    /// Every identifier of the collection is equally likely.
    #[default]
    Uniform,
    /// Popular items are favoured (archive-side download counts).
    Popularity,
}

/// Operations consumed from the remote archive.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    async fn fetch_metadata(&self, identifier: &str) -> Result<Metadata>;

    /// Files of the item the player may be able to stream.
    async fn list_playable_files(&self, metadata: &Metadata) -> Result<Vec<FileRef>> {
        Ok(metadata
            .files
            .iter()
            .filter(|f| f.is_playable())
            .cloned()
            .collect())
    }

    /// Byte-range capable URL for one file of an item.
    async fn resolve_locator(&self, file: &FileRef, identifier: &str) -> Result<Url>;

    /// Estimated duration in seconds.
    async fn estimate_duration(&self, file: &FileRef) -> Result<f64> {
        file.length_seconds()
            .ok_or_else(|| FetchError::other(format!("no length for {}", file.name)))
    }

    async fn select_random_identifier(
        &self,
        collection: &str,
        weighting: Weighting,
    ) -> Result<String>;
}

/// Unweighted pool over the full identifier list, used when selection by
/// collection is impossible.
#[derive(Debug, Clone, Default)]
pub struct FallbackPool {
    identifiers: Vec<String>,
}

impl FallbackPool {
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn random(&self) -> Option<String> {
        self.identifiers.choose(&mut rand::rng()).cloned()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}
