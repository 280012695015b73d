//! Error types for the feed engine

use crate::preload::Direction;
use clipcache::CacheError;
use clipsource::FetchError;

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// Archive or session build failure
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Cache store rejected an entry
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A preload holds the hard block; background work must yield
    #[error("preloading in progress")]
    PreloadInProgress,

    /// The requested direction has no ready session
    #[error("No ready session for {0}")]
    NotReady(Direction),

    /// No first session could be built
    #[error("Could not build a first session after {0} attempts")]
    StartupFailed(usize),

    /// The preload did not reach readiness in time
    #[error("Preload timed out after {0:.1}s")]
    PreloadTimeout(f64),

    /// `start()` was not called, or the engine was shut down
    #[error("Feed engine is not running")]
    NotRunning,

    /// Selection pool persistence failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::PreloadTimeout(_) => true,
            _ => false,
        }
    }

    pub fn is_structural(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_structural(),
            Self::StartupFailed(_) => true,
            _ => false,
        }
    }

    pub fn is_content_failure(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_content_failure())
    }

    /// Cancellation observed by a build or a fill step.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_cancelled(),
            Self::PreloadInProgress => true,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(e: anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_follows_fetch_error() {
        let err: FeedError = FetchError::Timeout.into();
        assert!(err.is_transient());

        let err: FeedError = FetchError::UnsupportedMedia {
            identifier: "x".into(),
            reason: "bad".into(),
        }
        .into();
        assert!(err.is_content_failure());

        assert!(FeedError::PreloadInProgress.is_cancelled());
        assert_eq!(
            FeedError::PreloadInProgress.to_string(),
            "preloading in progress"
        );
    }
}
