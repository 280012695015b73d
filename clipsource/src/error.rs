//! Error types for archive fetches and session building

/// Result type alias for source operations
pub type Result<T> = std::result::Result<T, FetchError>;

/// How the rest of the engine should react to a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup or timeout; retry with backoff.
    Transient,
    /// Nothing usable behind the identifier or the pool; fall back to another source.
    Structural,
    /// The media itself is broken or unsupported; drop it and skip forward.
    Content,
    /// The caller asked the build to stop.
    Cancelled,
}

/// Errors that can occur while talking to the archive or preparing a session
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Network failure while talking to the archive
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Identifier unknown to the archive
    #[error("Identifier not found: {0}")]
    NotFound(String),

    /// Item has no file the player can handle
    #[error("No playable file for {0}")]
    NoPlayableFile(String),

    /// The archive could not produce a byte-range locator
    #[error("Unresolvable locator for {identifier}/{file}: {reason}")]
    UnresolvableLocator {
        identifier: String,
        file: String,
        reason: String,
    },

    /// The locator answered with an error status
    #[error("Content unavailable for {identifier} (HTTP {status})")]
    ContentUnavailable { identifier: String, status: u16 },

    /// The media could not be parsed or is not supported
    #[error("Unsupported media for {identifier}: {reason}")]
    UnsupportedMedia { identifier: String, reason: String },

    /// Duration/metadata probe failed
    #[error("Duration probe failed: {0}")]
    ProbeFailed(String),

    /// No collection, pinned identifier or fallback left to draw from
    #[error("Selection pool exhausted")]
    PoolExhausted,

    /// The build observed its cancellation token
    #[error("Build cancelled at {0}")]
    Cancelled(&'static str),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout | Self::ProbeFailed(_) | Self::Other(_) => {
                ErrorKind::Transient
            }
            Self::ContentUnavailable { status, .. } => {
                if *status == 429 || *status >= 500 {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Content
                }
            }
            Self::UnsupportedMedia { .. } => ErrorKind::Content,
            Self::NotFound(_)
            | Self::NoPlayableFile(_)
            | Self::UnresolvableLocator { .. }
            | Self::PoolExhausted => ErrorKind::Structural,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }

    /// Content failures are permanent: retrying wastes the preload budget.
    pub fn is_content_failure(&self) -> bool {
        self.kind() == ErrorKind::Content
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
