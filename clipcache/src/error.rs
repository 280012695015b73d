//! Error types for the cache store

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// An entry with the same identifier is already cached
    #[error("Identifier already cached: {0}")]
    Duplicate(String),

    /// The window already holds `capacity` entries
    #[error("Cache is full (capacity {0})")]
    Full(usize),
}
