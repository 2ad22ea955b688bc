//! Error type for the matching engine and its cache.

use thiserror::Error;

/// Result alias for matcher operations.
pub type MatcherResult<T> = Result<T, MatcherError>;

/// Errors raised while building or querying the match index.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The sentence encoder failed while resolving a vector.
    #[error("alias encoding failed: {source}")]
    Encode {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The encoder returned fewer rows than inputs.
    #[error("encoder returned {got} vectors for {expected} inputs")]
    EncoderShape { expected: usize, got: usize },

    /// Writing the cache file failed. (Reads never fail — a bad file loads
    /// as an empty cache.)
    #[error("cache write failed at {path}: {source}")]
    CacheIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
