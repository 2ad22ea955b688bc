//! Alias matching for alias-launcher.
//!
//! Maintains the stacked matrix of alias vectors for every registered
//! application, answers deduplicated top-k similarity queries, and persists
//! the vectors across restarts in a flat binary cache.
//!
//! The cache is keyed by *position* in the application list. Mutations that
//! reorder or shrink that list must go through
//! [`MatchingEngine::invalidate_and_rebuild`] — see the module docs in
//! [`cache`] for why.

pub mod cache;
pub mod engine;
pub mod error;

pub use cache::EmbeddingCache;
pub use engine::MatchingEngine;
pub use error::{MatcherError, MatcherResult};
