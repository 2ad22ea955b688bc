//! Error type for configuration and record handling.

use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the config store and record validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Reading or writing the apps file failed.
    #[error("config I/O failed at {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Serializing the apps file failed.
    #[error("config serialization failed: {source}")]
    ConfigSerialize {
        #[source]
        source: serde_json::Error,
    },

    /// An index-based operation referenced a row that does not exist.
    #[error("application index {index} out of range (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
}
