//! Error type for the model pipeline.
//!
//! # Error Categories
//!
//! | Category | Variants | Recovery |
//! |----------|----------|----------|
//! | Startup | ModelLoad, Checkpoint, Config | Fatal, fix paths/config |
//! | Request | Tokenization, Generation | Recoverable, caller treats as "no alias" |
//! | Tensor | Tensor | Bug or device trouble; propagated with context |
//!
//! Startup errors are raised once, while the ownership root is constructed;
//! nothing runs in a degraded mode. Request errors never take the process
//! down; the alias generator catches backbone failures at its boundary.

use thiserror::Error;

/// Result alias for the model pipeline.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Errors raised while loading or running the frozen model and its head.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Loading the base model (config, tokenizer, weights) failed.
    #[error("model load failed: {message}")]
    ModelLoad { message: String },

    /// Loading the soft-prompt checkpoint failed.
    #[error("soft-prompt checkpoint error: {message}")]
    Checkpoint { message: String },

    /// Invalid model configuration.
    #[error("model config error: {message}")]
    Config { message: String },

    /// Tokenizer encode/decode failed.
    #[error("tokenization error: {message}")]
    Tokenization { message: String },

    /// The frozen model raised during generation.
    #[error("generation failed: {message}")]
    Generation { message: String },

    /// A tensor operation failed.
    #[error("tensor error: {message}")]
    Tensor { message: String },
}

/// Map candle errors into [`EmbeddingError::Tensor`] with a site label.
pub(crate) fn tensor_err(site: &str) -> impl Fn(candle_core::Error) -> EmbeddingError + '_ {
    move |e| EmbeddingError::Tensor {
        message: format!("{site}: {e}"),
    }
}
