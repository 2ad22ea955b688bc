//! Model pipeline for alias-launcher.
//!
//! A frozen Qwen2-style causal model, loaded once from local files, serves
//! two consumers:
//!
//! - **AliasGenerator**: a learned soft prompt ([`SoftPromptHead`])
//!   conditions the frozen model to extract a short alias phrase from a
//!   free-form command, and substring alignment ([`clean_alias`]) recovers
//!   a literal piece of the command from the generated text
//! - **SentenceEncoder**: mean-pooled, L2-normalized sentence vectors used
//!   for alias similarity
//!
//! The backbone is strictly read-only; the only trainable parameters in the
//! workspace live in the soft-prompt head, and the runtime never writes
//! them back.

pub mod backbone;
pub mod clean;
pub mod config;
pub mod encoder;
pub mod error;
pub mod generator;
pub mod manager;
pub mod prompt_head;

pub use backbone::{BackboneConfig, Qwen2Backbone};
pub use clean::clean_alias;
pub use config::ModelConfig;
pub use encoder::SentenceEncoder;
pub use error::{EmbeddingError, EmbeddingResult};
pub use generator::{AliasGenerator, ALIAS_MARKER, ALIAS_TEMPLATE, IGNORE_INDEX};
pub use manager::ModelManager;
pub use prompt_head::SoftPromptHead;
