//! Frozen causal language model.
//!
//! The backbone is a Qwen2-style decoder loaded read-only from a local model
//! directory. Nothing in here is trainable — every weight is a plain tensor,
//! never a `Var`, so no optimizer can ever touch it.
//!
//! Two consumers share it:
//! - the alias generator drives `forward_embeds` + `logits` to decode
//! - the sentence encoder mean-pools the `forward_embeds` hidden states

mod config;
mod model;

pub use config::BackboneConfig;
pub use model::Qwen2Backbone;
