//! Model pipeline configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, EmbeddingResult};

fn default_num_virtual_tokens() -> usize {
    32
}

fn default_num_attn_heads() -> usize {
    8
}

fn default_max_new_tokens() -> usize {
    8
}

fn default_max_encode_tokens() -> usize {
    64
}

/// Configuration for the frozen backbone and the soft-prompt head.
///
/// The head hyperparameters must match the checkpoint being loaded — they
/// are shape parameters, not tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding `config.json`, `tokenizer.json`, and the
    /// safetensors weights of the frozen base model.
    pub base_model_dir: PathBuf,

    /// Safetensors checkpoint of the trained soft-prompt head.
    pub adapter_path: PathBuf,

    /// Number of learned virtual prompt vectors.
    /// Default: 32
    #[serde(default = "default_num_virtual_tokens")]
    pub num_virtual_tokens: usize,

    /// Heads of the cross-attention in the soft-prompt head.
    /// Default: 8
    #[serde(default = "default_num_attn_heads")]
    pub num_attn_heads: usize,

    /// Token budget for alias generation (greedy, single beam).
    /// Default: 8
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Truncation length for sentence encoding.
    /// Default: 64
    #[serde(default = "default_max_encode_tokens")]
    pub max_encode_tokens: usize,
}

impl ModelConfig {
    /// Point the config at a model directory with the conventional
    /// `adapter/prompt_head.safetensors` checkpoint next to it.
    pub fn for_model_dir(base_model_dir: impl Into<PathBuf>) -> Self {
        let base_model_dir = base_model_dir.into();
        let adapter_path = base_model_dir.join("adapter").join("prompt_head.safetensors");
        Self {
            base_model_dir,
            adapter_path,
            num_virtual_tokens: default_num_virtual_tokens(),
            num_attn_heads: default_num_attn_heads(),
            max_new_tokens: default_max_new_tokens(),
            max_encode_tokens: default_max_encode_tokens(),
        }
    }

    /// Fail fast on shapes that cannot work.
    pub fn validate(&self) -> EmbeddingResult<()> {
        if self.num_virtual_tokens == 0 {
            return Err(EmbeddingError::Config {
                message: "num_virtual_tokens cannot be zero".to_string(),
            });
        }
        if self.num_attn_heads == 0 {
            return Err(EmbeddingError::Config {
                message: "num_attn_heads cannot be zero".to_string(),
            });
        }
        if self.max_new_tokens == 0 {
            return Err(EmbeddingError::Config {
                message: "max_new_tokens cannot be zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_training_setup() {
        let config = ModelConfig::for_model_dir("/models/qwen");
        assert_eq!(config.num_virtual_tokens, 32);
        assert_eq!(config.num_attn_heads, 8);
        assert_eq!(config.max_new_tokens, 8);
        assert_eq!(config.max_encode_tokens, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_virtual_tokens_rejected() {
        let mut config = ModelConfig::for_model_dir("/models/qwen");
        config.num_virtual_tokens = 0;
        assert!(config.validate().is_err());
    }
}
