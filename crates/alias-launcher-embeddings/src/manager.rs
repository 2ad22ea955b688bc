//! Process ownership root for the frozen model.
//!
//! Everything heavyweight (tokenizer, backbone weights, the soft-prompt
//! checkpoint) is loaded exactly once, here, and shared read-only through
//! `Arc` handles. There is no global: whoever needs the generator or the
//! encoder gets a reference from the manager the process constructed at
//! startup.
//!
//! Load failures are fatal by design: a missing model directory or
//! checkpoint leaves nothing sensible to run in.

use std::sync::Arc;

use candle_core::{DType, Device};
use tokenizers::Tokenizer;

use crate::backbone::Qwen2Backbone;
use crate::config::ModelConfig;
use crate::encoder::SentenceEncoder;
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::generator::AliasGenerator;
use crate::prompt_head::SoftPromptHead;

/// Owner of the shared frozen model and its consumers.
pub struct ModelManager {
    backbone: Arc<Qwen2Backbone>,
    tokenizer: Arc<Tokenizer>,
    generator: AliasGenerator,
    encoder: SentenceEncoder,
}

impl ModelManager {
    /// Load tokenizer, backbone, and soft-prompt checkpoint.
    ///
    /// Picks CUDA device 0 with f16 weights when available, CPU with f32
    /// otherwise. The soft-prompt head keeps f32 master parameters either
    /// way and re-aligns per call.
    pub fn load(config: &ModelConfig) -> EmbeddingResult<Self> {
        config.validate()?;

        let device = Device::cuda_if_available(0).map_err(|e| EmbeddingError::ModelLoad {
            message: format!("device init failed: {e}"),
        })?;
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        tracing::info!(cuda = device.is_cuda(), ?dtype, "model device selected");

        let tokenizer_path = config.base_model_dir.join("tokenizer.json");
        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| EmbeddingError::ModelLoad {
                message: format!("tokenizer load failed at {}: {e}", tokenizer_path.display()),
            })?;
        let tokenizer = Arc::new(tokenizer);

        let backbone = Arc::new(Qwen2Backbone::load(
            &config.base_model_dir,
            &device,
            dtype,
        )?);

        let head = SoftPromptHead::load(
            &config.adapter_path,
            config.num_virtual_tokens,
            config.num_attn_heads,
            &device,
        )?;
        if head.hidden_size() != backbone.hidden_size() {
            return Err(EmbeddingError::Config {
                message: format!(
                    "checkpoint hidden size {} does not match backbone hidden size {}",
                    head.hidden_size(),
                    backbone.hidden_size()
                ),
            });
        }

        let generator = AliasGenerator::new(
            Arc::clone(&backbone),
            Arc::clone(&tokenizer),
            head,
            config.max_new_tokens,
        );
        let encoder = SentenceEncoder::new(
            Arc::clone(&backbone),
            Arc::clone(&tokenizer),
            config.max_encode_tokens,
        );

        Ok(Self {
            backbone,
            tokenizer,
            generator,
            encoder,
        })
    }

    /// The alias extractor.
    pub fn generator(&self) -> &AliasGenerator {
        &self.generator
    }

    /// The sentence encoder.
    pub fn encoder(&self) -> &SentenceEncoder {
        &self.encoder
    }

    /// Shared backbone handle.
    pub fn backbone(&self) -> &Arc<Qwen2Backbone> {
        &self.backbone
    }

    /// Shared tokenizer handle.
    pub fn tokenizer(&self) -> &Arc<Tokenizer> {
        &self.tokenizer
    }
}
