//! Alias extraction: soft-prompted greedy decoding over the frozen backbone.
//!
//! The pipeline for one command:
//!
//! 1. render the instruction template and tokenize it
//! 2. embed the tokens, let the soft-prompt head attend over them, and
//!    splice the contextual prompt in front of the sentence embeddings
//! 3. greedy-decode a handful of tokens (no sampling, single beam, fixed
//!    budget — worst-case latency is bounded by construction)
//! 4. take the text after the alias marker and align it against the
//!    original command ([`clean_alias`])
//!
//! Backbone failures are caught here and surfaced as
//! [`EmbeddingError::Generation`]; the caller treats that as "no alias", not
//! as a crash.

use std::sync::Arc;

use candle_core::Tensor;
use tokenizers::Tokenizer;

use crate::backbone::Qwen2Backbone;
use crate::clean::clean_alias;
use crate::error::{tensor_err, EmbeddingError, EmbeddingResult};
use crate::prompt_head::SoftPromptHead;

/// Instruction template the soft prompt was trained against.
pub const ALIAS_TEMPLATE: &str = "instruction: {}\ncorresponding alias: ";

/// Marker separating the echoed template from the generated alias.
pub const ALIAS_MARKER: &str = "corresponding alias:";

/// Label sentinel excluded from the loss by a trainer.
pub const IGNORE_INDEX: i64 = -100;

/// Render the instruction template for one command.
pub fn render_template(input_text: &str) -> String {
    ALIAS_TEMPLATE.replacen("{}", input_text, 1)
}

/// Prefix a label row with `num_virtual_tokens` ignore entries so the
/// prompt positions never contribute to the loss. Inference never calls
/// this; it exists for the training harness that shares this module.
pub fn prefix_ignore_labels(labels: &[i64], num_virtual_tokens: usize) -> Vec<i64> {
    let mut full = vec![IGNORE_INDEX; num_virtual_tokens];
    full.extend_from_slice(labels);
    full
}

/// Everything after the last alias marker, or the whole text when the
/// marker never made it into the decoded output.
pub fn text_after_marker(decoded: &str) -> &str {
    match decoded.rfind(ALIAS_MARKER) {
        Some(pos) => &decoded[pos + ALIAS_MARKER.len()..],
        None => decoded,
    }
}

/// Soft-prompted alias extractor.
pub struct AliasGenerator {
    backbone: Arc<Qwen2Backbone>,
    tokenizer: Arc<Tokenizer>,
    head: SoftPromptHead,
    max_new_tokens: usize,
    eos_token_id: Option<u32>,
}

impl AliasGenerator {
    /// Wire the generator to the shared frozen model and its trained head.
    pub fn new(
        backbone: Arc<Qwen2Backbone>,
        tokenizer: Arc<Tokenizer>,
        head: SoftPromptHead,
        max_new_tokens: usize,
    ) -> Self {
        let eos_token_id = backbone
            .eos_token_id()
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"));
        Self {
            backbone,
            tokenizer,
            head,
            max_new_tokens,
            eos_token_id,
        }
    }

    /// The head, for checkpoint inspection.
    pub fn head(&self) -> &SoftPromptHead {
        &self.head
    }

    /// Extract a cleaned alias from a free-form command.
    ///
    /// Returns an empty string when the model produced nothing that
    /// literally occurs in `input_text`.
    pub fn extract_alias(&self, input_text: &str) -> EmbeddingResult<String> {
        let input_text = input_text.trim();
        if input_text.is_empty() {
            return Ok(String::new());
        }

        let decoded = self
            .generate(input_text)
            .map_err(|e| EmbeddingError::Generation {
                message: format!("alias generation for {input_text:?} failed: {e}"),
            })?;

        let alias = clean_alias(text_after_marker(&decoded), input_text);
        tracing::debug!(input = input_text, alias = %alias, "alias extracted");
        Ok(alias)
    }

    /// Assemble the prefixed embeddings and greedy-decode the continuation.
    fn generate(&self, input_text: &str) -> EmbeddingResult<String> {
        let prompt = render_template(input_text);
        let encoding =
            self.tokenizer
                .encode(prompt.as_str(), true)
                .map_err(|e| EmbeddingError::Tokenization {
                    message: format!("encode failed: {e}"),
                })?;
        let ids: Vec<u32> = encoding.get_ids().to_vec();
        if ids.is_empty() {
            return Ok(String::new());
        }

        let device = self.backbone.device();
        let input_ids =
            Tensor::from_slice(&ids, (1, ids.len()), device).map_err(tensor_err("input ids"))?;
        let sentence_embeds = self.backbone.embed(&input_ids)?;

        // Contextual prompt in front, mask implicitly all-ones: the template
        // is a single unpadded sequence and the prompt positions are always
        // real.
        let contextual = self.head.condition(&sentence_embeds, None)?;
        let mut full_embeds = Tensor::cat(&[&contextual, &sentence_embeds], 1)
            .map_err(tensor_err("prefix concat"))?;

        let mut generated: Vec<u32> = Vec::with_capacity(self.max_new_tokens);
        for _ in 0..self.max_new_tokens {
            let hidden = self.backbone.forward_embeds(&full_embeds, None)?;
            let seq_len = hidden.dim(1).map_err(tensor_err("hidden seq dim"))?;
            let last = hidden
                .narrow(1, seq_len - 1, 1)
                .and_then(|t| t.squeeze(1))
                .map_err(tensor_err("last hidden"))?;
            let logits = self.backbone.logits(&last)?;
            let next = argmax_token(&logits)?;

            if Some(next) == self.eos_token_id {
                break;
            }
            generated.push(next);

            let next_ids =
                Tensor::from_slice(&[next], (1, 1), device).map_err(tensor_err("next id"))?;
            let next_embed = self.backbone.embed(&next_ids)?;
            full_embeds = Tensor::cat(&[&full_embeds, &next_embed], 1)
                .map_err(tensor_err("step concat"))?;
        }

        self.tokenizer
            .decode(&generated, true)
            .map_err(|e| EmbeddingError::Tokenization {
                message: format!("decode failed: {e}"),
            })
    }
}

/// Greedy pick over `[1, vocab]` logits.
fn argmax_token(logits: &Tensor) -> EmbeddingResult<u32> {
    let values: Vec<f32> = logits
        .to_dtype(candle_core::DType::F32)
        .and_then(|l| l.flatten_all())
        .and_then(|l| l.to_vec1())
        .map_err(tensor_err("logits to host"))?;

    let mut best_idx = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (i, v) in values.iter().copied().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    Ok(best_idx as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_render() {
        assert_eq!(
            render_template("open kakao talk"),
            "instruction: open kakao talk\ncorresponding alias: "
        );
    }

    #[test]
    fn test_text_after_marker_splits_on_last_occurrence() {
        let decoded = "instruction: x\ncorresponding alias: 微信";
        assert_eq!(text_after_marker(decoded), " 微信");
    }

    #[test]
    fn test_text_after_marker_missing_marker() {
        assert_eq!(text_after_marker("just an alias"), "just an alias");
    }

    #[test]
    fn test_prefix_ignore_labels() {
        let labels = vec![IGNORE_INDEX, 15, 42];
        let full = prefix_ignore_labels(&labels, 4);
        assert_eq!(full.len(), 7);
        assert!(full[..4].iter().all(|&l| l == IGNORE_INDEX));
        assert_eq!(&full[4..], &labels[..]);
    }
}
