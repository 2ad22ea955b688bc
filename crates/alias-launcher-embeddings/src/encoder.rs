//! Sentence encoder: one L2-normalized vector per input text.
//!
//! Runs the frozen backbone in encoder mode (final hidden states), mean-pools
//! over real token positions, and normalizes. This is the single embedding
//! primitive in the system — the match-index rows and every query vector go
//! through exactly this function, which is what makes inner-product scores
//! comparable to cosine similarity.

use std::sync::Arc;

use candle_core::{DType, Tensor};
use tokenizers::Tokenizer;

use alias_launcher_core::AliasEncoder;

use crate::backbone::Qwen2Backbone;
use crate::error::{tensor_err, EmbeddingError, EmbeddingResult};

/// Mean-pooling sentence encoder over the frozen backbone.
pub struct SentenceEncoder {
    backbone: Arc<Qwen2Backbone>,
    tokenizer: Arc<Tokenizer>,
    max_tokens: usize,
}

impl SentenceEncoder {
    /// Wire the encoder to the shared frozen model.
    pub fn new(backbone: Arc<Qwen2Backbone>, tokenizer: Arc<Tokenizer>, max_tokens: usize) -> Self {
        Self {
            backbone,
            tokenizer,
            max_tokens,
        }
    }

    /// Vector dimension (the backbone hidden size).
    pub fn dimension(&self) -> usize {
        self.backbone.hidden_size()
    }

    /// Encode a batch of texts into L2-normalized vectors.
    pub fn encode(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::Tokenization {
                message: format!("batch encode failed: {e}"),
            })?;

        // Pad to the longest row in the batch, truncated at max_tokens.
        let batch = encodings.len();
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens)
            .max(1);

        let mut all_ids: Vec<u32> = Vec::with_capacity(batch * max_len);
        let mut all_mask: Vec<f32> = Vec::with_capacity(batch * max_len);
        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);
            for i in 0..len {
                all_ids.push(ids[i]);
                all_mask.push(mask[i] as f32);
            }
            for _ in len..max_len {
                all_ids.push(0);
                all_mask.push(0.0);
            }
        }

        let device = self.backbone.device();
        let input_ids = Tensor::from_slice(&all_ids, (batch, max_len), device)
            .map_err(tensor_err("encoder input ids"))?;
        let mask = Tensor::from_slice(&all_mask, (batch, max_len), device)
            .and_then(|m| m.to_dtype(self.backbone.dtype()))
            .map_err(tensor_err("encoder mask"))?;

        let embeds = self.backbone.embed(&input_ids)?;
        let hidden = self.backbone.forward_embeds(&embeds, Some(&mask))?;

        let mut rows = masked_mean_pool(&hidden, &mask)?;
        l2_normalize_rows(&mut rows);
        Ok(rows)
    }
}

impl AliasEncoder for SentenceEncoder {
    type Error = EmbeddingError;

    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        SentenceEncoder::encode(self, texts)
    }
}

/// Mean-pool `[batch, seq, hidden]` over positions where `mask` is set.
///
/// A row with no real positions (all-zero mask) pools to the zero vector.
pub(crate) fn masked_mean_pool(hidden: &Tensor, mask: &Tensor) -> EmbeddingResult<Vec<Vec<f32>>> {
    let mask_expanded = mask
        .unsqueeze(2)
        .map_err(tensor_err("pool mask expand"))?;
    let summed = hidden
        .broadcast_mul(&mask_expanded)
        .and_then(|h| h.sum(1))
        .and_then(|h| h.to_dtype(DType::F32))
        .and_then(|h| h.to_vec2::<f32>())
        .map_err(tensor_err("pool sum"))?;
    let counts = mask
        .to_dtype(DType::F32)
        .and_then(|m| m.sum(1))
        .and_then(|m| m.to_vec1::<f32>())
        .map_err(tensor_err("pool counts"))?;

    Ok(summed
        .into_iter()
        .zip(counts)
        .map(|(row, count): (Vec<f32>, f32)| {
            let count = count.max(1.0);
            row.into_iter().map(|v| v / count).collect()
        })
        .collect())
}

/// L2-normalize each row in place; a zero row stays zero instead of
/// becoming NaN (the norm is treated as 1).
pub(crate) fn l2_normalize_rows(rows: &mut [Vec<f32>]) {
    for row in rows.iter_mut() {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
        let norm = if norm == 0.0 { 1.0 } else { norm };
        for v in row.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_masked_mean_pool_excludes_padding() {
        // batch=1, seq=3, hidden=2; last position is padding with junk.
        let hidden = Tensor::from_slice(
            &[1.0f32, 2.0, 3.0, 4.0, 100.0, 100.0],
            (1, 3, 2),
            &Device::Cpu,
        )
        .unwrap();
        let mask = Tensor::from_slice(&[1.0f32, 1.0, 0.0], (1, 3), &Device::Cpu).unwrap();

        let rows = masked_mean_pool(&hidden, &mask).unwrap();
        assert_eq!(rows, vec![vec![2.0, 3.0]]);
    }

    #[test]
    fn test_masked_mean_pool_all_padding_row_is_zero() {
        let hidden =
            Tensor::from_slice(&[5.0f32, 5.0, 5.0, 5.0], (1, 2, 2), &Device::Cpu).unwrap();
        let mask = Tensor::from_slice(&[0.0f32, 0.0], (1, 2), &Device::Cpu).unwrap();

        let rows = masked_mean_pool(&hidden, &mask).unwrap();
        assert_eq!(rows, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let mut rows = vec![vec![3.0, 4.0]];
        l2_normalize_rows(&mut rows);
        assert!((rows[0][0] - 0.6).abs() < 1e-6);
        assert!((rows[0][1] - 0.8).abs() < 1e-6);
        let norm: f32 = rows[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_stays_zero() {
        let mut rows = vec![vec![0.0, 0.0, 0.0]];
        l2_normalize_rows(&mut rows);
        assert_eq!(rows[0], vec![0.0, 0.0, 0.0]);
        assert!(rows[0].iter().all(|v| v.is_finite()));
    }
}
