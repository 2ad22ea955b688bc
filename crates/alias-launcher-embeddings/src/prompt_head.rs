//! Learned soft-prompt head over a frozen backbone.
//!
//! The head owns the only trainable parameters in the system:
//!
//! - `P` virtual prompt vectors `[P, hidden]`
//! - a multi-head cross-attention block (prompt as query, sentence
//!   embeddings as key/value)
//! - a two-layer ReLU feed-forward transform
//! - a LayerNorm
//!
//! `condition()` turns the static virtual prompt into a context-dependent
//! prefix for one request. The backbone contributes nothing here beyond its
//! embedding output. Its weights are never registered as `Var`s, so an
//! optimizer built from [`trainable_vars`](SoftPromptHead::trainable_vars)
//! can only ever update the head.
//!
//! # Checkpoint format
//!
//! A single safetensors file with f32 tensors named
//! `prompt.embeddings`, `attn.{q,k,v,out}_proj.{weight,bias}`,
//! `ffn.{fc1,fc2}.{weight,bias}`, `norm.{weight,bias}`, matching the
//! exporter on the training side.
//!
//! # Numeric policy
//!
//! Master copies are f32. The backbone may run f16 on CUDA and f32 on CPU,
//! so every call re-aligns the working copies to the dtype and device of the
//! incoming sentence embeddings before any tensor meets another.

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var, D};
use safetensors::SafeTensors;

use crate::error::{tensor_err, EmbeddingError, EmbeddingResult};

const LAYER_NORM_EPS: f64 = 1e-5;

/// A linear layer kept as raw parameters so it can be recast per call.
struct HeadLinear {
    weight: Var,
    bias: Var,
}

impl HeadLinear {
    /// `weight` is `[out, in]` (PyTorch layout), applied as `x @ Wᵀ + b`.
    fn forward(&self, x: &Tensor, device: &Device, dtype: DType) -> EmbeddingResult<Tensor> {
        let weight = align(self.weight.as_tensor(), device, dtype)?;
        let bias = align(self.bias.as_tensor(), device, dtype)?;
        x.broadcast_matmul(&weight.t().map_err(tensor_err("head linear transpose"))?)
            .and_then(|y| y.broadcast_add(&bias))
            .map_err(tensor_err("head linear"))
    }
}

/// Context-conditioned soft prompt generator.
pub struct SoftPromptHead {
    prompt_embeddings: Var,
    q_proj: HeadLinear,
    k_proj: HeadLinear,
    v_proj: HeadLinear,
    out_proj: HeadLinear,
    fc1: HeadLinear,
    fc2: HeadLinear,
    norm_weight: Var,
    norm_bias: Var,
    num_virtual_tokens: usize,
    num_heads: usize,
    hidden_size: usize,
}

impl SoftPromptHead {
    /// Load the trained head from a safetensors checkpoint.
    ///
    /// Shapes are validated against `(num_virtual_tokens, num_heads)` and
    /// the hidden size found in the checkpoint; a mismatch means the config
    /// does not describe this checkpoint and is fatal.
    pub fn load(
        path: &Path,
        num_virtual_tokens: usize,
        num_heads: usize,
        device: &Device,
    ) -> EmbeddingResult<Self> {
        let data = std::fs::read(path).map_err(|e| EmbeddingError::Checkpoint {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let tensors = SafeTensors::deserialize(&data).map_err(|e| EmbeddingError::Checkpoint {
            message: format!("cannot parse {}: {e}", path.display()),
        })?;

        let load_var = |name: &str| -> EmbeddingResult<Var> {
            let view = tensors.tensor(name).map_err(|e| EmbeddingError::Checkpoint {
                message: format!("missing tensor '{name}': {e}"),
            })?;
            let shape: Vec<usize> = view.shape().to_vec();
            let floats: &[f32] = bytemuck::cast_slice(view.data());
            let tensor = Tensor::from_slice(floats, shape, device)
                .map_err(tensor_err("checkpoint tensor"))?;
            Var::from_tensor(&tensor).map_err(tensor_err("checkpoint var"))
        };
        let load_linear = |name: &str| -> EmbeddingResult<HeadLinear> {
            Ok(HeadLinear {
                weight: load_var(&format!("{name}.weight"))?,
                bias: load_var(&format!("{name}.bias"))?,
            })
        };

        let prompt_embeddings = load_var("prompt.embeddings")?;
        let dims = prompt_embeddings.as_tensor().dims().to_vec();
        if dims.len() != 2 || dims[0] != num_virtual_tokens {
            return Err(EmbeddingError::Checkpoint {
                message: format!(
                    "prompt.embeddings has shape {dims:?}, expected [{num_virtual_tokens}, hidden]"
                ),
            });
        }
        let hidden_size = dims[1];
        if hidden_size % num_heads != 0 {
            return Err(EmbeddingError::Checkpoint {
                message: format!("hidden size {hidden_size} not divisible by {num_heads} heads"),
            });
        }

        let head = Self {
            prompt_embeddings,
            q_proj: load_linear("attn.q_proj")?,
            k_proj: load_linear("attn.k_proj")?,
            v_proj: load_linear("attn.v_proj")?,
            out_proj: load_linear("attn.out_proj")?,
            fc1: load_linear("ffn.fc1")?,
            fc2: load_linear("ffn.fc2")?,
            norm_weight: load_var("norm.weight")?,
            norm_bias: load_var("norm.bias")?,
            num_virtual_tokens,
            num_heads,
            hidden_size,
        };

        tracing::info!(
            virtual_tokens = num_virtual_tokens,
            heads = num_heads,
            hidden_size,
            params = head.num_params(),
            "soft-prompt head loaded"
        );
        Ok(head)
    }

    /// Number of virtual prompt vectors.
    pub fn num_virtual_tokens(&self) -> usize {
        self.num_virtual_tokens
    }

    /// Hidden size the checkpoint was trained for.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// The parameters a trainer may register, and nothing else.
    pub fn trainable_vars(&self) -> Vec<&Var> {
        vec![
            &self.prompt_embeddings,
            &self.q_proj.weight,
            &self.q_proj.bias,
            &self.k_proj.weight,
            &self.k_proj.bias,
            &self.v_proj.weight,
            &self.v_proj.bias,
            &self.out_proj.weight,
            &self.out_proj.bias,
            &self.fc1.weight,
            &self.fc1.bias,
            &self.fc2.weight,
            &self.fc2.bias,
            &self.norm_weight,
            &self.norm_bias,
        ]
    }

    /// Total parameter count of the head.
    pub fn num_params(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }

    /// Build the contextual prompt for one batch.
    ///
    /// `sentence_embeds` is `[batch, seq, hidden]` straight from the frozen
    /// embedding table; `attention_mask` is `[batch, seq]` (1.0 real /
    /// 0.0 padding) or `None` when nothing is padded. Returns
    /// `[batch, P, hidden]` in the dtype and on the device of the input.
    pub fn condition(
        &self,
        sentence_embeds: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> EmbeddingResult<Tensor> {
        let (batch, seq_len, hidden) = sentence_embeds
            .dims3()
            .map_err(tensor_err("condition input dims"))?;
        if hidden != self.hidden_size {
            return Err(EmbeddingError::Tensor {
                message: format!(
                    "sentence embeddings have hidden size {hidden}, head expects {}",
                    self.hidden_size
                ),
            });
        }
        let device = sentence_embeds.device();
        let dtype = sentence_embeds.dtype();
        let head_dim = self.hidden_size / self.num_heads;

        // Working copy of the virtual prompt, aligned and batched.
        let prompt = align(self.prompt_embeddings.as_tensor(), device, dtype)?
            .unsqueeze(0)
            .and_then(|p| p.expand((batch, self.num_virtual_tokens, self.hidden_size)))
            .and_then(|p| p.contiguous())
            .map_err(tensor_err("prompt expand"))?;

        // Cross-attention: prompt queries, sentence keys/values.
        let q = self.q_proj.forward(&prompt, device, dtype)?;
        let k = self.k_proj.forward(sentence_embeds, device, dtype)?;
        let v = self.v_proj.forward(sentence_embeds, device, dtype)?;

        let q = split_heads(&q, batch, self.num_virtual_tokens, self.num_heads, head_dim)?;
        let k = split_heads(&k, batch, seq_len, self.num_heads, head_dim)?;
        let v = split_heads(&v, batch, seq_len, self.num_heads, head_dim)?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.transpose(2, 3).map_err(tensor_err("key transpose"))?.contiguous().map_err(tensor_err("key contiguous"))?)
            .and_then(|s| s * scale)
            .map_err(tensor_err("cross-attn scores"))?;

        let scores = match attention_mask {
            Some(mask) => {
                let pad_bias = mask
                    .to_dtype(DType::F32)
                    .and_then(|m| m.affine(1e9, -1e9))
                    .and_then(|m| m.to_dtype(dtype))
                    .and_then(|m| m.reshape((batch, 1, 1, seq_len)))
                    .map_err(tensor_err("cross-attn padding mask"))?;
                scores
                    .broadcast_add(&pad_bias)
                    .map_err(tensor_err("cross-attn mask add"))?
            }
            None => scores,
        };

        let weights =
            candle_nn::ops::softmax_last_dim(&scores).map_err(tensor_err("cross-attn softmax"))?;
        let context = weights
            .matmul(&v)
            .and_then(|c| c.transpose(1, 2))
            .and_then(|c| c.contiguous())
            .and_then(|c| c.reshape((batch, self.num_virtual_tokens, self.hidden_size)))
            .map_err(tensor_err("cross-attn context"))?;
        let attn_out = self.out_proj.forward(&context, device, dtype)?;

        // Residual, feed-forward, LayerNorm.
        let x = (prompt + attn_out).map_err(tensor_err("prompt residual"))?;
        let x = self.fc1.forward(&x, device, dtype)?;
        let x = x.relu().map_err(tensor_err("ffn relu"))?;
        let x = self.fc2.forward(&x, device, dtype)?;
        self.layer_norm(&x, device, dtype)
    }

    fn layer_norm(&self, x: &Tensor, device: &Device, dtype: DType) -> EmbeddingResult<Tensor> {
        let weight = align(self.norm_weight.as_tensor(), device, dtype)?;
        let bias = align(self.norm_bias.as_tensor(), device, dtype)?;

        let mean = x
            .mean_keepdim(D::Minus1)
            .map_err(tensor_err("layer norm mean"))?;
        let centered = x
            .broadcast_sub(&mean)
            .map_err(tensor_err("layer norm center"))?;
        let var = centered
            .sqr()
            .and_then(|c| c.mean_keepdim(D::Minus1))
            .map_err(tensor_err("layer norm var"))?;
        let denom = (var + LAYER_NORM_EPS)
            .and_then(|v| v.sqrt())
            .map_err(tensor_err("layer norm denom"))?;
        centered
            .broadcast_div(&denom)
            .and_then(|n| n.broadcast_mul(&weight))
            .and_then(|n| n.broadcast_add(&bias))
            .map_err(tensor_err("layer norm affine"))
    }
}

/// `[batch, seq, hidden]` to `[batch, heads, seq, head_dim]`.
fn split_heads(
    x: &Tensor,
    batch: usize,
    seq_len: usize,
    num_heads: usize,
    head_dim: usize,
) -> EmbeddingResult<Tensor> {
    x.reshape((batch, seq_len, num_heads, head_dim))
        .and_then(|t| t.transpose(1, 2))
        .and_then(|t| t.contiguous())
        .map_err(tensor_err("split heads"))
}

/// Align a tensor to the target device and dtype (no-op clones when nothing
/// changes; candle short-circuits internally).
fn align(t: &Tensor, device: &Device, dtype: DType) -> EmbeddingResult<Tensor> {
    t.to_device(device)
        .and_then(|t| t.to_dtype(dtype))
        .map_err(tensor_err("dtype/device align"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;

    const P: usize = 4;
    const HEADS: usize = 2;
    const H: usize = 8;

    /// Deterministic pseudo-random fill, small enough to keep f32 math tame.
    fn fill(n: usize, seed: f32) -> Vec<f32> {
        (0..n)
            .map(|i| (((i as f32 + seed) * 0.618_034) % 1.0) * 0.2 - 0.1)
            .collect()
    }

    fn write_checkpoint(path: &Path) {
        let mut raw: Vec<(String, Vec<usize>, Vec<f32>)> = vec![(
            "prompt.embeddings".into(),
            vec![P, H],
            fill(P * H, 1.0),
        )];
        for (i, name) in [
            "attn.q_proj",
            "attn.k_proj",
            "attn.v_proj",
            "attn.out_proj",
            "ffn.fc1",
            "ffn.fc2",
        ]
        .iter()
        .enumerate()
        {
            raw.push((format!("{name}.weight"), vec![H, H], fill(H * H, i as f32)));
            raw.push((format!("{name}.bias"), vec![H], fill(H, i as f32 + 0.5)));
        }
        raw.push(("norm.weight".into(), vec![H], vec![1.0; H]));
        raw.push(("norm.bias".into(), vec![H], vec![0.0; H]));

        let bytes: Vec<(String, Vec<usize>, Vec<u8>)> = raw
            .into_iter()
            .map(|(name, shape, vals)| {
                let mut buf = Vec::with_capacity(vals.len() * 4);
                for v in vals {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                (name, shape, buf)
            })
            .collect();
        let views: Vec<(String, TensorView<'_>)> = bytes
            .iter()
            .map(|(name, shape, buf)| {
                (
                    name.clone(),
                    TensorView::new(Dtype::F32, shape.clone(), buf).unwrap(),
                )
            })
            .collect();
        let serialized = safetensors::serialize(views, &None).unwrap();
        std::fs::write(path, serialized).unwrap();
    }

    fn test_head(dir: &Path) -> SoftPromptHead {
        let path = dir.join("prompt_head.safetensors");
        write_checkpoint(&path);
        SoftPromptHead::load(&path, P, HEADS, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_condition_output_shape_and_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let head = test_head(dir.path());

        let sent = Tensor::from_slice(&fill(2 * 5 * H, 9.0), (2, 5, H), &Device::Cpu).unwrap();
        let out = head.condition(&sent, None).unwrap();
        assert_eq!(out.dims(), &[2, P, H]);
        assert_eq!(out.dtype(), DType::F32);

        let vals: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!(vals.iter().all(|v| v.is_finite()), "non-finite prompt values");
    }

    #[test]
    fn test_condition_respects_padding_mask() {
        let dir = tempfile::tempdir().unwrap();
        let head = test_head(dir.path());

        // Same real tokens, one sample padded with garbage behind the mask.
        let clean = fill(3 * H, 2.0);
        let mut padded = clean.clone();
        padded.extend(vec![7.5; H]);
        let mut clean_padded = clean.clone();
        clean_padded.extend(vec![0.0; H]);

        let a = Tensor::from_slice(&clean_padded, (1, 4, H), &Device::Cpu).unwrap();
        let b = Tensor::from_slice(&padded, (1, 4, H), &Device::Cpu).unwrap();
        let mask = Tensor::from_slice(&[1f32, 1.0, 1.0, 0.0], (1, 4), &Device::Cpu).unwrap();

        let out_a: Vec<f32> = head
            .condition(&a, Some(&mask))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let out_b: Vec<f32> = head
            .condition(&b, Some(&mask))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for (x, y) in out_a.iter().zip(out_b.iter()) {
            assert!((x - y).abs() < 1e-5, "masked position leaked into prompt");
        }
    }

    #[test]
    fn test_condition_aligns_input_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let head = test_head(dir.path());

        let sent = Tensor::from_slice(&fill(1 * 3 * H, 4.0), (1, 3, H), &Device::Cpu)
            .unwrap()
            .to_dtype(DType::F64)
            .unwrap();
        let out = head.condition(&sent, None).unwrap();
        assert_eq!(out.dtype(), DType::F64);
    }

    #[test]
    fn test_load_rejects_wrong_prompt_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt_head.safetensors");
        write_checkpoint(&path);
        let err = SoftPromptHead::load(&path, P + 1, HEADS, &Device::Cpu);
        assert!(matches!(err, Err(EmbeddingError::Checkpoint { .. })));
    }

    #[test]
    fn test_trainable_vars_cover_all_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let head = test_head(dir.path());
        // prompt + 6 linear weight/bias pairs + norm weight/bias
        assert_eq!(head.trainable_vars().len(), 15);
        assert_eq!(
            head.num_params(),
            P * H + 6 * (H * H + H) + 2 * H
        );
    }
}
