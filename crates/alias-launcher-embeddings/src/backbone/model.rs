//! Qwen2-style decoder: RoPE attention with grouped-query heads, SwiGLU MLP,
//! RMSNorm, pre-norm residual layout.
//!
//! The forward pass always starts from embeddings (`[batch, seq, hidden]`),
//! not token ids — the soft prompt is spliced in front of the sentence
//! embeddings before the model ever sees the sequence, so an ids-only entry
//! point would be useless here. Sequences are short (a templated command plus
//! at most a handful of generated tokens), so generation re-runs the full
//! prefix each step instead of carrying a KV cache.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{embedding, linear, linear_no_bias, rms_norm, Embedding, Linear, RmsNorm, VarBuilder};
use serde::Deserialize;

use crate::error::{tensor_err, EmbeddingError, EmbeddingResult};

use super::config::BackboneConfig;

/// Rotary position embeddings, precomputed for the full position range.
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(
        dim: usize,
        max_seq_len: usize,
        theta: f64,
        device: &Device,
        dtype: DType,
    ) -> EmbeddingResult<Self> {
        let inv_freq: Vec<f64> = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / theta.powf(i as f64 / dim as f64))
            .collect();
        let inv_freq = Tensor::new(inv_freq, device)
            .and_then(|t| t.to_dtype(dtype))
            .map_err(tensor_err("rope inv_freq"))?;

        let positions: Vec<f64> = (0..max_seq_len).map(|i| i as f64).collect();
        let positions = Tensor::new(positions, device)
            .and_then(|t| t.to_dtype(dtype))
            .map_err(tensor_err("rope positions"))?;

        // [seq_len, dim/2]
        let freqs = positions
            .unsqueeze(1)
            .and_then(|p| p.matmul(&inv_freq.unsqueeze(0)?))
            .map_err(tensor_err("rope freqs"))?;
        let cos = freqs.cos().map_err(tensor_err("rope cos"))?;
        let sin = freqs.sin().map_err(tensor_err("rope sin"))?;

        Ok(Self { cos, sin })
    }

    /// Rotate q and k for positions `[0, seq_len)`.
    fn apply(&self, q: &Tensor, k: &Tensor) -> EmbeddingResult<(Tensor, Tensor)> {
        let seq_len = q.dim(2).map_err(tensor_err("rope q seq dim"))?;
        let cos = self
            .cos
            .narrow(0, 0, seq_len)
            .map_err(tensor_err("rope cos narrow"))?;
        let sin = self
            .sin
            .narrow(0, 0, seq_len)
            .map_err(tensor_err("rope sin narrow"))?;
        Ok((
            apply_rotary_emb(q, &cos, &sin)?,
            apply_rotary_emb(k, &cos, &sin)?,
        ))
    }
}

fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> EmbeddingResult<Tensor> {
    let (_b, _h, seq_len, head_dim) = x.dims4().map_err(tensor_err("rope x dims"))?;
    let x_pairs = x
        .reshape(((), seq_len, head_dim / 2, 2))
        .map_err(tensor_err("rope pair reshape"))?;
    let x0 = x_pairs
        .narrow(D::Minus1, 0, 1)
        .and_then(|t| t.squeeze(D::Minus1))
        .map_err(tensor_err("rope x0"))?;
    let x1 = x_pairs
        .narrow(D::Minus1, 1, 1)
        .and_then(|t| t.squeeze(D::Minus1))
        .map_err(tensor_err("rope x1"))?;

    let cos = cos.unsqueeze(0).map_err(tensor_err("rope cos unsqueeze"))?;
    let sin = sin.unsqueeze(0).map_err(tensor_err("rope sin unsqueeze"))?;

    let out0 = x0
        .broadcast_mul(&cos)
        .and_then(|a| Ok((a - x1.broadcast_mul(&sin)?)?))
        .map_err(tensor_err("rope out0"))?;
    let out1 = x0
        .broadcast_mul(&sin)
        .and_then(|a| Ok((a + x1.broadcast_mul(&cos)?)?))
        .map_err(tensor_err("rope out1"))?;

    Tensor::stack(&[&out0, &out1], D::Minus1)
        .and_then(|t| t.reshape(x.shape()))
        .map_err(tensor_err("rope restack"))
}

/// Multi-head attention with grouped-query key/value heads.
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &BackboneConfig) -> EmbeddingResult<Self> {
        let head_dim = config.head_dim();
        // Q, K, V carry biases in Qwen2; the output projection does not.
        let q_proj = linear(
            config.hidden_size,
            config.num_attention_heads * head_dim,
            vb.pp("q_proj"),
        )
        .map_err(load_err("q_proj"))?;
        let k_proj = linear(
            config.hidden_size,
            config.num_key_value_heads * head_dim,
            vb.pp("k_proj"),
        )
        .map_err(load_err("k_proj"))?;
        let v_proj = linear(
            config.hidden_size,
            config.num_key_value_heads * head_dim,
            vb.pp("v_proj"),
        )
        .map_err(load_err("v_proj"))?;
        let o_proj = linear_no_bias(
            config.num_attention_heads * head_dim,
            config.hidden_size,
            vb.pp("o_proj"),
        )
        .map_err(load_err("o_proj"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads: config.num_attention_heads,
            num_kv_heads: config.num_key_value_heads,
            head_dim,
        })
    }

    /// `mask_bias` is additive, `[batch, 1, seq, seq]`, already combining the
    /// causal triangle with padding positions.
    fn forward(
        &self,
        x: &Tensor,
        rotary: &RotaryEmbedding,
        mask_bias: &Tensor,
    ) -> EmbeddingResult<Tensor> {
        let (b, seq_len, _) = x.dims3().map_err(tensor_err("attn input dims"))?;

        let q = self.q_proj.forward(x).map_err(tensor_err("q_proj"))?;
        let k = self.k_proj.forward(x).map_err(tensor_err("k_proj"))?;
        let v = self.v_proj.forward(x).map_err(tensor_err("v_proj"))?;

        let q = q
            .reshape((b, seq_len, self.num_heads, self.head_dim))
            .and_then(|t| t.transpose(1, 2))
            .and_then(|t| t.contiguous())
            .map_err(tensor_err("q reshape"))?;
        let k = k
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))
            .and_then(|t| t.transpose(1, 2))
            .and_then(|t| t.contiguous())
            .map_err(tensor_err("k reshape"))?;
        let v = v
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))
            .and_then(|t| t.transpose(1, 2))
            .and_then(|t| t.contiguous())
            .map_err(tensor_err("v reshape"))?;

        let (q, k) = rotary.apply(&q, &k)?;

        // Expand KV heads for grouped-query attention.
        let k = repeat_kv(k, self.num_heads / self.num_kv_heads)?;
        let v = repeat_kv(v, self.num_heads / self.num_kv_heads)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .contiguous()
            .and_then(|q| q.matmul(&k.transpose(2, 3)?.contiguous()?))
            .and_then(|s| s * scale)
            .map_err(tensor_err("attn scores"))?;
        let scores = scores
            .broadcast_add(mask_bias)
            .map_err(tensor_err("attn mask add"))?;

        let weights =
            candle_nn::ops::softmax_last_dim(&scores).map_err(tensor_err("attn softmax"))?;
        let context = weights.matmul(&v).map_err(tensor_err("attn context"))?;

        let context = context
            .transpose(1, 2)
            .and_then(|t| t.contiguous())
            .and_then(|t| t.reshape((b, seq_len, ())))
            .map_err(tensor_err("attn output reshape"))?;
        self.o_proj
            .forward(&context)
            .map_err(tensor_err("o_proj"))
    }
}

fn repeat_kv(x: Tensor, n_rep: usize) -> EmbeddingResult<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4().map_err(tensor_err("repeat_kv dims"))?;
    x.unsqueeze(2)
        .and_then(|t| t.expand((b, num_kv_heads, n_rep, seq_len, head_dim)))
        .and_then(|t| t.contiguous())
        .and_then(|t| t.reshape((b, num_kv_heads * n_rep, seq_len, head_dim)))
        .map_err(tensor_err("repeat_kv"))
}

/// SwiGLU MLP: `down(silu(gate(x)) * up(x))`.
struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &BackboneConfig) -> EmbeddingResult<Self> {
        let gate_proj = linear_no_bias(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("gate_proj"),
        )
        .map_err(load_err("gate_proj"))?;
        let up_proj = linear_no_bias(
            config.hidden_size,
            config.intermediate_size,
            vb.pp("up_proj"),
        )
        .map_err(load_err("up_proj"))?;
        let down_proj = linear_no_bias(
            config.intermediate_size,
            config.hidden_size,
            vb.pp("down_proj"),
        )
        .map_err(load_err("down_proj"))?;
        Ok(Self {
            gate_proj,
            up_proj,
            down_proj,
        })
    }

    fn forward(&self, x: &Tensor) -> EmbeddingResult<Tensor> {
        let gate = self.gate_proj.forward(x).map_err(tensor_err("gate_proj"))?;
        let gate = candle_nn::ops::silu(&gate).map_err(tensor_err("silu"))?;
        let up = self.up_proj.forward(x).map_err(tensor_err("up_proj"))?;
        let hidden = (gate * up).map_err(tensor_err("swiglu mul"))?;
        self.down_proj
            .forward(&hidden)
            .map_err(tensor_err("down_proj"))
    }
}

/// One pre-norm decoder layer.
struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &BackboneConfig) -> EmbeddingResult<Self> {
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config)?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
            input_layernorm: rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )
            .map_err(load_err("input_layernorm"))?,
            post_attention_layernorm: rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )
            .map_err(load_err("post_attention_layernorm"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rotary: &RotaryEmbedding,
        mask_bias: &Tensor,
    ) -> EmbeddingResult<Tensor> {
        let residual = x;
        let x = self
            .input_layernorm
            .forward(x)
            .map_err(tensor_err("input_layernorm"))?;
        let x = self.self_attn.forward(&x, rotary, mask_bias)?;
        let x = (residual + x).map_err(tensor_err("attn residual"))?;

        let residual = &x;
        let x = self
            .post_attention_layernorm
            .forward(&x)
            .map_err(tensor_err("post_attention_layernorm"))?;
        let x = self.mlp.forward(&x)?;
        (residual + x).map_err(tensor_err("mlp residual"))
    }
}

/// Shard index of a multi-file safetensors model.
#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// The frozen base model.
pub struct Qwen2Backbone {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Option<Linear>,
    rotary: RotaryEmbedding,
    config: BackboneConfig,
    device: Device,
    dtype: DType,
}

impl Qwen2Backbone {
    /// Load the model from a local directory holding `config.json` and
    /// safetensors weights (single file or sharded with an index).
    ///
    /// Nothing is downloaded; a missing directory is a startup error.
    pub fn load(model_dir: &Path, device: &Device, dtype: DType) -> EmbeddingResult<Self> {
        let config_path = model_dir.join("config.json");
        let config_raw =
            std::fs::read_to_string(&config_path).map_err(|e| EmbeddingError::ModelLoad {
                message: format!("cannot read {}: {e}", config_path.display()),
            })?;
        let config: BackboneConfig =
            serde_json::from_str(&config_raw).map_err(|e| EmbeddingError::ModelLoad {
                message: format!("cannot parse {}: {e}", config_path.display()),
            })?;

        let weights_paths = Self::weight_files(model_dir)?;
        tracing::info!(
            layers = config.num_hidden_layers,
            hidden_size = config.hidden_size,
            vocab_size = config.vocab_size,
            files = weights_paths.len(),
            "loading frozen backbone"
        );

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&weights_paths, dtype, device).map_err(|e| {
                EmbeddingError::ModelLoad {
                    message: format!("cannot map safetensors: {e}"),
                }
            })?
        };
        let vb_model = vb.pp("model");

        let embed_tokens = embedding(
            config.vocab_size,
            config.hidden_size,
            vb_model.pp("embed_tokens"),
        )
        .map_err(load_err("embed_tokens"))?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(DecoderLayer::load(
                vb_model.pp(format!("layers.{i}")),
                &config,
            )?);
        }

        let norm = rms_norm(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))
            .map_err(load_err("norm"))?;

        // With tied word embeddings, logits come from the transposed
        // embedding table instead of a separate head.
        let lm_head = if config.tie_word_embeddings {
            None
        } else {
            Some(
                linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))
                    .map_err(load_err("lm_head"))?,
            )
        };

        let rotary = RotaryEmbedding::new(
            config.head_dim(),
            config.max_position_embeddings,
            config.rope_theta,
            device,
            dtype,
        )?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary,
            config,
            device: device.clone(),
            dtype,
        })
    }

    fn weight_files(model_dir: &Path) -> EmbeddingResult<Vec<std::path::PathBuf>> {
        let index_path = model_dir.join("model.safetensors.index.json");
        if index_path.exists() {
            let raw =
                std::fs::read_to_string(&index_path).map_err(|e| EmbeddingError::ModelLoad {
                    message: format!("cannot read {}: {e}", index_path.display()),
                })?;
            let index: SafetensorsIndex =
                serde_json::from_str(&raw).map_err(|e| EmbeddingError::ModelLoad {
                    message: format!("cannot parse {}: {e}", index_path.display()),
                })?;
            let mut shard_names: Vec<String> = index.weight_map.into_values().collect();
            shard_names.sort();
            shard_names.dedup();
            return Ok(shard_names
                .into_iter()
                .map(|name| model_dir.join(name))
                .collect());
        }

        let single = model_dir.join("model.safetensors");
        if !single.exists() {
            return Err(EmbeddingError::ModelLoad {
                message: format!("no safetensors weights under {}", model_dir.display()),
            });
        }
        Ok(vec![single])
    }

    /// Device the weights live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Floating-point precision of the weights and of every activation.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Hidden size of the model.
    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    /// End-of-sequence token id from the model config, when declared.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.config.eos_token_id
    }

    /// Embedding-table lookup: `[batch, seq]` ids to `[batch, seq, hidden]`.
    pub fn embed(&self, input_ids: &Tensor) -> EmbeddingResult<Tensor> {
        self.embed_tokens
            .forward(input_ids)
            .map_err(tensor_err("embed lookup"))
    }

    /// Run the decoder stack over pre-built embeddings and return the final
    /// hidden states `[batch, seq, hidden]` (after the last RMSNorm).
    ///
    /// `attention_mask` is `[batch, seq]` with 1.0 for real positions and
    /// 0.0 for padding; `None` means all positions are real.
    pub fn forward_embeds(
        &self,
        embeds: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> EmbeddingResult<Tensor> {
        let (b, seq_len, _) = embeds.dims3().map_err(tensor_err("forward input dims"))?;
        let mask_bias = self.build_mask_bias(b, seq_len, attention_mask)?;

        let mut hidden = embeds.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &self.rotary, &mask_bias)?;
        }
        self.norm.forward(&hidden).map_err(tensor_err("final norm"))
    }

    /// Project final hidden states of the last position to vocabulary logits.
    ///
    /// Expects `[batch, hidden]`, returns `[batch, vocab]`.
    pub fn logits(&self, last_hidden: &Tensor) -> EmbeddingResult<Tensor> {
        match &self.lm_head {
            Some(head) => head.forward(last_hidden).map_err(tensor_err("lm_head")),
            None => {
                let table = self
                    .embed_tokens
                    .embeddings()
                    .t()
                    .map_err(tensor_err("tied head transpose"))?;
                last_hidden
                    .matmul(&table)
                    .map_err(tensor_err("tied head matmul"))
            }
        }
    }

    /// Additive attention bias `[batch, 1, seq, seq]`: the causal triangle
    /// plus padded key positions pushed to -inf.
    fn build_mask_bias(
        &self,
        batch: usize,
        seq_len: usize,
        attention_mask: Option<&Tensor>,
    ) -> EmbeddingResult<Tensor> {
        let mut causal = vec![0f32; seq_len * seq_len];
        for i in 0..seq_len {
            for j in (i + 1)..seq_len {
                causal[i * seq_len + j] = f32::NEG_INFINITY;
            }
        }
        let causal = Tensor::from_slice(&causal, (seq_len, seq_len), &self.device)
            .and_then(|t| t.to_dtype(self.dtype))
            .and_then(|t| t.reshape((1, 1, seq_len, seq_len)))
            .map_err(tensor_err("causal mask"))?;

        let bias = match attention_mask {
            Some(mask) => {
                // 1.0 -> 0, 0.0 -> -1e9 (saturates to -inf in f16)
                let pad_bias = mask
                    .to_dtype(DType::F32)
                    .and_then(|m| m.affine(1e9, -1e9))
                    .and_then(|m| m.to_dtype(self.dtype))
                    .and_then(|m| m.reshape((batch, 1, 1, seq_len)))
                    .map_err(tensor_err("padding mask"))?;
                causal
                    .broadcast_add(&pad_bias)
                    .map_err(tensor_err("mask combine"))?
            }
            None => causal,
        };
        Ok(bias)
    }
}

fn load_err(site: &str) -> impl Fn(candle_core::Error) -> EmbeddingError + '_ {
    move |e| EmbeddingError::ModelLoad {
        message: format!("{site}: {e}"),
    }
}
