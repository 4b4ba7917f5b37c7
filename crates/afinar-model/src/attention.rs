//! Causal self-attention with Grouped Query Attention and KV cache

use crate::config::ModelConfig;
use crate::delta::{apply_delta, ProjectionDelta};
use crate::rope::apply_rotary_emb;
use anyhow::Result;
use aprender::autograd::Tensor;
use aprender::nn::{Dropout, Linear, Module};

// Tensor plumbing aprender has no ops for. Everything below works on the raw
// data buffer and rebuilds a tensor with the target shape.

/// [batch, seq, heads * head_dim] -> [batch, heads, seq, head_dim]
fn split_heads(x: &Tensor, heads: usize, head_dim: usize) -> Tensor {
    let shape = x.shape();
    let (batch, seq_len) = (shape[0], shape[1]);
    let x_data = x.data();
    let mut out = vec![0.0; x_data.len()];

    for b in 0..batch {
        for s in 0..seq_len {
            for h in 0..heads {
                let src = (b * seq_len + s) * heads * head_dim + h * head_dim;
                let dst = ((b * heads + h) * seq_len + s) * head_dim;
                out[dst..dst + head_dim].copy_from_slice(&x_data[src..src + head_dim]);
            }
        }
    }

    Tensor::new(&out, &[batch, heads, seq_len, head_dim])
}

/// [batch, heads, seq, head_dim] -> [batch, seq, heads * head_dim]
fn merge_heads(x: &Tensor) -> Tensor {
    let shape = x.shape();
    let (batch, heads, seq_len, head_dim) = (shape[0], shape[1], shape[2], shape[3]);
    let x_data = x.data();
    let mut out = vec![0.0; x_data.len()];

    for b in 0..batch {
        for h in 0..heads {
            for s in 0..seq_len {
                let src = ((b * heads + h) * seq_len + s) * head_dim;
                let dst = (b * seq_len + s) * heads * head_dim + h * head_dim;
                out[dst..dst + head_dim].copy_from_slice(&x_data[src..src + head_dim]);
            }
        }
    }

    Tensor::new(&out, &[batch, seq_len, heads * head_dim])
}

/// Repeat KV heads to match the query head count (GQA)
fn repeat_kv(x: &Tensor, groups: usize) -> Tensor {
    if groups == 1 {
        return x.clone();
    }

    let shape = x.shape();
    let (batch, kv_heads, seq_len, head_dim) = (shape[0], shape[1], shape[2], shape[3]);
    let row = seq_len * head_dim;
    let x_data = x.data();
    let mut out = vec![0.0; batch * kv_heads * groups * row];

    for b in 0..batch {
        for kv_h in 0..kv_heads {
            let src = (b * kv_heads + kv_h) * row;
            for g in 0..groups {
                let dst = (b * kv_heads * groups + kv_h * groups + g) * row;
                out[dst..dst + row].copy_from_slice(&x_data[src..src + row]);
            }
        }
    }

    Tensor::new(&out, &[batch, kv_heads * groups, seq_len, head_dim])
}

/// Batched Q @ K^T for 4D tensors: [b, h, m, d] x [b, h, n, d] -> [b, h, m, n]
fn matmul_qk(q: &Tensor, k: &Tensor) -> Tensor {
    let q_shape = q.shape();
    let k_shape = k.shape();
    let (batch, heads, m, d) = (q_shape[0], q_shape[1], q_shape[2], q_shape[3]);
    let n = k_shape[2];

    let q_data = q.data();
    let k_data = k.data();
    let mut out = vec![0.0; batch * heads * m * n];

    for bh in 0..batch * heads {
        let q_off = bh * m * d;
        let k_off = bh * n * d;
        let o_off = bh * m * n;
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for x in 0..d {
                    sum += q_data[q_off + i * d + x] * k_data[k_off + j * d + x];
                }
                out[o_off + i * n + j] = sum;
            }
        }
    }

    Tensor::new(&out, &[batch, heads, m, n])
}

/// Batched weights @ V: [b, h, m, n] x [b, h, n, d] -> [b, h, m, d]
fn matmul_av(weights: &Tensor, v: &Tensor) -> Tensor {
    let w_shape = weights.shape();
    let v_shape = v.shape();
    let (batch, heads, m, n) = (w_shape[0], w_shape[1], w_shape[2], w_shape[3]);
    let d = v_shape[3];

    let w_data = weights.data();
    let v_data = v.data();
    let mut out = vec![0.0; batch * heads * m * d];

    for bh in 0..batch * heads {
        let w_off = bh * m * n;
        let v_off = bh * n * d;
        let o_off = bh * m * d;
        for i in 0..m {
            for j in 0..n {
                let w = w_data[w_off + i * n + j];
                if w == 0.0 {
                    continue;
                }
                for x in 0..d {
                    out[o_off + i * d + x] += w * v_data[v_off + j * d + x];
                }
            }
        }
    }

    Tensor::new(&out, &[batch, heads, m, d])
}

/// Softmax over the last dimension with causal masking folded in
///
/// Row `i` of each [q_len, k_len] score block may attend to key positions
/// `j <= i + (k_len - q_len)`; later positions get zero weight.
fn masked_softmax(scores: &Tensor, q_len: usize, k_len: usize) -> Tensor {
    let data = scores.data();
    let rows = data.len() / k_len;
    let offset = k_len - q_len;
    let mut out = vec![0.0; data.len()];

    for r in 0..rows {
        let i = r % q_len;
        let visible = i + offset + 1;
        let row = &data[r * k_len..r * k_len + visible];

        let max_val = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mut sum = 0.0;
        let mut exps = vec![0.0; visible];
        for (j, &s) in row.iter().enumerate() {
            let e = (s - max_val).exp();
            exps[j] = e;
            sum += e;
        }
        for (j, e) in exps.into_iter().enumerate() {
            out[r * k_len + j] = if sum > 0.0 { e / sum } else { 0.0 };
        }
    }

    Tensor::new(&out, scores.shape())
}

/// Scale a tensor by a scalar
fn scale(x: &Tensor, factor: f32) -> Tensor {
    let data: Vec<f32> = x.data().iter().map(|&v| v * factor).collect();
    Tensor::new(&data, x.shape())
}

/// Extract positions [start, start+len) from precomputed RoPE frequencies
fn slice_rope(rope: &Tensor, start: usize, len: usize) -> Result<Tensor> {
    let shape = rope.shape();
    let max_seq_len = shape[1];
    let half_dim = shape[3];

    if start + len > max_seq_len {
        anyhow::bail!(
            "Requested RoPE positions {}..{} exceed precomputed length {}",
            start,
            start + len,
            max_seq_len
        );
    }

    let data = rope.data();
    let slice: Vec<f32> = data[start * half_dim..(start + len) * half_dim].to_vec();
    Ok(Tensor::new(&slice, &[1, len, 1, half_dim]))
}

/// Grouped Query Attention with named projections and KV cache
///
/// Projections are named `q_proj`, `k_proj`, `v_proj`, `o_proj`; each output
/// passes through the adapter delta hook before use.
pub struct CausalSelfAttention {
    /// Query projection: n_embd -> n_embd
    q_proj: Linear,
    /// Key projection: n_embd -> n_kv_head * head_dim
    k_proj: Linear,
    /// Value projection: n_embd -> n_kv_head * head_dim
    v_proj: Linear,
    /// Output projection: n_embd -> n_embd
    o_proj: Linear,
    n_head: usize,
    n_kv_head: usize,
    head_dim: usize,
    dropout: Option<Dropout>,
    training: bool,
}

impl CausalSelfAttention {
    /// Create a new attention layer from the model configuration
    pub fn new(config: &ModelConfig) -> Self {
        let head_dim = config.head_dim();
        let kv_dim = config.kv_dim();

        let dropout = match (config.dropout, config.seed) {
            (Some(p), Some(s)) if p > 0.0 => Some(Dropout::with_seed(p, s)),
            (Some(p), None) if p > 0.0 => Some(Dropout::new(p)),
            _ => None,
        };

        Self {
            q_proj: Linear::new(config.n_embd, config.n_embd),
            k_proj: Linear::new(config.n_embd, kv_dim),
            v_proj: Linear::new(config.n_embd, kv_dim),
            o_proj: Linear::new(config.n_embd, config.n_embd),
            n_head: config.n_head,
            n_kv_head: config.n_kv_head,
            head_dim,
            dropout,
            training: true,
        }
    }

    /// Set training mode (governs attention dropout)
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        if let Some(ref mut dropout) = self.dropout {
            if training {
                dropout.train();
            } else {
                dropout.eval();
            }
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor [batch, seq_len, n_embd]
    /// * `layer_idx` - Layer index for the KV cache and delta hook
    /// * `kv_cache` - Optional KV cache for autoregressive inference
    /// * `cos_sin` - Precomputed RoPE frequencies
    /// * `hook` - Optional adapter delta hook
    ///
    /// # Returns
    /// Output tensor [batch, seq_len, n_embd]
    pub fn forward(
        &self,
        x: &Tensor,
        layer_idx: usize,
        kv_cache: Option<&mut KVCache>,
        cos_sin: (&Tensor, &Tensor),
        hook: Option<&dyn ProjectionDelta>,
    ) -> Result<Tensor> {
        let shape = x.shape();
        if shape.len() != 3 {
            anyhow::bail!(
                "Expected 3D tensor [batch, seq_len, n_embd], got shape {:?}",
                shape
            );
        }
        let seq_len = shape[1];

        let q = apply_delta(hook, layer_idx, "q_proj", x, self.q_proj.forward(x));
        let k = apply_delta(hook, layer_idx, "k_proj", x, self.k_proj.forward(x));
        let v = apply_delta(hook, layer_idx, "v_proj", x, self.v_proj.forward(x));

        let q = split_heads(&q, self.n_head, self.head_dim);
        let k = split_heads(&k, self.n_kv_head, self.head_dim);
        let v = split_heads(&v, self.n_kv_head, self.head_dim);

        // New tokens sit at positions [cached_len, cached_len + seq_len)
        let cached_len = kv_cache.as_ref().map_or(0, |c| c.seq_len(layer_idx));
        let (cos, sin) = cos_sin;
        let cos_cur = slice_rope(cos, cached_len, seq_len)?;
        let sin_cur = slice_rope(sin, cached_len, seq_len)?;
        let q = apply_rotary_emb(&q, &cos_cur, &sin_cur)?;
        let k = apply_rotary_emb(&k, &cos_cur, &sin_cur)?;

        let (k_all, v_all) = match kv_cache {
            Some(cache) => cache.insert_kv(layer_idx, k, v)?,
            None => (k, v),
        };
        let total_len = k_all.shape()[2];

        let groups = self.n_head / self.n_kv_head;
        let k_all = repeat_kv(&k_all, groups);
        let v_all = repeat_kv(&v_all, groups);

        let scores = scale(&matmul_qk(&q, &k_all), 1.0 / (self.head_dim as f32).sqrt());
        let weights = masked_softmax(&scores, seq_len, total_len);

        let weights = match (&self.dropout, self.training) {
            (Some(dropout), true) => dropout.forward(&weights),
            _ => weights,
        };

        let attn = merge_heads(&matmul_av(&weights, &v_all));
        Ok(apply_delta(
            hook,
            layer_idx,
            "o_proj",
            &attn,
            self.o_proj.forward(&attn),
        ))
    }
}

impl Module for CausalSelfAttention {
    fn forward(&self, _input: &Tensor) -> Tensor {
        unimplemented!("CausalSelfAttention requires RoPE frequencies; use forward() directly")
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        params.extend(self.q_proj.parameters());
        params.extend(self.k_proj.parameters());
        params.extend(self.v_proj.parameters());
        params.extend(self.o_proj.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        params.extend(self.q_proj.parameters_mut());
        params.extend(self.k_proj.parameters_mut());
        params.extend(self.v_proj.parameters_mut());
        params.extend(self.o_proj.parameters_mut());
        params
    }
}

/// KV cache for autoregressive inference
///
/// Stores concatenated key/value tensors per layer so each generation step
/// only projects the newest token.
pub struct KVCache {
    /// Per-layer (keys, values), shape [batch, n_kv_heads, cached_len, head_dim]
    cache: Vec<(Tensor, Tensor)>,
}

impl KVCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self { cache: Vec::new() }
    }

    /// Cached sequence length for a layer
    pub fn seq_len(&self, layer_idx: usize) -> usize {
        self.cache
            .get(layer_idx)
            .map_or(0, |(k, _)| if k.shape().len() == 4 { k.shape()[2] } else { 0 })
    }

    /// Insert new keys/values for a layer and return the concatenated pair
    pub fn insert_kv(&mut self, layer_idx: usize, k: Tensor, v: Tensor) -> Result<(Tensor, Tensor)> {
        while self.cache.len() <= layer_idx {
            self.cache.push((Tensor::zeros(&[0]), Tensor::zeros(&[0])));
        }

        let (cached_k, cached_v) = &self.cache[layer_idx];
        if cached_k.shape().len() != 4 {
            self.cache[layer_idx] = (k.clone(), v.clone());
            return Ok((k, v));
        }

        let old_shape = cached_k.shape().to_vec();
        let new_shape = k.shape();
        if old_shape[0] != new_shape[0]
            || old_shape[1] != new_shape[1]
            || old_shape[3] != new_shape[3]
        {
            anyhow::bail!(
                "KV cache shape mismatch: cached {:?} vs new {:?}",
                old_shape,
                new_shape
            );
        }

        let total_len = old_shape[2] + new_shape[2];
        let mut k_data = cached_k.data().to_vec();
        k_data.extend_from_slice(k.data());
        let mut v_data = cached_v.data().to_vec();
        v_data.extend_from_slice(v.data());

        let shape = [old_shape[0], old_shape[1], total_len, old_shape[3]];
        let k_concat = Tensor::new(&k_data, &shape);
        let v_concat = Tensor::new(&v_data, &shape);

        self.cache[layer_idx] = (k_concat.clone(), v_concat.clone());
        Ok((k_concat, v_concat))
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for KVCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_merge_roundtrip() {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let x = Tensor::new(&data, &[1, 3, 8]);
        let split = split_heads(&x, 2, 4);
        assert_eq!(split.shape(), &[1, 2, 3, 4]);
        let merged = merge_heads(&split);
        assert_eq!(merged.data(), x.data());
    }

    #[test]
    fn test_repeat_kv_groups() {
        let x = Tensor::ones(&[1, 2, 3, 4]);
        let repeated = repeat_kv(&x, 3);
        assert_eq!(repeated.shape(), &[1, 6, 3, 4]);
    }

    #[test]
    fn test_masked_softmax_rows_sum_to_one() {
        let scores = Tensor::new(&[0.5; 2 * 3 * 3], &[1, 2, 3, 3]);
        let weights = masked_softmax(&scores, 3, 3);
        let data = weights.data();
        for r in 0..6 {
            let sum: f32 = data[r * 3..(r + 1) * 3].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_masked_softmax_is_causal() {
        let scores = Tensor::new(&[1.0; 3 * 3], &[1, 1, 3, 3]);
        let weights = masked_softmax(&scores, 3, 3);
        let data = weights.data();
        // Row 0 may only see position 0
        assert!((data[0] - 1.0).abs() < 1e-5);
        assert_eq!(data[1], 0.0);
        assert_eq!(data[2], 0.0);
    }

    #[test]
    fn test_kv_cache_accumulates() {
        let mut cache = KVCache::new();
        let k = Tensor::ones(&[1, 2, 3, 4]);
        let v = Tensor::ones(&[1, 2, 3, 4]);
        let (k_all, _) = cache.insert_kv(0, k, v).unwrap();
        assert_eq!(k_all.shape()[2], 3);
        assert_eq!(cache.seq_len(0), 3);

        let k2 = Tensor::ones(&[1, 2, 1, 4]);
        let v2 = Tensor::ones(&[1, 2, 1, 4]);
        let (k_all, v_all) = cache.insert_kv(0, k2, v2).unwrap();
        assert_eq!(k_all.shape()[2], 4);
        assert_eq!(v_all.shape()[2], 4);
    }

    #[test]
    fn test_kv_cache_shape_mismatch_fails() {
        let mut cache = KVCache::new();
        cache
            .insert_kv(0, Tensor::ones(&[1, 2, 3, 4]), Tensor::ones(&[1, 2, 3, 4]))
            .unwrap();
        let result = cache.insert_kv(0, Tensor::ones(&[1, 3, 1, 4]), Tensor::ones(&[1, 3, 1, 4]));
        assert!(result.is_err());
    }

    #[test]
    fn test_attention_forward_shape() {
        let config = ModelConfig {
            n_embd: 16,
            n_head: 4,
            n_kv_head: 2,
            sequence_len: 8,
            ..Default::default()
        };
        let attn = CausalSelfAttention::new(&config);
        let (cos, sin) =
            crate::rope::precompute_rotary_embeddings(8, config.head_dim(), 10000.0).unwrap();
        let x = Tensor::ones(&[1, 5, 16]);

        let out = attn.forward(&x, 0, None, (&cos, &sin), None).unwrap();
        assert_eq!(out.shape(), &[1, 5, 16]);
    }
}
