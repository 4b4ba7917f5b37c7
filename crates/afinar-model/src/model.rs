//! Causal language model

use crate::attention::{CausalSelfAttention, KVCache};
use crate::config::ModelConfig;
use crate::delta::ProjectionDelta;
use crate::init::init_normal;
use crate::mlp::Mlp;
use crate::norm::rms_norm;
use crate::rope::precompute_rotary_embeddings;
use anyhow::{Context, Result};
use aprender::autograd::Tensor;
use aprender::nn::loss::CrossEntropyLoss;
use aprender::nn::{Linear, Module};

/// Transformer decoder block
///
/// Pre-norm residual structure:
/// - x = x + attn(norm(x))
/// - x = x + mlp(norm(x))
pub struct Block {
    attn: CausalSelfAttention,
    mlp: Mlp,
    layer_idx: usize,
}

impl Block {
    /// Create a new decoder block
    pub fn new(config: &ModelConfig, layer_idx: usize) -> Self {
        Self {
            attn: CausalSelfAttention::new(config),
            mlp: Mlp::new(config),
            layer_idx,
        }
    }

    /// Forward pass through the block
    ///
    /// # Arguments
    /// * `x` - Input tensor [batch, seq_len, n_embd]
    /// * `cos_sin` - Precomputed RoPE frequencies
    /// * `kv_cache` - Optional KV cache for inference
    /// * `hook` - Optional adapter delta hook
    pub fn forward(
        &self,
        x: &Tensor,
        cos_sin: (&Tensor, &Tensor),
        kv_cache: Option<&mut KVCache>,
        hook: Option<&dyn ProjectionDelta>,
    ) -> Result<Tensor> {
        let x_norm = rms_norm(x)?;
        let attn_out = self
            .attn
            .forward(&x_norm, self.layer_idx, kv_cache, cos_sin, hook)?;
        let x = attn_out.add(x);

        let x_norm = rms_norm(&x)?;
        let mlp_out = self.mlp.forward(&x_norm, self.layer_idx, hook)?;
        Ok(mlp_out.add(&x))
    }

    /// Set training mode
    pub fn set_training(&mut self, training: bool) {
        self.attn.set_training(training);
    }
}

impl Module for Block {
    fn forward(&self, _input: &Tensor) -> Tensor {
        unimplemented!("Block requires RoPE frequencies; use forward() directly")
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.attn.parameters();
        params.extend(self.mlp.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.attn.parameters_mut();
        params.extend(self.mlp.parameters_mut());
        params
    }
}

/// Decoder-only causal language model
///
/// Owns the token embedding, the transformer blocks, and the output head.
/// All forward paths accept an optional [`ProjectionDelta`] hook so adapter
/// wrappers can adjust named projections without touching base weights.
pub struct CausalLM {
    config: ModelConfig,
    /// Token embedding weight [vocab_size, n_embd]
    embed_tokens: Tensor,
    blocks: Vec<Block>,
    /// Output head: n_embd -> vocab_size
    lm_head: Linear,
    /// Precomputed RoPE cosine frequencies
    cos: Tensor,
    /// Precomputed RoPE sine frequencies
    sin: Tensor,
    training: bool,
}

impl CausalLM {
    /// Create a model with freshly initialized weights
    ///
    /// Pretrained weights are populated afterwards by the checkpoint loader.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let (cos, sin) =
            precompute_rotary_embeddings(config.sequence_len, config.head_dim(), config.rope_theta)
                .context("Failed to precompute rotary embeddings")?;

        let embed_tokens = init_normal(config.vocab_size, config.n_embd, 0.02, config.seed);
        let blocks = (0..config.n_layer).map(|i| Block::new(&config, i)).collect();
        let lm_head = Linear::new(config.n_embd, config.vocab_size);

        Ok(Self {
            config,
            embed_tokens,
            blocks,
            lm_head,
            cos,
            sin,
            training: true,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Total parameter count (embedding + blocks + head)
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.data().len()).sum()
    }

    /// Set training mode on every layer
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        for block in &mut self.blocks {
            block.set_training(training);
        }
    }

    /// Whether the model is in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Embed token IDs: [batch, seq_len] -> [batch, seq_len, n_embd]
    fn embed(&self, ids: &Tensor) -> Result<Tensor> {
        let shape = ids.shape();
        if shape.len() != 2 {
            anyhow::bail!("Expected 2D token tensor [batch, seq_len], got {:?}", shape);
        }

        let n_embd = self.config.n_embd;
        let weight = self.embed_tokens.data();
        let ids_data = ids.data();
        let mut out = Vec::with_capacity(ids_data.len() * n_embd);

        for &id in ids_data.iter() {
            let idx = id as usize;
            if idx >= self.config.vocab_size {
                anyhow::bail!(
                    "Token id {} out of range for vocabulary size {}",
                    idx,
                    self.config.vocab_size
                );
            }
            out.extend_from_slice(&weight[idx * n_embd..(idx + 1) * n_embd]);
        }

        Ok(Tensor::new(&out, &[shape[0], shape[1], n_embd]))
    }

    /// Forward pass producing logits
    ///
    /// # Arguments
    /// * `ids` - Token IDs [batch, seq_len]
    /// * `kv_cache` - Optional KV cache for autoregressive inference
    /// * `hook` - Optional adapter delta hook
    ///
    /// # Returns
    /// Logits tensor [batch, seq_len, vocab_size]
    pub fn forward(
        &self,
        ids: &Tensor,
        mut kv_cache: Option<&mut KVCache>,
        hook: Option<&dyn ProjectionDelta>,
    ) -> Result<Tensor> {
        let mut x = self.embed(ids)?;

        for block in &self.blocks {
            let cache = kv_cache.as_mut().map(|c| &mut **c);
            x = block
                .forward(&x, (&self.cos, &self.sin), cache, hook)
                .with_context(|| format!("Block {} forward failed", block.layer_idx))?;
        }

        let x = rms_norm(&x)?;
        Ok(self.lm_head.forward(&x))
    }

    /// Forward pass with KV cache (inference path)
    pub fn forward_cache(
        &self,
        ids: &Tensor,
        kv_cache: Option<&mut KVCache>,
        hook: Option<&dyn ProjectionDelta>,
    ) -> Result<Tensor> {
        self.forward(ids, kv_cache, hook)
    }

    /// Forward pass computing the training loss
    ///
    /// # Arguments
    /// * `ids` - Input token IDs [batch, seq_len]
    /// * `targets` - Target token IDs [batch, seq_len] (inputs shifted by one)
    /// * `hook` - Optional adapter delta hook
    ///
    /// # Returns
    /// Scalar cross-entropy loss tensor (call `.backward()` on it)
    pub fn forward_training(
        &self,
        ids: &Tensor,
        targets: &Tensor,
        hook: Option<&dyn ProjectionDelta>,
    ) -> Result<Tensor> {
        let logits = self.forward(ids, None, hook)?;

        let shape = logits.shape().to_vec();
        let (batch, seq_len, vocab) = (shape[0], shape[1], shape[2]);

        // Flatten to [batch * seq_len, vocab] / [batch * seq_len] for the loss
        let logits_flat = Tensor::new(logits.data(), &[batch * seq_len, vocab]);
        let targets_flat = Tensor::new(targets.data(), &[batch * seq_len]);

        Ok(CrossEntropyLoss::new().forward(&logits_flat, &targets_flat))
    }
}

impl Module for CausalLM {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.forward(input, None, None).expect("CausalLM forward failed")
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.embed_tokens];
        for block in &self.blocks {
            params.extend(block.parameters());
        }
        params.extend(self.lm_head.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.embed_tokens];
        for block in &mut self.blocks {
            params.extend(block.parameters_mut());
        }
        params.extend(self.lm_head.parameters_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            sequence_len: 16,
            vocab_size: 64,
            n_layer: 2,
            n_head: 2,
            n_kv_head: 2,
            n_embd: 8,
            intermediate_size: 16,
            rope_theta: 10000.0,
            dropout: Some(0.0),
            seed: Some(42),
        }
    }

    #[test]
    fn test_forward_logits_shape() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let ids = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[1, 4]);

        let logits = model.forward(&ids, None, None).unwrap();
        assert_eq!(logits.shape(), &[1, 4, 64]);
    }

    #[test]
    fn test_forward_rejects_out_of_vocab() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let ids = Tensor::new(&[64.0], &[1, 1]);
        assert!(model.forward(&ids, None, None).is_err());
    }

    #[test]
    fn test_forward_training_scalar_loss() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let ids = Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]);
        let targets = Tensor::new(&[2.0, 3.0, 4.0], &[1, 3]);

        let loss = model.forward_training(&ids, &targets, None).unwrap();
        assert!(loss.item().is_finite());
        assert!(loss.item() > 0.0);
    }

    #[test]
    fn test_forward_cache_incremental() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let mut cache = KVCache::new();

        let prompt = Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]);
        let logits = model.forward_cache(&prompt, Some(&mut cache), None).unwrap();
        assert_eq!(logits.shape(), &[1, 3, 64]);

        let next = Tensor::new(&[4.0], &[1, 1]);
        let logits = model.forward_cache(&next, Some(&mut cache), None).unwrap();
        assert_eq!(logits.shape(), &[1, 1, 64]);
    }

    #[test]
    fn test_num_parameters_nonzero() {
        let model = CausalLM::new(tiny_config()).unwrap();
        assert!(model.num_parameters() > 0);
    }
}
