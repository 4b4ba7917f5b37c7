//! Model configuration

use serde::{Deserialize, Serialize};

/// Causal language model configuration
///
/// Loaded from the pretrained directory's `config.json` and consumed once to
/// construct the transformer. All projection layers referenced by adapter
/// target names derive their dimensions from this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Maximum sequence length
    pub sequence_len: usize,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Number of transformer layers
    pub n_layer: usize,
    /// Number of query heads
    pub n_head: usize,
    /// Number of key/value heads (for GQA)
    pub n_kv_head: usize,
    /// Embedding dimension
    pub n_embd: usize,
    /// MLP intermediate dimension (gate/up projection width)
    pub intermediate_size: usize,
    /// Base frequency for rotary embeddings
    pub rope_theta: f32,
    /// Dropout probability (None or 0.0 = no dropout)
    pub dropout: Option<f32>,
    /// Random seed for weight initialization (None = non-deterministic)
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sequence_len: 2048,
            vocab_size: 32000,
            n_layer: 12,
            n_head: 12,
            n_kv_head: 4,
            n_embd: 768,
            intermediate_size: 2048,
            rope_theta: 10000.0,
            dropout: Some(0.0),
            seed: None,
        }
    }
}

impl ModelConfig {
    /// Dimension of a single attention head
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Total key/value projection width
    pub fn kv_dim(&self) -> usize {
        self.n_kv_head * self.head_dim()
    }

    /// Input and output dimensions of a named projection layer
    ///
    /// Returns `None` for names that do not exist on this architecture.
    /// Adapter injection uses this lookup, so a mismatched target name
    /// surfaces at injection time rather than mid-forward.
    pub fn projection_dims(&self, name: &str) -> Option<(usize, usize)> {
        match name {
            "q_proj" => Some((self.n_embd, self.n_embd)),
            "k_proj" | "v_proj" => Some((self.n_embd, self.kv_dim())),
            "o_proj" => Some((self.n_embd, self.n_embd)),
            "gate_proj" | "up_proj" => Some((self.n_embd, self.intermediate_size)),
            "down_proj" => Some((self.intermediate_size, self.n_embd)),
            _ => None,
        }
    }

    /// Validate that a tokenizer's vocabulary fits this model
    pub fn validate_vocab_size(&self, tokenizer_vocab: usize) -> anyhow::Result<()> {
        if tokenizer_vocab > self.vocab_size {
            anyhow::bail!(
                "Tokenizer vocabulary ({}) exceeds model vocabulary ({})",
                tokenizer_vocab,
                self.vocab_size
            );
        }
        Ok(())
    }
}
