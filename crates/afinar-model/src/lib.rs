//! Causal language model for afinar
//!
//! This crate provides the base model side of the fine-tuning pipeline:
//! - Decoder-only transformer with GQA, RoPE and RMSNorm
//! - Named projection layers (`q_proj`, `k_proj`, `v_proj`, `o_proj`,
//!   `gate_proj`, `up_proj`, `down_proj`) with an adapter delta hook seam
//! - Pretrained directory loading (`config.json` + `model.safetensors`)
//! - Accelerator probe and reduced-precision selection
//!
//! # Example
//!
//! ```no_run
//! use afinar_model::{checkpoint, Accelerator, DType, KVCache};
//! use aprender::autograd::Tensor;
//!
//! // Probe the accelerator and pick a compute format
//! let accelerator = Accelerator::detect();
//! let dtype = DType::select(accelerator.as_ref());
//!
//! // Load a pretrained model
//! let model = checkpoint::from_pretrained("./base-model")?;
//!
//! // Forward pass with a KV cache for generation
//! let mut cache = KVCache::new();
//! let ids = Tensor::new(&[1.0, 2.0], &[1, 2]);
//! let logits = model.forward_cache(&ids, Some(&mut cache), None)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod attention;
pub mod checkpoint;
pub mod config;
pub mod delta;
pub mod device;
pub mod init;
pub mod mlp;
pub mod model;
pub mod norm;
pub mod rope;

// Public API exports

/// Model configuration record
pub use config::ModelConfig;

/// Decoder-only causal language model
pub use model::{Block, CausalLM};

/// Attention components and the inference KV cache
pub use attention::{CausalSelfAttention, KVCache};

/// Adapter hook seam on named projections
pub use delta::{apply_delta, ProjectionDelta};

/// Accelerator probe and precision selection
pub use device::{precision_flags, Accelerator, DType};

// Re-export common types for convenience
/// Result type alias for error handling
pub use anyhow::Result;
/// Error type alias for error handling
pub use anyhow::Error;
