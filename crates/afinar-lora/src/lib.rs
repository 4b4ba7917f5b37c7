//! Low-rank adaptation (LoRA) for afinar
//!
//! Wraps a loaded [`afinar_model::CausalLM`] with small trainable matrices
//! at its named projection layers while the base weights stay frozen:
//!
//! - [`LoraConfig`] — rank, scaling, target projections, dropout, bias
//!   policy, task type
//! - [`LoraLayer`] — one A/B matrix pair and its delta forward
//! - [`AdapterSet`] — all adapters, wired into the model through the
//!   projection delta hook
//! - [`LoraModel`] — the owning handle with explicit readiness stages and
//!   adapter persistence
//!
//! # Example
//!
//! ```no_run
//! use afinar_lora::{LoraConfig, LoraModel};
//! use afinar_model::checkpoint;
//!
//! let base = checkpoint::from_pretrained("./base-model")?;
//! let mut model = LoraModel::wrap(base, LoraConfig::default())?;
//! println!(
//!     "trainable: {} of {} parameters",
//!     model.num_trainable_parameters(),
//!     model.num_total_parameters()
//! );
//!
//! model.begin_training();
//! // ... training loop ...
//! model.finish_training();
//! model.eval();
//! model.save_pretrained("./model")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod adapter;
pub mod config;
pub mod layer;
pub mod persist;

/// Adapter configuration and its enums
pub use config::{BiasMode, LoraConfig, TaskType};

/// Single-projection adapter pair
pub use layer::LoraLayer;

/// Adapter collection and the wrapped model handle
pub use adapter::{AdapterSet, LoraModel, ModelStage};

/// Adapter directory file names
pub use persist::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
