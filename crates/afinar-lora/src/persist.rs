//! Adapter directory persistence
//!
//! A saved adapter directory holds `adapter_model.safetensors` (the trainable
//! A/B matrices, aprender's standard weight format) and `adapter_config.json`
//! (the configuration the adapters were injected with). There is no atomicity
//! across the two writes.

use crate::adapter::LoraModel;
use anyhow::{Context, Result};
use aprender::nn::serialize::save_model;
use std::fs;
use std::path::Path;

/// Adapter weights file name
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
/// Adapter configuration file name
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";

impl LoraModel {
    /// Write adapter weights and configuration to a directory
    ///
    /// Creates the directory if absent. Only the trainable adapter
    /// parameters are written; the frozen base model is not.
    pub fn save_pretrained<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create adapter directory: {}", dir.display()))?;

        let weights_path = dir.join(ADAPTER_WEIGHTS_FILE);
        save_model(self.adapters(), &weights_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to save adapter weights to {}: {}",
                weights_path.display(),
                e
            )
        })?;

        let config_path = dir.join(ADAPTER_CONFIG_FILE);
        let config_json = serde_json::to_string_pretty(self.config())
            .context("Failed to serialize adapter config")?;
        fs::write(&config_path, config_json).with_context(|| {
            format!("Failed to write adapter config: {}", config_path.display())
        })?;

        Ok(())
    }
}
