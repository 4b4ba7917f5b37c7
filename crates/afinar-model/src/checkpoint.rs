//! Pretrained model directory load/save
//!
//! A pretrained directory holds `config.json` (architecture) and
//! `model.safetensors` (weights, aprender's standard format). Loading
//! constructs the model from the configuration and populates its parameters;
//! a missing directory or malformed weights is a hard error.

use crate::config::ModelConfig;
use crate::model::CausalLM;
use anyhow::{Context, Result};
use aprender::nn::serialize::{load_model, save_model};
use std::fs;
use std::path::Path;

/// Weights file name inside a pretrained directory
const WEIGHTS_FILE: &str = "model.safetensors";
/// Configuration file name inside a pretrained directory
const CONFIG_FILE: &str = "config.json";

/// Load a pretrained causal language model from a local directory
///
/// # Arguments
/// * `dir` - Directory containing `config.json` and `model.safetensors`
///
/// # Errors
/// Fails when the directory or either file is missing, the configuration
/// does not parse, or the weights do not match the configured architecture.
pub fn from_pretrained<P: AsRef<Path>>(dir: P) -> Result<CausalLM> {
    let dir = dir.as_ref();

    let config_path = dir.join(CONFIG_FILE);
    let config_data = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read model config: {}", config_path.display()))?;
    let config: ModelConfig =
        serde_json::from_str(&config_data).context("Failed to parse model config JSON")?;

    let mut model = CausalLM::new(config).context("Failed to construct model")?;

    let weights_path = dir.join(WEIGHTS_FILE);
    load_model(&mut model, &weights_path)
        .map_err(|e| anyhow::anyhow!("Failed to load weights from {}: {}", weights_path.display(), e))?;

    Ok(model)
}

/// Save a model as a pretrained directory
///
/// Writes `config.json` and `model.safetensors`, creating the directory if
/// absent. Used to produce base-model directories for tests and tooling.
pub fn save_pretrained<P: AsRef<Path>>(model: &CausalLM, dir: P) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

    let config_path = dir.join(CONFIG_FILE);
    let config_json = serde_json::to_string_pretty(model.config())
        .context("Failed to serialize model config")?;
    fs::write(&config_path, config_json)
        .with_context(|| format!("Failed to write model config: {}", config_path.display()))?;

    let weights_path = dir.join(WEIGHTS_FILE);
    save_model(model, &weights_path)
        .map_err(|e| anyhow::anyhow!("Failed to save weights to {}: {}", weights_path.display(), e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            sequence_len: 16,
            vocab_size: 64,
            n_layer: 1,
            n_head: 2,
            n_kv_head: 2,
            n_embd: 8,
            intermediate_size: 16,
            rope_theta: 10000.0,
            dropout: Some(0.0),
            seed: Some(7),
        }
    }

    #[test]
    fn test_save_creates_both_files() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let dir = TempDir::new().unwrap();
        let model_dir = dir.path().join("base");

        save_pretrained(&model, &model_dir).unwrap();

        assert!(model_dir.join("config.json").exists());
        assert!(model_dir.join("model.safetensors").exists());
    }

    #[test]
    fn test_roundtrip_preserves_config() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let dir = TempDir::new().unwrap();

        save_pretrained(&model, dir.path()).unwrap();
        let loaded = from_pretrained(dir.path()).unwrap();

        assert_eq!(loaded.config(), model.config());
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = from_pretrained(dir.path().join("nonexistent"));
        assert!(result.is_err());
    }

    #[test]
    fn test_corrupted_weights_fail() {
        let model = CausalLM::new(tiny_config()).unwrap();
        let dir = TempDir::new().unwrap();

        save_pretrained(&model, dir.path()).unwrap();
        fs::write(dir.path().join("model.safetensors"), b"corrupted").unwrap();

        assert!(from_pretrained(dir.path()).is_err());
    }
}
