//! Adapter configuration

use serde::{Deserialize, Serialize};

/// Which bias parameters train alongside the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    /// No bias parameters train
    None,
    /// All bias parameters train
    All,
    /// Only biases of adapted layers train
    LoraOnly,
}

/// Task the adapted model is tuned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Causal language modeling
    CausalLm,
}

/// Low-rank adapter configuration
///
/// Immutable record consumed once at injection. Serialized to
/// `adapter_config.json` next to the adapter weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraConfig {
    /// Adapter rank
    pub r: usize,
    /// Scaling numerator; the applied delta is scaled by `lora_alpha / r`
    pub lora_alpha: f32,
    /// Names of projection layers to adapt
    pub target_modules: Vec<String>,
    /// Dropout on the adapter input path
    pub lora_dropout: f32,
    /// Bias training policy
    pub bias: BiasMode,
    /// Task type
    pub task_type: TaskType,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            r: 16,
            lora_alpha: 16.0,
            target_modules: [
                "q_proj",
                "k_proj",
                "v_proj",
                "o_proj",
                "gate_proj",
                "up_proj",
                "down_proj",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            lora_dropout: 0.0,
            bias: BiasMode::None,
            task_type: TaskType::CausalLm,
        }
    }
}

impl LoraConfig {
    /// Delta scaling factor, `lora_alpha / r`
    pub fn scaling(&self) -> f32 {
        self.lora_alpha / self.r as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_cover_all_projections() {
        let config = LoraConfig::default();
        assert_eq!(config.target_modules.len(), 7);
        assert!(config.target_modules.iter().any(|t| t == "q_proj"));
        assert!(config.target_modules.iter().any(|t| t == "down_proj"));
    }

    #[test]
    fn test_scaling() {
        let config = LoraConfig {
            r: 8,
            lora_alpha: 32.0,
            ..Default::default()
        };
        assert!((config.scaling() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = LoraConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("CAUSAL_LM"));
        assert!(json.contains("\"bias\":\"none\""));

        let parsed: LoraConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
