//! Training-argument bundles and their merge

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Learning-rate schedule shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    /// Linear warmup then linear decay to zero
    Linear,
    /// Linear warmup then cosine decay
    Cosine,
}

/// General training arguments
///
/// The first of the two overlapping configuration bundles; merged into
/// [`SftConfig`] last-writer-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingArguments {
    /// Directory for training logs and trainer state
    pub output_dir: PathBuf,
    /// Batch size per device
    pub per_device_train_batch_size: usize,
    /// Gradient accumulation steps
    pub gradient_accumulation_steps: usize,
    /// Warmup steps
    pub warmup_steps: usize,
    /// Number of training epochs
    pub num_train_epochs: usize,
    /// Peak learning rate
    pub learning_rate: f32,
    /// Weight decay
    pub weight_decay: f32,
    /// Schedule shape
    pub lr_scheduler_type: SchedulerType,
    /// Steps between metric log lines
    pub logging_steps: usize,
    /// Train with float16 arithmetic flags
    pub fp16: bool,
    /// Train with bfloat16 arithmetic flags
    pub bf16: bool,
    /// Random seed for shuffling and adapter initialization
    pub seed: u64,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            per_device_train_batch_size: 2,
            gradient_accumulation_steps: 4,
            warmup_steps: 5,
            num_train_epochs: 3,
            learning_rate: 2e-4,
            weight_decay: 0.01,
            lr_scheduler_type: SchedulerType::Linear,
            logging_steps: 1,
            fp16: false,
            bf16: false,
            seed: 3407,
        }
    }
}

/// Fine-tuning configuration consumed by the trainer
///
/// Carries the SFT-specific keys plus its own copy of every
/// [`TrainingArguments`] key. [`SftConfig::merge`] overwrites the shared
/// keys from an arguments bundle — last writer wins, no other invariant is
/// enforced across the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SftConfig {
    /// Maximum sequence length examples pad/truncate to
    pub max_seq_length: usize,
    /// Pack multiple short examples into one sequence (unsupported shortcut)
    pub packing: bool,
    /// Directory for training logs and trainer state
    pub output_dir: PathBuf,
    /// Batch size per device
    pub per_device_train_batch_size: usize,
    /// Gradient accumulation steps
    pub gradient_accumulation_steps: usize,
    /// Warmup steps
    pub warmup_steps: usize,
    /// Number of training epochs
    pub num_train_epochs: usize,
    /// Peak learning rate
    pub learning_rate: f32,
    /// Weight decay
    pub weight_decay: f32,
    /// Schedule shape
    pub lr_scheduler_type: SchedulerType,
    /// Steps between metric log lines
    pub logging_steps: usize,
    /// Train with float16 arithmetic flags
    pub fp16: bool,
    /// Train with bfloat16 arithmetic flags
    pub bf16: bool,
    /// Random seed for shuffling and adapter initialization
    pub seed: u64,
}

impl SftConfig {
    /// Create a configuration with the given SFT keys and default arguments
    pub fn new(max_seq_length: usize, packing: bool) -> Self {
        let args = TrainingArguments::default();
        Self {
            max_seq_length,
            packing,
            output_dir: args.output_dir,
            per_device_train_batch_size: args.per_device_train_batch_size,
            gradient_accumulation_steps: args.gradient_accumulation_steps,
            warmup_steps: args.warmup_steps,
            num_train_epochs: args.num_train_epochs,
            learning_rate: args.learning_rate,
            weight_decay: args.weight_decay,
            lr_scheduler_type: args.lr_scheduler_type,
            logging_steps: args.logging_steps,
            fp16: args.fp16,
            bf16: args.bf16,
            seed: args.seed,
        }
    }

    /// Overwrite every overlapping key from an arguments bundle
    pub fn merge(mut self, args: &TrainingArguments) -> Self {
        self.output_dir = args.output_dir.clone();
        self.per_device_train_batch_size = args.per_device_train_batch_size;
        self.gradient_accumulation_steps = args.gradient_accumulation_steps;
        self.warmup_steps = args.warmup_steps;
        self.num_train_epochs = args.num_train_epochs;
        self.learning_rate = args.learning_rate;
        self.weight_decay = args.weight_decay;
        self.lr_scheduler_type = args.lr_scheduler_type;
        self.logging_steps = args.logging_steps;
        self.fp16 = args.fp16;
        self.bf16 = args.bf16;
        self.seed = args.seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_script_constants() {
        let args = TrainingArguments::default();
        assert_eq!(args.per_device_train_batch_size, 2);
        assert_eq!(args.gradient_accumulation_steps, 4);
        assert_eq!(args.warmup_steps, 5);
        assert_eq!(args.num_train_epochs, 3);
        assert!((args.learning_rate - 2e-4).abs() < 1e-9);
        assert!((args.weight_decay - 0.01).abs() < 1e-9);
        assert_eq!(args.lr_scheduler_type, SchedulerType::Linear);
        assert_eq!(args.seed, 3407);
    }

    #[test]
    fn test_merge_overwrites_every_overlapping_key() {
        let args = TrainingArguments {
            output_dir: PathBuf::from("elsewhere"),
            per_device_train_batch_size: 8,
            gradient_accumulation_steps: 1,
            warmup_steps: 100,
            num_train_epochs: 10,
            learning_rate: 5e-5,
            weight_decay: 0.1,
            lr_scheduler_type: SchedulerType::Cosine,
            logging_steps: 50,
            fp16: true,
            bf16: false,
            seed: 1,
        };

        let config = SftConfig::new(1024, false).merge(&args);

        assert_eq!(config.output_dir, PathBuf::from("elsewhere"));
        assert_eq!(config.per_device_train_batch_size, 8);
        assert_eq!(config.gradient_accumulation_steps, 1);
        assert_eq!(config.warmup_steps, 100);
        assert_eq!(config.num_train_epochs, 10);
        assert!((config.learning_rate - 5e-5).abs() < 1e-9);
        assert!((config.weight_decay - 0.1).abs() < 1e-9);
        assert_eq!(config.lr_scheduler_type, SchedulerType::Cosine);
        assert_eq!(config.logging_steps, 50);
        assert!(config.fp16);
        assert_eq!(config.seed, 1);
        // SFT-specific keys survive the merge
        assert_eq!(config.max_seq_length, 1024);
        assert!(!config.packing);
    }
}
