//! LoRA supervised fine-tuning pipeline
//!
//! Loads a pretrained causal language model and its tokenizer, wraps the
//! model with low-rank adapters, formats a JSONL conversation dataset into
//! the fixed chat template, runs the fine-tuning loop, reports accelerator
//! memory utilization, and saves the adapter plus tokenizer artifacts.
//!
//! # Usage
//!
//! ```bash
//! afinar \
//!   --model-path ./models/base \
//!   [--data-file data.jsonl] \
//!   [--output-dir outputs] \
//!   [--save-dir model] \
//!   [--epochs 3] \
//!   [--prompt "Describe a tall tower in the capital of France."]
//! ```
//!
//! All hyperparameter defaults reproduce the reference configuration; a run
//! with only `--model-path` behaves like the original hardcoded script.

mod generate;

use afinar_lora::{LoraConfig, LoraModel};
use afinar_model::{checkpoint, precision_flags, Accelerator, DType};
use afinar_sft::report::{print_device, print_report};
use afinar_sft::{load_dataset, MemoryReport, SchedulerType, SftConfig, SftTrainer, TrainingArguments};
use afinar_tokenizer::{PaddingSide, Tokenizer};
use anyhow::{Context, Result};
use clap::Parser;
use generate::{run_inference, SamplingParams};
use std::path::PathBuf;

/// LoRA supervised fine-tuning for a pretrained causal language model
#[derive(Parser, Debug)]
#[command(name = "afinar")]
#[command(
    about = "LoRA supervised fine-tuning for a pretrained causal language model",
    long_about = None
)]
struct Args {
    /// Path to the pretrained model directory (config, weights, tokenizer)
    #[arg(long, value_name = "PATH", required = true)]
    model_path: PathBuf,

    /// Newline-delimited JSON dataset of conversations
    #[arg(long, value_name = "PATH", default_value = "data.jsonl")]
    data_file: PathBuf,

    /// Directory for training logs and trainer state
    #[arg(long, value_name = "PATH", default_value = "outputs")]
    output_dir: PathBuf,

    /// Directory for the final adapter and tokenizer artifacts
    #[arg(long, value_name = "PATH", default_value = "model")]
    save_dir: PathBuf,

    /// Maximum sequence length
    #[arg(long, default_value = "2048")]
    max_seq_length: usize,

    /// Batch size per device
    #[arg(long, default_value = "2")]
    batch_size: usize,

    /// Gradient accumulation steps
    #[arg(long, default_value = "4")]
    gradient_accumulation_steps: usize,

    /// Learning rate warmup steps
    #[arg(long, default_value = "5")]
    warmup_steps: usize,

    /// Number of training epochs
    #[arg(long, default_value = "3")]
    epochs: usize,

    /// Peak learning rate
    #[arg(long, default_value = "2e-4")]
    learning_rate: f32,

    /// Weight decay
    #[arg(long, default_value = "0.01")]
    weight_decay: f32,

    /// Random seed for shuffling and adapter initialization
    #[arg(long, default_value = "3407")]
    seed: u64,

    /// Adapter rank
    #[arg(long, default_value = "16")]
    lora_r: usize,

    /// Adapter scaling numerator
    #[arg(long, default_value = "16.0")]
    lora_alpha: f32,

    /// Adapter dropout
    #[arg(long, default_value = "0.0")]
    lora_dropout: f32,

    /// Run one sampled generation with this prompt after training
    #[arg(long, value_name = "TEXT")]
    prompt: Option<String>,

    /// Suppress progress output
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Accelerator probe drives precision selection for the whole run
    let accelerator = Accelerator::detect();
    let dtype = DType::select(accelerator.as_ref());
    let (fp16, bf16) = precision_flags(accelerator.as_ref());

    // Load base model and tokenizer from the same directory
    let base = checkpoint::from_pretrained(&args.model_path)
        .with_context(|| format!("Failed to load model from: {:?}", args.model_path))?;
    let tokenizer = Tokenizer::from_pretrained(&args.model_path)
        .with_context(|| format!("Failed to load tokenizer from: {:?}", args.model_path))?
        .with_max_length(args.max_seq_length)
        .with_padding_side(PaddingSide::Right);

    base.config()
        .validate_vocab_size(tokenizer.vocab_size())
        .context("Tokenizer-model incompatibility")?;

    if !args.quiet {
        println!(
            "Loaded model ({} parameters, compute dtype {})",
            base.num_parameters(),
            dtype.as_str()
        );
    }

    // Wrap with low-rank adapters; base weights stay frozen
    let lora_config = LoraConfig {
        r: args.lora_r,
        lora_alpha: args.lora_alpha,
        lora_dropout: args.lora_dropout,
        ..Default::default()
    };
    let model = LoraModel::wrap(base, lora_config).context("Failed to inject adapters")?;

    if !args.quiet {
        println!(
            "Trainable parameters: {} of {} ({:.1}% frozen)",
            model.num_trainable_parameters(),
            model.num_total_parameters(),
            model.parameter_reduction()
        );
    }

    // Format the dataset through the fixed chat template
    let texts = load_dataset(&args.data_file)
        .with_context(|| format!("Failed to load dataset: {:?}", args.data_file))?;
    if !args.quiet {
        println!("Loaded {} formatted examples", texts.len());
    }

    // Two overlapping bundles, merged last-writer-wins
    let training_args = TrainingArguments {
        output_dir: args.output_dir.clone(),
        per_device_train_batch_size: args.batch_size,
        gradient_accumulation_steps: args.gradient_accumulation_steps,
        warmup_steps: args.warmup_steps,
        num_train_epochs: args.epochs,
        learning_rate: args.learning_rate,
        weight_decay: args.weight_decay,
        lr_scheduler_type: SchedulerType::Linear,
        logging_steps: 1,
        fp16,
        bf16,
        seed: args.seed,
    };
    let sft_config = SftConfig::new(args.max_seq_length, false).merge(&training_args);

    // Pre-training memory snapshot
    let start_reserved = accelerator.as_ref().map(|accel| {
        print_device(accel);
        accel.max_memory_reserved()
    });

    let mut trainer = SftTrainer::new(model, &texts, &tokenizer, sft_config)
        .context("Failed to create trainer")?;
    let stats = trainer.train().context("Training failed")?;

    // Post-training memory report
    if let (Some(accel), Some(start)) = (accelerator.as_ref(), start_reserved) {
        let report = MemoryReport::compute(start, accel.max_memory_reserved(), accel.total_memory());
        print_report(&stats, &report);
    } else if !args.quiet {
        println!(
            "Training finished: {} steps in {:.1} seconds (final loss {:.4})",
            stats.train_steps, stats.train_runtime, stats.final_loss
        );
    }

    // Persist adapter weights and tokenizer configuration
    let mut model = trainer.into_model();
    model.eval();
    model
        .save_pretrained(&args.save_dir)
        .with_context(|| format!("Failed to save adapter to: {:?}", args.save_dir))?;
    tokenizer
        .save(&args.save_dir)
        .with_context(|| format!("Failed to save tokenizer to: {:?}", args.save_dir))?;
    if !args.quiet {
        println!("Saved adapter and tokenizer to {:?}", args.save_dir);
    }

    // Optional post-training smoke generation
    if let Some(prompt) = &args.prompt {
        let response = run_inference(&model, &tokenizer, prompt, &SamplingParams::default())
            .context("Inference failed")?;
        println!("{}", response);
    }

    Ok(())
}
