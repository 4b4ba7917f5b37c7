//! Supervised fine-tuning trainer

use crate::args::SftConfig;
use crate::dataset::SftDataLoader;
use crate::metrics::MetricsLogger;
use crate::optimizer::{
    get_learning_rate, setup_optimizer, update_learning_rate, OptimizerConfig,
};
use afinar_lora::LoraModel;
use afinar_tokenizer::Tokenizer;
use anyhow::{Context, Result};
use aprender::nn::optim::Optimizer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Instant;

/// Trainer state file written to the output directory
const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Metrics of a completed training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainStats {
    /// Wall-clock training duration in seconds
    pub train_runtime: f64,
    /// Optimizer steps taken
    pub train_steps: usize,
    /// Mean loss over the final accumulation window
    pub final_loss: f32,
}

impl TrainStats {
    /// Training duration in minutes
    pub fn runtime_minutes(&self) -> f64 {
        self.train_runtime / 60.0
    }
}

/// Instruction-tuning trainer over a LoRA-wrapped model
///
/// Owns the model and data for the duration of the run; only adapter
/// parameters reach the optimizer. No mid-run checkpointing: an interrupted
/// process loses the run.
pub struct SftTrainer {
    model: LoraModel,
    dataloader: SftDataLoader,
    config: SftConfig,
}

impl SftTrainer {
    /// Create a trainer
    ///
    /// # Arguments
    /// * `model` - Adapter-wrapped model
    /// * `texts` - Formatted training examples
    /// * `tokenizer` - Tokenizer used for encoding and padding
    /// * `config` - Merged fine-tuning configuration
    pub fn new(
        model: LoraModel,
        texts: &[String],
        tokenizer: &Tokenizer,
        config: SftConfig,
    ) -> Result<Self> {
        if config.packing {
            anyhow::bail!("Example packing is not supported; set packing = false");
        }

        let dataloader = SftDataLoader::new(
            texts,
            tokenizer,
            config.per_device_train_batch_size,
            config.max_seq_length,
            Some(config.seed),
        )
        .context("Failed to create data loader")?;

        Ok(Self {
            model,
            dataloader,
            config,
        })
    }

    /// The wrapped model
    pub fn model(&self) -> &LoraModel {
        &self.model
    }

    /// Consume the trainer, returning the model for persistence/inference
    pub fn into_model(self) -> LoraModel {
        self.model
    }

    /// Run the training loop to epoch exhaustion
    ///
    /// Returns run metrics including wall-clock duration, and writes them to
    /// `trainer_state.json` in the configured output directory.
    pub fn train(&mut self) -> Result<TrainStats> {
        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                self.config.output_dir.display()
            )
        })?;

        let accumulation_steps = self.config.gradient_accumulation_steps.max(1);
        let steps_per_epoch = self
            .dataloader
            .batches_per_epoch()
            .div_ceil(accumulation_steps);
        let max_steps = steps_per_epoch * self.config.num_train_epochs;

        let optimizer_config = OptimizerConfig {
            learning_rate: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            warmup_steps: self.config.warmup_steps,
            max_steps,
            scheduler: self.config.lr_scheduler_type,
        };

        self.model.begin_training();
        let (mut optimizer, mut scheduler) =
            setup_optimizer(self.model.trainable_parameters_mut(), &optimizer_config)
                .context("Failed to set up optimizer")?;

        let mut metrics_logger = MetricsLogger::new(self.config.logging_steps);
        let started = Instant::now();
        let mut window_started = Instant::now();

        let mut step = 0;
        let mut accumulated_loss = 0.0;
        let mut accumulation_count = 0;
        let mut final_loss = 0.0;

        for _epoch in 0..self.config.num_train_epochs {
            while let Some((batch, targets)) = self.dataloader.next_batch()? {
                let loss = self
                    .model
                    .forward_training(&batch, &targets)
                    .context("Forward training failed")?;
                loss.backward();

                accumulated_loss += loss.item();
                accumulation_count += 1;

                if accumulation_count >= accumulation_steps {
                    optimizer.step();
                    optimizer.zero_grad();
                    update_learning_rate(&mut scheduler, &mut optimizer, step, &optimizer_config);

                    final_loss = accumulated_loss / accumulation_count as f32;
                    let tokens_processed = self.config.per_device_train_batch_size
                        * (self.config.max_seq_length - 1)
                        * accumulation_count;
                    metrics_logger.log_step(
                        &loss,
                        get_learning_rate(&optimizer),
                        tokens_processed,
                        window_started.elapsed().as_secs_f32(),
                    );
                    window_started = Instant::now();

                    accumulated_loss = 0.0;
                    accumulation_count = 0;
                    step += 1;
                }
            }

            // Flush a partial accumulation window at the epoch boundary
            if accumulation_count > 0 {
                optimizer.step();
                optimizer.zero_grad();
                update_learning_rate(&mut scheduler, &mut optimizer, step, &optimizer_config);

                final_loss = accumulated_loss / accumulation_count as f32;
                accumulated_loss = 0.0;
                accumulation_count = 0;
                step += 1;
            }

            self.dataloader.reset();
        }

        self.model.finish_training();

        let stats = TrainStats {
            train_runtime: started.elapsed().as_secs_f64(),
            train_steps: step,
            final_loss,
        };

        let state_path = self.config.output_dir.join(TRAINER_STATE_FILE);
        let state_json =
            serde_json::to_string_pretty(&stats).context("Failed to serialize trainer state")?;
        fs::write(&state_path, state_json)
            .with_context(|| format!("Failed to write trainer state: {}", state_path.display()))?;

        Ok(stats)
    }
}
