//! Optimizer and learning-rate schedule for fine-tuning

use crate::args::SchedulerType;
use anyhow::Result;
use aprender::autograd::Tensor;
use aprender::nn::optim::{AdamW, Optimizer};
use aprender::nn::scheduler::WarmupCosineScheduler;

/// Optimizer configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Peak learning rate
    pub learning_rate: f32,
    /// Weight decay
    pub weight_decay: f32,
    /// Number of warmup steps
    pub warmup_steps: usize,
    /// Total optimizer steps for the run
    pub max_steps: usize,
    /// Schedule shape
    pub scheduler: SchedulerType,
}

/// Create the AdamW optimizer and cosine scheduler over trainable parameters
///
/// Only the adapter parameters are handed in; the frozen base model never
/// reaches the optimizer. The cosine scheduler is used when the configured
/// schedule is cosine; the linear schedule is computed by
/// [`update_learning_rate`] directly.
///
/// # Arguments
/// * `parameters` - Mutable references to the trainable tensors
/// * `config` - Optimizer configuration
///
/// # Returns
/// Tuple of (optimizer, scheduler)
pub fn setup_optimizer(
    parameters: Vec<&mut Tensor>,
    config: &OptimizerConfig,
) -> Result<(AdamW, WarmupCosineScheduler)> {
    if parameters.is_empty() {
        anyhow::bail!("No trainable parameters to optimize");
    }

    let optimizer = AdamW::new(parameters, config.learning_rate);
    let scheduler =
        WarmupCosineScheduler::with_min_lr(config.warmup_steps, config.max_steps, 0.0);

    Ok((optimizer, scheduler))
}

/// Learning-rate multiplier for the linear schedule
///
/// Linear warmup from zero over `warmup_steps`, then linear decay to zero
/// at `total_steps`.
///
/// # Arguments
/// * `step` - Current optimizer step (0-indexed)
/// * `warmup_steps` - Number of warmup steps
/// * `total_steps` - Total optimizer steps
///
/// # Returns
/// Multiplier in [0.0, 1.0]
pub fn get_lr_multiplier(step: usize, warmup_steps: usize, total_steps: usize) -> f32 {
    if warmup_steps > 0 && step < warmup_steps {
        (step + 1) as f32 / warmup_steps as f32
    } else if step >= total_steps {
        0.0
    } else if total_steps > warmup_steps {
        (total_steps - step) as f32 / (total_steps - warmup_steps) as f32
    } else {
        1.0
    }
}

/// Update the optimizer's learning rate for the given step
///
/// Linear schedules set the rate directly from [`get_lr_multiplier`];
/// cosine schedules delegate to aprender's scheduler.
pub fn update_learning_rate(
    scheduler: &mut WarmupCosineScheduler,
    optimizer: &mut AdamW,
    step: usize,
    config: &OptimizerConfig,
) {
    match config.scheduler {
        SchedulerType::Linear => {
            let multiplier = get_lr_multiplier(step, config.warmup_steps, config.max_steps);
            optimizer.set_lr(config.learning_rate * multiplier);
        }
        SchedulerType::Cosine => {
            scheduler.step(optimizer);
        }
    }
}

/// Current learning rate
pub fn get_learning_rate(optimizer: &AdamW) -> f32 {
    optimizer.lr()
}
