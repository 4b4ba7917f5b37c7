//! Training metrics logging

use aprender::autograd::Tensor;

/// Metrics for one optimizer step
#[derive(Debug, Clone)]
pub struct TrainingMetrics {
    /// Loss value
    pub loss: f32,
    /// Learning rate
    pub learning_rate: f32,
    /// Throughput (tokens per second)
    pub throughput: f32,
    /// Step number
    pub step: usize,
}

/// Interval logger for training steps
pub struct MetricsLogger {
    log_interval: usize,
    step: usize,
}

impl MetricsLogger {
    /// Create a logger that prints every `log_interval` steps
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval,
            step: 0,
        }
    }

    /// Record one optimizer step, printing at the configured interval
    pub fn log_step(
        &mut self,
        loss: &Tensor,
        learning_rate: f32,
        tokens_processed: usize,
        time_elapsed: f32,
    ) {
        self.step += 1;

        if self.log_interval > 0 && self.step.is_multiple_of(self.log_interval) {
            let throughput = if time_elapsed > 0.0 {
                tokens_processed as f32 / time_elapsed
            } else {
                0.0
            };

            let metrics = TrainingMetrics {
                loss: loss.item(),
                learning_rate,
                throughput,
                step: self.step,
            };

            println!(
                "Step {}: loss={:.6}, lr={:.2e}, throughput={:.2} tokens/s",
                metrics.step, metrics.loss, metrics.learning_rate, metrics.throughput
            );
        }
    }

    /// Steps recorded so far
    pub fn step(&self) -> usize {
        self.step
    }
}
